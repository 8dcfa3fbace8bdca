//! Import queries

pub mod get_import;
pub mod list_failed_rows;

pub use get_import::{GetImportError, GetImportQuery, ImportDetails};
pub use list_failed_rows::{
    FailedRowsPage, ListFailedRowsError, ListFailedRowsQuery, DEFAULT_FAILED_ROWS_LIMIT,
    MAX_FAILED_ROWS_LIMIT,
};
