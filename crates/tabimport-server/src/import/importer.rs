//! Row importer contract
//!
//! A [`RowImporter`] knows how to persist one mapped row of a particular
//! kind of import. It runs inside the row transaction opened by the chunk
//! worker and reports failures through [`RowImportError`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::store::{RowTransaction, StoreError};
use super::types::{ColumnMap, ImportJob, ImportOptions, MappedRow, ValidationErrors};

/// Why a single row could not be imported
#[derive(Error, Debug)]
pub enum RowImportError {
    /// The row failed field-level validation
    #[error("{0}")]
    Validation(ValidationErrors),

    /// The importer refused the row for a non-validation reason
    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RowImportError {
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            RowImportError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

impl From<ValidationErrors> for RowImportError {
    fn from(errors: ValidationErrors) -> Self {
        RowImportError::Validation(errors)
    }
}

impl From<sqlx::Error> for RowImportError {
    fn from(e: sqlx::Error) -> Self {
        RowImportError::Store(StoreError::Database(e))
    }
}

/// Persists rows of one import type
#[async_trait]
pub trait RowImporter: Send + Sync {
    /// Registry key; also stored on the job record
    fn name(&self) -> &str;

    /// Target fields that must be mapped to a source column before an import can start
    fn required_columns(&self) -> Vec<String> {
        Vec::new()
    }

    /// Validate and persist one mapped row through `tx`
    async fn import(
        &self,
        tx: &mut dyn RowTransaction,
        row: &MappedRow,
        column_map: &ColumnMap,
        options: &ImportOptions,
    ) -> Result<(), RowImportError>;

    /// Queue the chunk tasks are placed on
    fn job_queue(&self) -> Option<String> {
        None
    }

    /// Named execution backend
    fn job_connection(&self) -> Option<String> {
        None
    }

    fn job_batch_name(&self) -> Option<String> {
        None
    }

    fn completed_notification_title(&self, _job: &ImportJob) -> String {
        "Import completed".to_string()
    }

    fn completed_notification_body(&self, job: &ImportJob, failed_rows_count: u64) -> String {
        let mut body = format!(
            "Your import has completed and {} {} imported.",
            job.imported_rows,
            plural(job.imported_rows, "row", "rows")
        );

        if failed_rows_count > 0 {
            body.push_str(&format!(
                " {} {} failed to import.",
                failed_rows_count,
                plural(failed_rows_count, "row", "rows")
            ));
        }

        body
    }
}

pub(crate) fn plural<'a>(count: u64, one: &'a str, many: &'a str) -> &'a str {
    if count == 1 {
        one
    } else {
        many
    }
}

/// Row importers addressable by name
#[derive(Clone, Default)]
pub struct ImporterRegistry {
    importers: HashMap<String, Arc<dyn RowImporter>>,
}

impl ImporterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `importer` under its name, replacing any previous entry
    pub fn register(&mut self, importer: Arc<dyn RowImporter>) -> &mut Self {
        self.importers.insert(importer.name().to_string(), importer);
        self
    }

    pub fn with(mut self, importer: Arc<dyn RowImporter>) -> Self {
        self.register(importer);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RowImporter>> {
        self.importers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.importers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ImporterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImporterRegistry")
            .field("importers", &self.names())
            .finish()
    }
}
