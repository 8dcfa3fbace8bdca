//! Chunked tabular import pipeline
//!
//! Rows extracted from a spreadsheet-like source are split into chunks,
//! imported row by row through a pluggable [`RowImporter`], and tracked on a
//! job record until a completion callback summarizes the run for its owner.
//!
//! ```text
//! rows ──► ImportCoordinator ──► Batch(ChunkTask..) ──► BatchBackend
//!                                                          │
//!                               ChunkWorker (per chunk) ◄──┘
//!                                  │  RowImporter per row, in a RowTransaction
//!                                  │  failures ──► failed_import_rows
//!                                  └─ counters ──► import_jobs
//!                               finally ──► CompletionNotifier ──► notifications
//! ```

pub mod batch;
pub mod chunk;
pub mod coordinator;
pub mod events;
pub mod importer;
pub mod notifier;
pub mod store;
pub mod types;
pub mod worker;

pub use batch::{
    Batch, BatchBackend, BatchError, BatchOptions, BatchSummary, CancellationRegistry,
    ExecutionMode, SyncBackend, TokioBackend,
};
pub use chunk::{partition_rows, ChunkTask, CHUNK_PAYLOAD_VERSION};
pub use coordinator::{ImportCoordinator, ImportError, ImportRequest, JobHandle};
pub use events::ImportEvent;
pub use importer::{ImporterRegistry, RowImportError, RowImporter};
pub use notifier::{
    CompletionNotifier, CompletionReport, DeliveryMode, Notification, NotificationAction,
    NotificationSink, Severity,
};
pub use store::{
    ImportStore, InMemoryImportStore, JobCounter, PgImportStore, RecordStaging, RowTransaction,
    StoreError, StoreResult,
};
pub use types::{
    CellValue, ColumnMap, FailedImportRow, ImportJob, ImportOptions, MappedRow, OwnerId, Row,
    RowSnapshot, ValidationErrors,
};
pub use worker::{ChunkError, ChunkOutcome, ChunkWorker};
