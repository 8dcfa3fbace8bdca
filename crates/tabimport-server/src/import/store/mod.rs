//! Persistence for import jobs and failed rows
//!
//! [`ImportStore`] is the only way the pipeline touches durable state. It
//! covers the job record, the append-only failure store, and the per-row
//! transaction boundary the row importer writes through.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::types::{FailedImportRow, ImportJob, NewFailedImportRow, NewImportJob};

pub use memory::{InMemoryImportStore, RecordStaging};
pub use postgres::PgImportStore;

/// Errors raised by an [`ImportStore`]
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn job_not_found(id: Uuid) -> Self {
        Self::NotFound(format!("Import job '{}' not found", id))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The progress counters on an import job that chunk workers increment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobCounter {
    Processed,
    Imported,
    Failed,
}

impl JobCounter {
    pub const ALL: [JobCounter; 3] = [JobCounter::Processed, JobCounter::Imported, JobCounter::Failed];

    pub fn column(&self) -> &'static str {
        match self {
            JobCounter::Processed => "processed_rows",
            JobCounter::Imported => "imported_rows",
            JobCounter::Failed => "failed_rows",
        }
    }
}

/// Transactional scope around a single row import.
///
/// Committed when the importer succeeds, rolled back when it fails.
#[async_trait]
pub trait RowTransaction: Send {
    /// Postgres connection bound to this transaction, for SQL-backed stores
    fn connection(&mut self) -> Option<&mut sqlx::PgConnection> {
        None
    }

    /// Write buffer for the in-memory store
    fn staging(&mut self) -> Option<&mut RecordStaging> {
        None
    }

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Durable state of the import pipeline
#[async_trait]
pub trait ImportStore: Send + Sync {
    /// Insert a job with all counters at zero and no completion time
    async fn create_job(&self, job: NewImportJob) -> StoreResult<ImportJob>;

    async fn find_job(&self, id: Uuid) -> StoreResult<Option<ImportJob>>;

    /// Atomically add `amount` to one counter of a job
    async fn increment_counter(&self, id: Uuid, counter: JobCounter, amount: u64) -> StoreResult<()>;

    /// Stamp `completed_at` unless it is already set. Returns whether this call set it.
    async fn mark_completed(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Remove a job and, by cascade, its failed rows
    async fn delete_job(&self, id: Uuid) -> StoreResult<()>;

    /// Append a failed row. Fails if the owning job does not exist.
    async fn create_failed_row(&self, row: NewFailedImportRow) -> StoreResult<FailedImportRow>;

    async fn count_failed_rows(&self, import_id: Uuid) -> StoreResult<u64>;

    /// Failed rows of a job in insertion order (the order `create_failed_row` calls completed)
    async fn list_failed_rows(
        &self,
        import_id: Uuid,
        limit: u64,
        offset: u64,
    ) -> StoreResult<Vec<FailedImportRow>>;

    /// Open the transaction a single row import runs in
    async fn begin(&self) -> StoreResult<Box<dyn RowTransaction>>;
}
