//! Chunk worker
//!
//! Processes one chunk task: maps every row, imports it inside its own
//! transaction, records failures, then adds the chunk's totals to the job
//! counters. Row failures and bookkeeping failures stay inside the worker;
//! only a missing job, an unknown importer or an unreadable payload fail the
//! chunk itself.

use anyhow::anyhow;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tabimport_common::CommonError;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::batch::panic_message;
use super::chunk::ChunkTask;
use super::importer::{ImporterRegistry, RowImportError, RowImporter};
use super::notifier::{CompletionNotifier, DeliveryMode};
use super::store::{ImportStore, JobCounter, StoreError};
use super::types::{snapshot_row, MappedRow, NewFailedImportRow};

/// Reasons a whole chunk could not be processed
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("Import job '{0}' not found")]
    JobNotFound(Uuid),

    #[error("No row importer registered as '{0}'")]
    UnknownImporter(String),

    #[error("Invalid chunk payload: {0}")]
    Payload(#[from] CommonError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Row totals of one processed chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub processed: u64,
    pub imported: u64,
    pub failed: u64,
    /// The batch was cancelled before the chunk started
    pub skipped: bool,
}

impl ChunkOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct ChunkWorker {
    store: Arc<dyn ImportStore>,
    importers: ImporterRegistry,
    notifier: Arc<CompletionNotifier>,
    delivery: DeliveryMode,
}

impl ChunkWorker {
    pub fn new(
        store: Arc<dyn ImportStore>,
        importers: ImporterRegistry,
        notifier: Arc<CompletionNotifier>,
    ) -> Self {
        Self {
            store,
            importers,
            notifier,
            delivery: DeliveryMode::Inbox,
        }
    }

    /// Same worker, sending progress notifications with `delivery`
    pub fn with_delivery(&self, delivery: DeliveryMode) -> Self {
        Self {
            delivery,
            ..self.clone()
        }
    }

    pub async fn process_chunk(
        &self,
        task: ChunkTask,
        cancellation: &CancellationToken,
    ) -> Result<ChunkOutcome, ChunkError> {
        if cancellation.is_cancelled() {
            info!(
                job_id = %task.job_id,
                chunk_index = task.chunk_index,
                "Batch cancelled, skipping chunk"
            );
            return Ok(ChunkOutcome::skipped());
        }

        let job = self
            .store
            .find_job(task.job_id)
            .await?
            .ok_or(ChunkError::JobNotFound(task.job_id))?;

        let importer = self
            .importers
            .get(&job.importer)
            .ok_or_else(|| ChunkError::UnknownImporter(job.importer.clone()))?;

        let rows = task.rows()?;
        debug!(
            job_id = %job.id,
            chunk_index = task.chunk_index,
            rows = rows.len(),
            "Processing chunk"
        );

        let mut outcome = ChunkOutcome {
            processed: rows.len() as u64,
            ..Default::default()
        };

        for (row_index, row) in rows.iter().enumerate() {
            let mapped = task.column_map.apply(row);

            match self.import_row(importer.as_ref(), &mapped, &task).await {
                Ok(()) => outcome.imported += 1,
                Err(e) => {
                    outcome.failed += 1;
                    debug!(
                        job_id = %job.id,
                        chunk_index = task.chunk_index,
                        row_index,
                        error = %e,
                        "Row import failed"
                    );
                    self.record_failure(job.id, &mapped, &e).await;
                },
            }
        }

        self.apply_counters(job.id, &outcome).await;
        self.notify_if_complete(job.id, importer.as_ref()).await;

        Ok(outcome)
    }

    /// Import one row in its own transaction; panics become row failures
    async fn import_row(
        &self,
        importer: &dyn RowImporter,
        row: &MappedRow,
        task: &ChunkTask,
    ) -> Result<(), RowImportError> {
        let mut tx = self.store.begin().await?;

        let result = AssertUnwindSafe(importer.import(
            tx.as_mut(),
            row,
            &task.column_map,
            &task.options,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(RowImportError::Other(anyhow!(
                "Row importer panicked: {}",
                panic_message(panic.as_ref())
            )))
        });

        match result {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            },
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(error = %rollback_error, "Failed to roll back row transaction");
                }
                Err(e)
            },
        }
    }

    async fn record_failure(&self, job_id: Uuid, row: &MappedRow, cause: &RowImportError) {
        let failure = NewFailedImportRow {
            import_id: job_id,
            data: snapshot_row(row),
            validation_error: cause.validation_errors().cloned(),
            error: Some(cause.to_string()),
        };

        if let Err(e) = self.store.create_failed_row(failure).await {
            error!(
                job_id = %job_id,
                row_data = ?snapshot_row(row),
                original_error = %cause,
                error = %e,
                "Failed to create failed import row"
            );
        }
    }

    /// Each counter is incremented on its own; a failing one does not stop the others
    async fn apply_counters(&self, job_id: Uuid, outcome: &ChunkOutcome) {
        let increments = [
            (JobCounter::Processed, outcome.processed),
            (JobCounter::Imported, outcome.imported),
            (JobCounter::Failed, outcome.failed),
        ];

        for (counter, amount) in increments {
            if let Err(e) = self.store.increment_counter(job_id, counter, amount).await {
                error!(
                    job_id = %job_id,
                    column = counter.column(),
                    amount,
                    error = %e,
                    "Failed to increment import counter"
                );
            }
        }
    }

    async fn notify_if_complete(&self, job_id: Uuid, importer: &dyn RowImporter) {
        let job = match self.store.find_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to reload job for progress notification");
                return;
            },
        };

        if let Err(e) = self
            .notifier
            .notify_progress(&job, importer, self.delivery)
            .await
        {
            warn!(job_id = %job_id, error = %e, "Failed to send import progress notification");
        }
    }
}
