//! Import coordinator
//!
//! Entry point of the pipeline. [`ImportCoordinator::start_import`] checks
//! the request, creates the job record, splits the rows into chunk tasks and
//! hands them to a scheduling backend as one batch whose completion callback
//! finalizes the job.
//!
//! If the backend refuses the batch, the job record is deleted again and
//! [`ImportEvent::Abandoned`] is broadcast, so no job is left waiting forever
//! for chunks that will never run.

use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use tabimport_common::CommonError;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::batch::{Batch, BatchBackend, BatchError, BatchOptions, CancellationRegistry, ChunkRunner};
use super::chunk::{build_tasks, ChunkTask};
use super::events::ImportEvent;
use super::importer::{ImporterRegistry, RowImporter};
use super::notifier::{CompletionNotifier, DeliveryMode, NotificationSink};
use super::store::{ImportStore, StoreError};
use super::types::{ColumnMap, ImportOptions, NewImportJob, OwnerId, Row};
use super::worker::ChunkWorker;
use crate::config::ImportConfig;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Reasons an import could not be started
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Import is limited to {max} rows, but {actual} were supplied")]
    TooManyRows { max: usize, actual: usize },

    #[error("Invalid column map: {0}")]
    InvalidColumnMap(String),

    #[error("No row importer registered as '{0}'")]
    UnknownImporter(String),

    #[error("Chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("Failed to encode chunk payload: {0}")]
    Payload(#[from] CommonError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to dispatch import batch: {0}")]
    Dispatch(#[from] BatchError),
}

/// Everything needed to start one import
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub importer: String,
    pub file_name: String,
    pub file_path: String,
    pub rows: Vec<Row>,
    pub column_map: ColumnMap,
    pub options: ImportOptions,
    pub owner: Option<OwnerId>,
    /// Overrides the configured chunk size
    pub chunk_size: Option<usize>,
    /// Overrides the configured row limit
    pub max_rows: Option<usize>,
    /// Token to cancel the batch with; a fresh one is created when absent
    pub cancellation: Option<CancellationToken>,
}

impl ImportRequest {
    pub fn new(importer: impl Into<String>, rows: Vec<Row>, column_map: ColumnMap) -> Self {
        Self {
            importer: importer.into(),
            file_name: String::new(),
            file_path: String::new(),
            rows,
            column_map,
            options: ImportOptions::new(),
            owner: None,
            chunk_size: None,
            max_rows: None,
            cancellation: None,
        }
    }

    pub fn file(mut self, file_name: impl Into<String>, file_path: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self.file_path = file_path.into();
        self
    }

    pub fn options(mut self, options: ImportOptions) -> Self {
        self.options = options;
        self
    }

    pub fn owner(mut self, owner: OwnerId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Handle returned to the caller of [`ImportCoordinator::start_import`]
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub batch_id: Uuid,
    pub chunk_count: usize,
    /// True when chunks run in the background and the caller should report the import as queued
    pub queued: bool,
    pub cancellation: CancellationToken,
}

impl JobHandle {
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }
}

pub struct ImportCoordinator {
    store: Arc<dyn ImportStore>,
    importers: ImporterRegistry,
    backends: HashMap<String, Arc<dyn BatchBackend>>,
    worker: ChunkWorker,
    notifier: Arc<CompletionNotifier>,
    config: ImportConfig,
    cancellations: CancellationRegistry,
    events: broadcast::Sender<ImportEvent>,
}

impl ImportCoordinator {
    pub fn new(
        store: Arc<dyn ImportStore>,
        sink: Arc<dyn NotificationSink>,
        importers: ImporterRegistry,
        config: ImportConfig,
    ) -> Self {
        let notifier = Arc::new(CompletionNotifier::new(store.clone(), sink));
        let worker = ChunkWorker::new(store.clone(), importers.clone(), notifier.clone());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            store,
            importers,
            backends: HashMap::new(),
            worker,
            notifier,
            config,
            cancellations: CancellationRegistry::new(),
            events,
        }
    }

    /// Register a scheduling backend under a connection name
    pub fn with_backend(mut self, connection: impl Into<String>, backend: Arc<dyn BatchBackend>) -> Self {
        self.backends.insert(connection.into(), backend);
        self
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn ImportStore> {
        self.store.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ImportEvent> {
        self.events.subscribe()
    }

    /// Flag the running batch of `job_id` cancelled. Returns false if none is running.
    pub async fn cancel(&self, job_id: Uuid) -> bool {
        let cancelled = self.cancellations.cancel(job_id).await;
        if cancelled {
            info!(job_id = %job_id, "Import cancellation requested");
        }
        cancelled
    }

    pub async fn is_running(&self, job_id: Uuid) -> bool {
        self.cancellations.contains(job_id).await
    }

    pub async fn start_import(&self, request: ImportRequest) -> Result<JobHandle, ImportError> {
        let chunk_size = request.chunk_size.unwrap_or(self.config.chunk_size);
        if chunk_size == 0 {
            return Err(ImportError::InvalidChunkSize);
        }

        let total_rows = request.rows.len();
        if let Some(max) = request.max_rows.or(self.config.max_rows) {
            if total_rows > max {
                return Err(ImportError::TooManyRows {
                    max,
                    actual: total_rows,
                });
            }
        }

        let importer = self
            .importers
            .get(&request.importer)
            .ok_or_else(|| ImportError::UnknownImporter(request.importer.clone()))?;

        check_required_columns(importer.as_ref(), &request.column_map)?;

        let connection = importer
            .job_connection()
            .unwrap_or_else(|| self.config.default_connection.clone());
        let backend = self
            .backends
            .get(&connection)
            .cloned()
            .ok_or(BatchError::UnknownConnection(connection))?;
        let delivery = DeliveryMode::from(backend.mode());

        let job = self
            .store
            .create_job(NewImportJob {
                file_name: request.file_name,
                file_path: request.file_path,
                importer: importer.name().to_string(),
                total_rows: total_rows as u64,
                user_id: request.owner,
            })
            .await?;

        let tasks = match build_tasks(job.id, request.rows, chunk_size, &request.column_map, &request.options) {
            Ok(tasks) => tasks,
            Err(e) => {
                self.abandon(job.id).await;
                return Err(e.into());
            },
        };
        let chunk_count = tasks.len();

        let cancellation = request.cancellation.unwrap_or_default();
        self.cancellations.register(job.id, cancellation.clone()).await;

        let batch = Batch::new(tasks, self.runner(delivery))
            .options(BatchOptions {
                name: importer.job_batch_name(),
                queue: importer.job_queue(),
                allow_failures: true,
            })
            .cancellation(cancellation.clone());
        let batch = self.attach_finally(batch, job.id, importer.clone(), delivery);

        let _ = self.events.send(ImportEvent::Started {
            job_id: job.id,
            column_map: request.column_map,
            options: request.options,
        });

        info!(
            job_id = %job.id,
            importer = importer.name(),
            total_rows,
            chunks = chunk_count,
            chunk_size,
            "Import started"
        );

        // Detached so an inline batch still reaches its completion callback
        // when the caller stops polling this future.
        let dispatch = tokio::spawn(async move { backend.dispatch(batch).await });
        let dispatched = match dispatch.await {
            Ok(result) => result,
            Err(e) => Err(BatchError::Interrupted(e.to_string())),
        };

        let batch_id = match dispatched {
            Ok(batch_id) => batch_id,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to dispatch import batch");
                self.cancellations.remove(job.id).await;
                self.abandon(job.id).await;
                let _ = self.events.send(ImportEvent::Abandoned { job_id: job.id });
                return Err(e.into());
            },
        };

        Ok(JobHandle {
            job_id: job.id,
            batch_id,
            chunk_count,
            queued: delivery == DeliveryMode::Inbox,
            cancellation,
        })
    }

    fn runner(&self, delivery: DeliveryMode) -> ChunkRunner {
        let worker = Arc::new(self.worker.with_delivery(delivery));
        Arc::new(move |task: ChunkTask, token: CancellationToken| {
            let worker = worker.clone();
            async move { worker.process_chunk(task, &token).await.map(|_| ()) }.boxed()
        })
    }

    fn attach_finally(
        &self,
        batch: Batch,
        job_id: Uuid,
        importer: Arc<dyn RowImporter>,
        delivery: DeliveryMode,
    ) -> Batch {
        let notifier = self.notifier.clone();
        let events = self.events.clone();
        let cancellations = self.cancellations.clone();

        batch.finally(move |summary| {
            async move {
                if summary.failed_chunks > 0 {
                    warn!(
                        job_id = %job_id,
                        failed_chunks = summary.failed_chunks,
                        total_chunks = summary.total_chunks,
                        "Import batch finished with failed chunks"
                    );
                }

                let finalized = match notifier.finalize(job_id, importer.as_ref(), delivery).await {
                    Ok(report) => report.is_some(),
                    Err(e) => {
                        error!(job_id = %job_id, error = %e, "Failed to finalize import");
                        false
                    },
                };

                cancellations.remove(job_id).await;
                if finalized {
                    let _ = events.send(ImportEvent::Completed { job_id });
                }
            }
            .boxed()
        })
    }

    /// Delete a job whose batch never started
    async fn abandon(&self, job_id: Uuid) {
        if let Err(e) = self.store.delete_job(job_id).await {
            error!(job_id = %job_id, error = %e, "Failed to delete abandoned import job");
        }
    }
}

fn check_required_columns(importer: &dyn RowImporter, column_map: &ColumnMap) -> Result<(), ImportError> {
    let missing: Vec<String> = importer
        .required_columns()
        .into_iter()
        .filter(|field| !column_map.is_mapped(field))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ImportError::InvalidColumnMap(format!(
            "required fields are not mapped: {}",
            missing.join(", ")
        )))
    }
}
