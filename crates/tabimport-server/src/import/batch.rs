//! Scheduling backends for chunk batches
//!
//! A [`Batch`] is the set of chunk tasks of one job plus a `finally`
//! callback. Every backend runs each task at most once, contains task
//! errors and panics, and runs `finally` exactly once after every task has
//! reached a terminal state.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::chunk::ChunkTask;
use super::worker::ChunkError;

/// Runs one chunk task
pub type ChunkRunner =
    Arc<dyn Fn(ChunkTask, CancellationToken) -> BoxFuture<'static, Result<(), ChunkError>> + Send + Sync>;

/// Completion callback of a batch
pub type BatchFinally = Box<dyn FnOnce(BatchSummary) -> BoxFuture<'static, ()> + Send>;

/// Errors raised when submitting a batch
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("No batch backend registered for connection '{0}'")]
    UnknownConnection(String),

    #[error("Batch backend is closed")]
    Closed,

    #[error("Batch dispatch was interrupted: {0}")]
    Interrupted(String),
}

/// Whether a backend runs tasks inline or in the background
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sync,
    Async,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub name: Option<String>,
    pub queue: Option<String>,
    /// When false the first failed task cancels the rest of the batch
    pub allow_failures: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            name: None,
            queue: None,
            allow_failures: true,
        }
    }
}

/// State of a batch when its `finally` callback runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub total_chunks: usize,
    pub failed_chunks: usize,
    pub cancelled: bool,
}

/// Chunk tasks of one job, submitted together
pub struct Batch {
    id: Uuid,
    options: BatchOptions,
    tasks: Vec<ChunkTask>,
    runner: ChunkRunner,
    finally: Option<BatchFinally>,
    cancellation: CancellationToken,
}

impl Batch {
    pub fn new(tasks: Vec<ChunkTask>, runner: ChunkRunner) -> Self {
        Self {
            id: Uuid::new_v4(),
            options: BatchOptions::default(),
            tasks,
            runner,
            finally: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn finally<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(BatchSummary) -> BoxFuture<'static, ()> + Send + 'static,
    {
        self.finally = Some(Box::new(callback));
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("id", &self.id)
            .field("options", &self.options)
            .field("tasks", &self.tasks.len())
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

/// Something that can run a batch of chunk tasks
#[async_trait]
pub trait BatchBackend: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    /// Submit a batch. Returns the batch id once the batch is accepted.
    async fn dispatch(&self, batch: Batch) -> Result<Uuid, BatchError>;
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one task, containing its error or panic. Returns whether it succeeded.
async fn run_task(runner: ChunkRunner, task: ChunkTask, token: CancellationToken) -> bool {
    let job_id = task.job_id;
    let chunk_index = task.chunk_index;

    let outcome = AssertUnwindSafe(async move { runner(task, token).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!(job_id = %job_id, chunk_index, error = %e, "Chunk task failed");
            false
        },
        Err(panic) => {
            error!(
                job_id = %job_id,
                chunk_index,
                panic = %panic_message(panic.as_ref()),
                "Chunk task panicked"
            );
            false
        },
    }
}

async fn run_finally(finally: Option<BatchFinally>, summary: BatchSummary) {
    let Some(finally) = finally else {
        return;
    };

    let batch_id = summary.batch_id;
    if let Err(panic) = AssertUnwindSafe(async move { finally(summary).await })
        .catch_unwind()
        .await
    {
        error!(
            batch_id = %batch_id,
            panic = %panic_message(panic.as_ref()),
            "Batch completion callback panicked"
        );
    }
}

/// Runs every task inline, one after another, before `dispatch` returns
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncBackend;

impl SyncBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BatchBackend for SyncBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Sync
    }

    async fn dispatch(&self, batch: Batch) -> Result<Uuid, BatchError> {
        let Batch {
            id,
            options,
            tasks,
            runner,
            finally,
            cancellation,
        } = batch;

        debug!(batch_id = %id, chunks = tasks.len(), "Running batch synchronously");

        let total_chunks = tasks.len();
        let mut failed_chunks = 0;
        for task in tasks {
            if !run_task(runner.clone(), task, cancellation.clone()).await {
                failed_chunks += 1;
                if !options.allow_failures {
                    cancellation.cancel();
                }
            }
        }

        let summary = BatchSummary {
            batch_id: id,
            total_chunks,
            failed_chunks,
            cancelled: cancellation.is_cancelled(),
        };
        run_finally(finally, summary).await;

        Ok(id)
    }
}

/// Runs tasks in the background on the tokio runtime.
///
/// Each queue name gets its own concurrency limit; batches without a queue
/// share the `default` queue.
pub struct TokioBackend {
    concurrency: usize,
    queues: Mutex<HashMap<String, Arc<Semaphore>>>,
    tracker: TaskTracker,
}

impl TokioBackend {
    pub const DEFAULT_QUEUE: &'static str = "default";

    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            queues: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn semaphore_for(&self, queue: Option<&str>) -> Arc<Semaphore> {
        let queue = queue.unwrap_or(Self::DEFAULT_QUEUE);
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.concurrency)))
            .clone()
    }

    /// Stop accepting batches; running batches continue
    pub fn close(&self) {
        self.tracker.close();
    }

    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Close and wait for every accepted batch, including its callback
    pub async fn shutdown(&self) {
        self.close();
        self.tracker.wait().await;
        info!("Batch backend drained");
    }
}

#[async_trait]
impl BatchBackend for TokioBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Async
    }

    async fn dispatch(&self, batch: Batch) -> Result<Uuid, BatchError> {
        if self.is_closed() {
            return Err(BatchError::Closed);
        }

        let Batch {
            id,
            options,
            tasks,
            runner,
            finally,
            cancellation,
        } = batch;

        let semaphore = self.semaphore_for(options.queue.as_deref());
        debug!(
            batch_id = %id,
            name = options.name.as_deref().unwrap_or(""),
            queue = options.queue.as_deref().unwrap_or(Self::DEFAULT_QUEUE),
            chunks = tasks.len(),
            "Dispatching batch"
        );

        self.tracker.spawn(async move {
            let total_chunks = tasks.len();
            let mut set = JoinSet::new();

            for task in tasks {
                let runner = runner.clone();
                let token = cancellation.clone();
                let semaphore = semaphore.clone();
                set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    run_task(runner, task, token).await
                });
            }

            let mut failed_chunks = 0;
            while let Some(joined) = set.join_next().await {
                let succeeded = match joined {
                    Ok(succeeded) => succeeded,
                    Err(e) => {
                        error!(batch_id = %id, error = %e, "Chunk task aborted");
                        false
                    },
                };

                if !succeeded {
                    failed_chunks += 1;
                    if !options.allow_failures {
                        cancellation.cancel();
                    }
                }
            }

            let summary = BatchSummary {
                batch_id: id,
                total_chunks,
                failed_chunks,
                cancelled: cancellation.is_cancelled(),
            };
            run_finally(finally, summary).await;
        });

        Ok(id)
    }
}

/// Cancellation tokens of running batches, keyed by job id
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, job_id: Uuid, token: CancellationToken) {
        self.tokens.write().await.insert(job_id, token);
    }

    /// Flag the batch of `job_id` cancelled. Returns false if no batch is running.
    pub async fn cancel(&self, job_id: Uuid) -> bool {
        match self.tokens.read().await.get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            },
            None => false,
        }
    }

    pub async fn remove(&self, job_id: Uuid) {
        self.tokens.write().await.remove(&job_id);
    }

    pub async fn contains(&self, job_id: Uuid) -> bool {
        self.tokens.read().await.contains_key(&job_id)
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }
}
