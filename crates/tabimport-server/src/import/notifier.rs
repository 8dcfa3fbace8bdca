//! Completion summary and owner notifications
//!
//! [`CompletionNotifier::finalize`] is the batch completion callback: it
//! stamps the job as completed, counts failed rows from the failure store,
//! classifies the outcome and notifies the job owner. Chunk workers reuse
//! [`CompletionNotifier::notify_progress`] when they observe a fully
//! processed job, so an owner may receive the same summary twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::batch::ExecutionMode;
use super::importer::RowImporter;
use super::store::{ImportStore, StoreResult};
use super::types::{ImportJob, OwnerId};

/// Outcome classification of a finished import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Warning,
    Danger,
}

impl Severity {
    /// `Success` when nothing failed, `Danger` when every row failed, `Warning` otherwise
    pub fn classify(total_rows: u64, failed_rows: u64) -> Self {
        if failed_rows == 0 {
            Severity::Success
        } else if failed_rows == total_rows {
            Severity::Danger
        } else {
            Severity::Warning
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Danger => "danger",
        }
    }
}

/// How a notification reaches its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Shown right away and kept; there is no separate delivery to wait for
    Immediate,
    /// Stored unread in the owner's inbox
    Inbox,
}

impl From<ExecutionMode> for DeliveryMode {
    fn from(mode: ExecutionMode) -> Self {
        match mode {
            ExecutionMode::Sync => DeliveryMode::Immediate,
            ExecutionMode::Async => DeliveryMode::Inbox,
        }
    }
}

/// Action button attached to a notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub name: String,
    pub label: String,
    pub url: String,
    pub mark_as_read: bool,
}

impl NotificationAction {
    pub const DOWNLOAD_FAILED_ROWS: &'static str = "download_failed_rows";

    pub fn download_failed_rows(import_id: Uuid, failed_rows_count: u64) -> Self {
        let label = if failed_rows_count == 1 {
            "Download information about the failed row".to_string()
        } else {
            format!(
                "Download information about the {} failed rows",
                failed_rows_count
            )
        };

        Self {
            name: Self::DOWNLOAD_FAILED_ROWS.to_string(),
            label,
            url: format!("/api/v1/imports/{}/failed-rows", import_id),
            mark_as_read: true,
        }
    }
}

/// Notification addressed to a job owner (maps to notifications table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: OwnerId,
    pub title: String,
    pub body: String,
    pub severity: Severity,
    pub actions: Vec<NotificationAction>,
    pub persistent: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Title, body, severity and actions; ignores ids, timestamps and delivery flags
    pub fn same_content(&self, other: &Notification) -> bool {
        self.user_id == other.user_id
            && self.title == other.title
            && self.body == other.body
            && self.severity == other.severity
            && self.actions == other.actions
    }
}

/// Destination for owner notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: Notification) -> StoreResult<()>;
}

/// Result of finalizing a job
#[derive(Debug, Clone)]
pub struct CompletionReport {
    pub job: ImportJob,
    pub failed_rows_count: u64,
    pub severity: Severity,
    pub notified: bool,
}

/// Builds and sends import completion summaries
pub struct CompletionNotifier {
    store: Arc<dyn ImportStore>,
    sink: Arc<dyn NotificationSink>,
}

impl CompletionNotifier {
    pub fn new(store: Arc<dyn ImportStore>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { store, sink }
    }

    /// Build the summary for `job`. Returns `None` when the job has no owner.
    pub fn build(
        &self,
        job: &ImportJob,
        importer: &dyn RowImporter,
        failed_rows_count: u64,
        delivery: DeliveryMode,
    ) -> Option<Notification> {
        let user_id = job.user_id?;
        let now = Utc::now();

        let mut actions = Vec::new();
        if failed_rows_count > 0 {
            actions.push(NotificationAction::download_failed_rows(
                job.id,
                failed_rows_count,
            ));
        }

        let (persistent, read_at) = match delivery {
            DeliveryMode::Immediate => (true, Some(now)),
            DeliveryMode::Inbox => (false, None),
        };

        Some(Notification {
            id: Uuid::new_v4(),
            user_id,
            title: importer.completed_notification_title(job),
            body: importer.completed_notification_body(job, failed_rows_count),
            severity: Severity::classify(job.total_rows, failed_rows_count),
            actions,
            persistent,
            read_at,
            created_at: now,
        })
    }

    /// Completion callback for a finished batch.
    ///
    /// Returns `Ok(None)` when the job has been deleted in the meantime.
    pub async fn finalize(
        &self,
        job_id: Uuid,
        importer: &dyn RowImporter,
        delivery: DeliveryMode,
    ) -> StoreResult<Option<CompletionReport>> {
        if self.store.find_job(job_id).await?.is_none() {
            debug!(job_id = %job_id, "Import job no longer exists, skipping finalization");
            return Ok(None);
        }

        self.store.mark_completed(job_id, Utc::now()).await?;

        let Some(job) = self.store.find_job(job_id).await? else {
            return Ok(None);
        };

        let failed_rows_count = self.store.count_failed_rows(job_id).await?;
        let severity = Severity::classify(job.total_rows, failed_rows_count);

        info!(
            job_id = %job_id,
            total_rows = job.total_rows,
            processed_rows = job.processed_rows,
            imported_rows = job.imported_rows,
            failed_rows = failed_rows_count,
            severity = severity.as_str(),
            "Import completed"
        );

        let notified = self
            .send(&job, importer, failed_rows_count, delivery)
            .await?;

        Ok(Some(CompletionReport {
            job,
            failed_rows_count,
            severity,
            notified,
        }))
    }

    /// Send the summary if `job` has every row processed. Returns whether anything was sent.
    pub async fn notify_progress(
        &self,
        job: &ImportJob,
        importer: &dyn RowImporter,
        delivery: DeliveryMode,
    ) -> StoreResult<bool> {
        if !job.is_fully_processed() {
            return Ok(false);
        }

        let failed_rows_count = self.store.count_failed_rows(job.id).await?;
        self.send(job, importer, failed_rows_count, delivery).await
    }

    async fn send(
        &self,
        job: &ImportJob,
        importer: &dyn RowImporter,
        failed_rows_count: u64,
        delivery: DeliveryMode,
    ) -> StoreResult<bool> {
        let Some(notification) = self.build(job, importer, failed_rows_count, delivery) else {
            debug!(job_id = %job.id, "Import job has no owner, skipping notification");
            return Ok(false);
        };

        self.sink.deliver(notification).await?;
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::import::importer::RowImportError;
    use crate::import::store::{InMemoryImportStore, JobCounter, RowTransaction};
    use crate::import::types::{ColumnMap, ImportOptions, MappedRow, NewFailedImportRow, NewImportJob};

    struct NoopImporter;

    #[async_trait]
    impl RowImporter for NoopImporter {
        fn name(&self) -> &str {
            "noop"
        }

        async fn import(
            &self,
            _tx: &mut dyn RowTransaction,
            _row: &MappedRow,
            _column_map: &ColumnMap,
            _options: &ImportOptions,
        ) -> Result<(), RowImportError> {
            Ok(())
        }
    }

    async fn seeded_job(store: &InMemoryImportStore, owner: Option<Uuid>, failed: usize) -> ImportJob {
        let job = store
            .create_job(NewImportJob {
                file_name: "people.xlsx".to_string(),
                file_path: "/tmp/people.xlsx".to_string(),
                importer: "noop".to_string(),
                total_rows: 4,
                user_id: owner,
            })
            .await
            .unwrap();

        for _ in 0..failed {
            store
                .create_failed_row(NewFailedImportRow {
                    import_id: job.id,
                    data: Default::default(),
                    validation_error: None,
                    error: Some("rejected".to_string()),
                })
                .await
                .unwrap();
        }
        job
    }

    fn notifier(store: &InMemoryImportStore) -> CompletionNotifier {
        let store = Arc::new(store.clone());
        CompletionNotifier::new(store.clone(), store)
    }

    #[test]
    fn test_classify() {
        assert_eq!(Severity::classify(3, 0), Severity::Success);
        assert_eq!(Severity::classify(0, 0), Severity::Success);
        assert_eq!(Severity::classify(4, 3), Severity::Warning);
        assert_eq!(Severity::classify(4, 4), Severity::Danger);
        assert_eq!(Severity::classify(1, 1), Severity::Danger);
    }

    #[test]
    fn test_download_action_label() {
        let id = Uuid::new_v4();
        let one = NotificationAction::download_failed_rows(id, 1);
        assert_eq!(one.label, "Download information about the failed row");
        let many = NotificationAction::download_failed_rows(id, 3);
        assert_eq!(many.label, "Download information about the 3 failed rows");
        assert_eq!(many.url, format!("/api/v1/imports/{}/failed-rows", id));
    }

    #[tokio::test]
    async fn test_finalize_stamps_and_notifies_owner() {
        let store = InMemoryImportStore::new();
        let owner = Uuid::new_v4();
        let job = seeded_job(&store, Some(owner), 3).await;
        store.increment_counter(job.id, JobCounter::Processed, 4).await.unwrap();

        let report = notifier(&store)
            .finalize(job.id, &NoopImporter, DeliveryMode::Inbox)
            .await
            .unwrap()
            .unwrap();

        assert!(report.job.completed_at.is_some());
        assert_eq!(report.failed_rows_count, 3);
        assert_eq!(report.severity, Severity::Warning);
        assert!(report.notified);

        let sent = store.notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, owner);
        assert_eq!(sent[0].severity, Severity::Warning);
        assert_eq!(sent[0].actions.len(), 1);
        assert!(!sent[0].persistent);
        assert!(sent[0].read_at.is_none());
    }

    #[tokio::test]
    async fn test_finalize_without_owner_sends_nothing() {
        let store = InMemoryImportStore::new();
        let job = seeded_job(&store, None, 0).await;

        let report = notifier(&store)
            .finalize(job.id, &NoopImporter, DeliveryMode::Immediate)
            .await
            .unwrap()
            .unwrap();

        assert!(!report.notified);
        assert_eq!(report.severity, Severity::Success);
        assert!(store.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_finalize_missing_job_is_silent() {
        let store = InMemoryImportStore::new();
        let report = notifier(&store)
            .finalize(Uuid::new_v4(), &NoopImporter, DeliveryMode::Inbox)
            .await
            .unwrap();
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn test_immediate_delivery_is_persistent_and_read() {
        let store = InMemoryImportStore::new();
        let job = seeded_job(&store, Some(Uuid::new_v4()), 0).await;
        let notification = notifier(&store)
            .build(&job, &NoopImporter, 0, DeliveryMode::Immediate)
            .unwrap();

        assert!(notification.persistent);
        assert!(notification.read_at.is_some());
        assert!(notification.actions.is_empty());
    }

    #[tokio::test]
    async fn test_progress_and_completion_share_content() {
        let store = InMemoryImportStore::new();
        let job = seeded_job(&store, Some(Uuid::new_v4()), 4).await;
        store.increment_counter(job.id, JobCounter::Processed, 4).await.unwrap();
        store.increment_counter(job.id, JobCounter::Failed, 4).await.unwrap();
        let notifier = notifier(&store);

        let job = store.find_job(job.id).await.unwrap().unwrap();
        assert!(notifier
            .notify_progress(&job, &NoopImporter, DeliveryMode::Inbox)
            .await
            .unwrap());
        notifier
            .finalize(job.id, &NoopImporter, DeliveryMode::Inbox)
            .await
            .unwrap();

        let sent = store.notifications();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].same_content(&sent[1]));
        assert_eq!(sent[0].severity, Severity::Danger);
    }

    #[tokio::test]
    async fn test_progress_skips_partial_jobs() {
        let store = InMemoryImportStore::new();
        let job = seeded_job(&store, Some(Uuid::new_v4()), 0).await;
        store.increment_counter(job.id, JobCounter::Processed, 2).await.unwrap();
        let job = store.find_job(job.id).await.unwrap().unwrap();

        let sent = notifier(&store)
            .notify_progress(&job, &NoopImporter, DeliveryMode::Inbox)
            .await
            .unwrap();
        assert!(!sent);
    }
}
