//! In-process import store
//!
//! Keeps jobs, failed rows, committed target records and notifications in
//! memory. Used for embedded runs and tests. Faults can be injected to
//! exercise degraded bookkeeping (a counter column that cannot be updated,
//! a failure store that rejects writes).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::{ImportStore, JobCounter, RowTransaction, StoreError, StoreResult};
use crate::import::notifier::{Notification, NotificationSink};
use crate::import::types::{FailedImportRow, ImportJob, NewFailedImportRow, NewImportJob};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<Uuid, ImportJob>,
    failed_rows: Vec<FailedImportRow>,
    records: Vec<(String, Value)>,
    notifications: Vec<Notification>,
    commits: u64,
    rollbacks: u64,
}

#[derive(Default)]
struct Faults {
    counters: HashSet<JobCounter>,
    failed_rows: bool,
}

/// Import store backed by process memory
#[derive(Clone, Default)]
pub struct InMemoryImportStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<Mutex<Faults>>,
}

impl InMemoryImportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every increment of `counter` fail, as if its column were missing
    pub fn fail_counter(&self, counter: JobCounter) {
        lock(&self.faults).counters.insert(counter);
    }

    /// Make every failed-row insert fail
    pub fn fail_failed_rows(&self) {
        lock(&self.faults).failed_rows = true;
    }

    pub fn jobs(&self) -> Vec<ImportJob> {
        lock(&self.state).jobs.values().cloned().collect()
    }

    pub fn failed_rows(&self, import_id: Uuid) -> Vec<FailedImportRow> {
        lock(&self.state)
            .failed_rows
            .iter()
            .filter(|r| r.import_id == import_id)
            .cloned()
            .collect()
    }

    /// Committed target records written through [`RecordStaging`]
    pub fn records(&self, collection: &str) -> Vec<Value> {
        lock(&self.state)
            .records
            .iter()
            .filter(|(c, _)| c == collection)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.state).notifications.clone()
    }

    /// (commits, rollbacks) of row transactions so far
    pub fn transaction_stats(&self) -> (u64, u64) {
        let state = lock(&self.state);
        (state.commits, state.rollbacks)
    }
}

/// Pending writes of one in-memory row transaction
pub struct RecordStaging {
    committed: Arc<Mutex<MemoryState>>,
    pending: Vec<(String, Value)>,
}

impl RecordStaging {
    pub fn insert(&mut self, collection: &str, record: Value) {
        self.pending.push((collection.to_string(), record));
    }

    /// Whether a committed or pending record in `collection` has `field == value`
    pub fn contains(&self, collection: &str, field: &str, value: &Value) -> bool {
        let matches = |(c, r): &(String, Value)| c == collection && r.get(field) == Some(value);
        self.pending.iter().any(matches) || lock(&self.committed).records.iter().any(matches)
    }
}

struct InMemoryTransaction {
    staging: RecordStaging,
}

#[async_trait]
impl RowTransaction for InMemoryTransaction {
    fn staging(&mut self) -> Option<&mut RecordStaging> {
        Some(&mut self.staging)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let RecordStaging { committed, pending } = self.staging;
        let mut state = lock(&committed);
        state.records.extend(pending);
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        lock(&self.staging.committed).rollbacks += 1;
        Ok(())
    }
}

#[async_trait]
impl ImportStore for InMemoryImportStore {
    async fn create_job(&self, job: NewImportJob) -> StoreResult<ImportJob> {
        let now = Utc::now();
        let record = ImportJob {
            id: Uuid::new_v4(),
            file_name: job.file_name,
            file_path: job.file_path,
            importer: job.importer,
            total_rows: job.total_rows,
            processed_rows: 0,
            imported_rows: 0,
            failed_rows: 0,
            user_id: job.user_id,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        lock(&self.state).jobs.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_job(&self, id: Uuid) -> StoreResult<Option<ImportJob>> {
        Ok(lock(&self.state).jobs.get(&id).cloned())
    }

    async fn increment_counter(&self, id: Uuid, counter: JobCounter, amount: u64) -> StoreResult<()> {
        if lock(&self.faults).counters.contains(&counter) {
            return Err(StoreError::Unavailable(format!(
                "column \"{}\" of relation \"import_jobs\" does not exist",
                counter.column()
            )));
        }

        let mut state = lock(&self.state);
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::job_not_found(id))?;
        let slot = match counter {
            JobCounter::Processed => &mut job.processed_rows,
            JobCounter::Imported => &mut job.imported_rows,
            JobCounter::Failed => &mut job.failed_rows,
        };
        *slot += amount;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = lock(&self.state);
        match state.jobs.get_mut(&id) {
            Some(job) if job.completed_at.is_none() => {
                job.completed_at = Some(at);
                job.updated_at = at;
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn delete_job(&self, id: Uuid) -> StoreResult<()> {
        let mut state = lock(&self.state);
        state.jobs.remove(&id);
        state.failed_rows.retain(|r| r.import_id != id);
        Ok(())
    }

    async fn create_failed_row(&self, row: NewFailedImportRow) -> StoreResult<FailedImportRow> {
        if lock(&self.faults).failed_rows {
            return Err(StoreError::Unavailable(
                "failed_import_rows is not writable".to_string(),
            ));
        }

        let mut state = lock(&self.state);
        if !state.jobs.contains_key(&row.import_id) {
            return Err(StoreError::job_not_found(row.import_id));
        }

        let record = FailedImportRow {
            id: Uuid::new_v4(),
            import_id: row.import_id,
            data: row.data,
            validation_error: row.validation_error,
            error: row.error,
            created_at: Utc::now(),
        };
        state.failed_rows.push(record.clone());
        Ok(record)
    }

    async fn count_failed_rows(&self, import_id: Uuid) -> StoreResult<u64> {
        let state = lock(&self.state);
        Ok(state.failed_rows.iter().filter(|r| r.import_id == import_id).count() as u64)
    }

    async fn list_failed_rows(
        &self,
        import_id: Uuid,
        limit: u64,
        offset: u64,
    ) -> StoreResult<Vec<FailedImportRow>> {
        let state = lock(&self.state);
        Ok(state
            .failed_rows
            .iter()
            .filter(|r| r.import_id == import_id)
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn begin(&self) -> StoreResult<Box<dyn RowTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            staging: RecordStaging {
                committed: Arc::clone(&self.state),
                pending: Vec::new(),
            },
        }))
    }
}

#[async_trait]
impl NotificationSink for InMemoryImportStore {
    async fn deliver(&self, notification: Notification) -> StoreResult<()> {
        lock(&self.state).notifications.push(notification);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::import::types::RowSnapshot;
    use serde_json::json;

    fn new_job(total_rows: u64) -> NewImportJob {
        NewImportJob {
            file_name: "users.xlsx".to_string(),
            file_path: "/tmp/users.xlsx".to_string(),
            importer: "users".to_string(),
            total_rows,
            user_id: None,
        }
    }

    #[tokio::test]
    async fn test_create_job_starts_at_zero() {
        let store = InMemoryImportStore::new();
        let job = store.create_job(new_job(10)).await.unwrap();

        assert_eq!(job.total_rows, 10);
        assert_eq!(job.processed_rows, 0);
        assert_eq!(job.imported_rows, 0);
        assert_eq!(job.failed_rows, 0);
        assert!(job.completed_at.is_none());
        assert_eq!(store.find_job(job.id).await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn test_increment_and_fault_injection() {
        let store = InMemoryImportStore::new();
        let job = store.create_job(new_job(5)).await.unwrap();

        store.increment_counter(job.id, JobCounter::Processed, 3).await.unwrap();
        store.increment_counter(job.id, JobCounter::Processed, 2).await.unwrap();

        store.fail_counter(JobCounter::Failed);
        let err = store
            .increment_counter(job.id, JobCounter::Failed, 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed_rows"));

        let job = store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.processed_rows, 5);
        assert_eq!(job.failed_rows, 0);
    }

    #[tokio::test]
    async fn test_mark_completed_only_once() {
        let store = InMemoryImportStore::new();
        let job = store.create_job(new_job(1)).await.unwrap();
        let first = Utc::now();

        assert!(store.mark_completed(job.id, first).await.unwrap());
        assert!(!store.mark_completed(job.id, Utc::now()).await.unwrap());

        let job = store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.completed_at, Some(first));
    }

    #[tokio::test]
    async fn test_failed_rows_require_job_and_cascade() {
        let store = InMemoryImportStore::new();
        let orphan = NewFailedImportRow {
            import_id: Uuid::new_v4(),
            data: RowSnapshot::new(),
            validation_error: None,
            error: Some("boom".to_string()),
        };
        assert!(matches!(
            store.create_failed_row(orphan.clone()).await,
            Err(StoreError::NotFound(_))
        ));

        let job = store.create_job(new_job(2)).await.unwrap();
        let row = NewFailedImportRow {
            import_id: job.id,
            ..orphan
        };
        store.create_failed_row(row.clone()).await.unwrap();
        store.create_failed_row(row).await.unwrap();
        assert_eq!(store.count_failed_rows(job.id).await.unwrap(), 2);
        assert_eq!(store.list_failed_rows(job.id, 1, 1).await.unwrap().len(), 1);

        store.delete_job(job.id).await.unwrap();
        assert_eq!(store.count_failed_rows(job.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transaction_commit_and_rollback() {
        let store = InMemoryImportStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.staging().unwrap().insert("users", json!({"email": "a@example.com"}));
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let staging = tx.staging().unwrap();
        assert!(staging.contains("users", "email", &json!("a@example.com")));
        staging.insert("users", json!({"email": "b@example.com"}));
        tx.rollback().await.unwrap();

        assert_eq!(store.records("users").len(), 1);
        assert_eq!(store.transaction_stats(), (1, 1));
    }
}
