//! Get import query
//!
//! Returns one import job with its counters and progress.

use chrono::{DateTime, Utc};
use mediator::Request;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::import::{ImportCoordinator, ImportJob, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetImportQuery {
    pub import_id: Uuid,
}

/// Import job as exposed over HTTP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportDetails {
    pub id: Uuid,
    pub file_name: String,
    pub importer: String,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub imported_rows: u64,
    pub failed_rows: u64,
    pub progress_percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
    /// A batch for this job is still registered with the coordinator
    pub running: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportDetails {
    fn new(job: ImportJob, running: bool) -> Self {
        Self {
            progress_percentage: (job.progress_percentage() * 100.0).round() / 100.0,
            id: job.id,
            file_name: job.file_name,
            importer: job.importer,
            total_rows: job.total_rows,
            processed_rows: job.processed_rows,
            imported_rows: job.imported_rows,
            failed_rows: job.failed_rows,
            user_id: job.user_id,
            completed_at: job.completed_at,
            running,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GetImportError {
    #[error("Import job '{0}' not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Request<Result<ImportDetails, GetImportError>> for GetImportQuery {}

pub async fn handle(
    coordinator: &ImportCoordinator,
    query: GetImportQuery,
) -> Result<ImportDetails, GetImportError> {
    let job = coordinator
        .store()
        .find_job(query.import_id)
        .await?
        .ok_or(GetImportError::NotFound(query.import_id))?;

    let running = coordinator.is_running(job.id).await;
    Ok(ImportDetails::new(job, running))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_rounded() {
        let now = Utc::now();
        let job = ImportJob {
            id: Uuid::new_v4(),
            file_name: "a.csv".to_string(),
            file_path: "/tmp/a.csv".to_string(),
            importer: "users".to_string(),
            total_rows: 3,
            processed_rows: 1,
            imported_rows: 1,
            failed_rows: 0,
            user_id: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        let details = ImportDetails::new(job, true);
        assert_eq!(details.progress_percentage, 33.33);
        assert!(details.running);
    }
}
