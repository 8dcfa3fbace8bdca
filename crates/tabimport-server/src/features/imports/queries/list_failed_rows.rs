//! List failed rows query
//!
//! Paginated failed rows of one import, in the order they were recorded.
//! Backs the "download failed rows" notification action.

use mediator::Request;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::import::{FailedImportRow, ImportCoordinator, StoreError};

pub const DEFAULT_FAILED_ROWS_LIMIT: u64 = 100;

pub const MAX_FAILED_ROWS_LIMIT: u64 = 1000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFailedRowsQuery {
    #[serde(skip)]
    pub import_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl ListFailedRowsQuery {
    /// Requested limit, defaulting to 100 and clamped to 1-1000
    pub fn limit(&self) -> u64 {
        self.limit
            .unwrap_or(DEFAULT_FAILED_ROWS_LIMIT)
            .clamp(1, MAX_FAILED_ROWS_LIMIT)
    }

    pub fn offset(&self) -> u64 {
        self.offset.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedRowsPage {
    pub data: Vec<FailedImportRow>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
    pub has_more: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ListFailedRowsError {
    #[error("Import job '{0}' not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Request<Result<FailedRowsPage, ListFailedRowsError>> for ListFailedRowsQuery {}

pub async fn handle(
    coordinator: &ImportCoordinator,
    query: ListFailedRowsQuery,
) -> Result<FailedRowsPage, ListFailedRowsError> {
    let store = coordinator.store();

    if store.find_job(query.import_id).await?.is_none() {
        return Err(ListFailedRowsError::NotFound(query.import_id));
    }

    let limit = query.limit();
    let offset = query.offset();
    let total = store.count_failed_rows(query.import_id).await?;
    let data = store.list_failed_rows(query.import_id, limit, offset).await?;

    Ok(FailedRowsPage {
        has_more: offset + (data.len() as u64) < total,
        data,
        total,
        limit,
        offset,
    })
}
