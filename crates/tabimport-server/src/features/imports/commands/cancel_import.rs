//! Cancel import command
//!
//! Flags the batch of a running import cancelled. Chunks that have not
//! started yet are skipped; chunks already running finish their rows.

use mediator::Request;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::import::{ImportCoordinator, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelImportCommand {
    pub import_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelImportResponse {
    pub import_id: Uuid,
    pub cancelled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CancelImportError {
    #[error("Import job '{0}' not found")]
    NotFound(Uuid),
    #[error("Import job '{0}' is not running")]
    NotRunning(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Request<Result<CancelImportResponse, CancelImportError>> for CancelImportCommand {}

#[tracing::instrument(skip(coordinator), fields(import_id = %command.import_id))]
pub async fn handle(
    coordinator: &ImportCoordinator,
    command: CancelImportCommand,
) -> Result<CancelImportResponse, CancelImportError> {
    if coordinator.store().find_job(command.import_id).await?.is_none() {
        return Err(CancelImportError::NotFound(command.import_id));
    }

    if !coordinator.cancel(command.import_id).await {
        return Err(CancelImportError::NotRunning(command.import_id));
    }

    Ok(CancelImportResponse {
        import_id: command.import_id,
        cancelled: true,
    })
}
