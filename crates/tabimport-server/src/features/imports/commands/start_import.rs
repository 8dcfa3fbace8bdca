//! Start import command
//!
//! Accepts rows that were already extracted from the uploaded file, together
//! with the column map chosen by the user, and hands them to the coordinator.

use mediator::Request;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::import::{
    ColumnMap, ImportCoordinator, ImportError, ImportOptions, ImportRequest, OwnerId, Row,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartImportCommand {
    /// Registered row importer name
    pub importer: String,
    pub file_name: String,
    #[serde(default)]
    pub file_path: String,
    pub rows: Vec<Row>,
    pub column_map: ColumnMap,
    #[serde(default)]
    pub options: ImportOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartImportResponse {
    pub import_id: Uuid,
    pub batch_id: Uuid,
    pub total_rows: usize,
    pub chunks: usize,
    /// Chunks run in the background; poll the job for progress
    pub queued: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StartImportError {
    #[error("File name cannot be empty")]
    EmptyFileName,
    #[error(transparent)]
    Import(#[from] ImportError),
}

impl Request<Result<StartImportResponse, StartImportError>> for StartImportCommand {}

impl StartImportCommand {
    pub fn validate(&self) -> Result<(), StartImportError> {
        if self.file_name.trim().is_empty() {
            return Err(StartImportError::EmptyFileName);
        }
        Ok(())
    }

    fn into_request(self) -> ImportRequest {
        let mut request = ImportRequest::new(self.importer, self.rows, self.column_map)
            .file(self.file_name, self.file_path)
            .options(self.options);

        if let Some(owner) = self.owner {
            request = request.owner(owner);
        }
        if let Some(chunk_size) = self.chunk_size {
            request = request.chunk_size(chunk_size);
        }
        request
    }
}

#[tracing::instrument(skip(coordinator, command), fields(importer = %command.importer, rows = command.rows.len()))]
pub async fn handle(
    coordinator: &ImportCoordinator,
    command: StartImportCommand,
) -> Result<StartImportResponse, StartImportError> {
    command.validate()?;

    let total_rows = command.rows.len();
    let handle = coordinator.start_import(command.into_request()).await?;

    Ok(StartImportResponse {
        import_id: handle.job_id,
        batch_id: handle.batch_id,
        total_rows,
        chunks: handle.chunk_count,
        queued: handle.queued,
    })
}
