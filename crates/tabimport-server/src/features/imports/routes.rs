//! Import routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::commands::{
    cancel_import::handle as handle_cancel_import, start_import::handle as handle_start_import,
    CancelImportCommand, CancelImportError, StartImportCommand, StartImportError,
};
use super::queries::{
    get_import::handle as handle_get_import, list_failed_rows::handle as handle_list_failed_rows,
    GetImportError, GetImportQuery, ListFailedRowsError, ListFailedRowsQuery,
};
use crate::error::AppError;
use crate::import::ImportCoordinator;

/// Create import routes
pub fn imports_routes() -> Router<Arc<ImportCoordinator>> {
    Router::new()
        .route("/", post(start_import))
        .route("/:import_id", get(get_import))
        .route("/:import_id/failed-rows", get(list_failed_rows))
        .route("/:import_id/cancel", post(cancel_import))
}

/// Start an import from already extracted rows
///
/// POST /imports
async fn start_import(
    State(coordinator): State<Arc<ImportCoordinator>>,
    Json(command): Json<StartImportCommand>,
) -> Result<Response, AppError> {
    match handle_start_import(&coordinator, command).await {
        Ok(response) => {
            let status = if response.queued {
                StatusCode::ACCEPTED
            } else {
                StatusCode::CREATED
            };
            Ok((status, Json(json!({ "data": response }))).into_response())
        },
        Err(StartImportError::EmptyFileName) => {
            Err(AppError::Validation("File name cannot be empty".to_string()))
        },
        Err(StartImportError::Import(e)) => Err(e.into()),
    }
}

/// Get an import job with its counters
///
/// GET /imports/:import_id
async fn get_import(
    State(coordinator): State<Arc<ImportCoordinator>>,
    Path(import_id): Path<Uuid>,
) -> Result<Response, AppError> {
    match handle_get_import(&coordinator, GetImportQuery { import_id }).await {
        Ok(details) => Ok((StatusCode::OK, Json(json!({ "data": details }))).into_response()),
        Err(GetImportError::NotFound(id)) => {
            tracing::debug!("Import job not found: {}", id);
            Err(AppError::NotFound(format!("Import job '{}' not found", id)))
        },
        Err(GetImportError::Store(e)) => Err(e.into()),
    }
}

/// List failed rows of an import
///
/// GET /imports/:import_id/failed-rows?limit=100&offset=0
async fn list_failed_rows(
    State(coordinator): State<Arc<ImportCoordinator>>,
    Path(import_id): Path<Uuid>,
    Query(mut query): Query<ListFailedRowsQuery>,
) -> Result<Response, AppError> {
    query.import_id = import_id;

    match handle_list_failed_rows(&coordinator, query).await {
        Ok(page) => Ok((StatusCode::OK, Json(json!(page))).into_response()),
        Err(ListFailedRowsError::NotFound(id)) => {
            Err(AppError::NotFound(format!("Import job '{}' not found", id)))
        },
        Err(ListFailedRowsError::Store(e)) => Err(e.into()),
    }
}

/// Cancel a running import
///
/// POST /imports/:import_id/cancel
async fn cancel_import(
    State(coordinator): State<Arc<ImportCoordinator>>,
    Path(import_id): Path<Uuid>,
) -> Result<Response, AppError> {
    match handle_cancel_import(&coordinator, CancelImportCommand { import_id }).await {
        Ok(response) => Ok((StatusCode::ACCEPTED, Json(json!({ "data": response }))).into_response()),
        Err(CancelImportError::NotFound(id)) => {
            Err(AppError::NotFound(format!("Import job '{}' not found", id)))
        },
        Err(e @ CancelImportError::NotRunning(_)) => Err(AppError::Conflict(e.to_string())),
        Err(CancelImportError::Store(e)) => Err(e.into()),
    }
}
