//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::import::{ImportError, StoreError};

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Import(#[from] ImportError),
}

impl AppError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message.clone()),
            AppError::Validation(message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::Conflict(message) => (StatusCode::CONFLICT, message.clone()),
            AppError::Internal(message) => {
                tracing::error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message.clone())
            },
            AppError::Store(StoreError::NotFound(message)) => {
                (StatusCode::NOT_FOUND, message.clone())
            },
            AppError::Store(e) => {
                tracing::error!("Store error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "A database error occurred".to_string())
            },
            AppError::Import(e) => match e {
                ImportError::TooManyRows { .. } => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
                ImportError::InvalidColumnMap(_)
                | ImportError::InvalidChunkSize
                | ImportError::UnknownImporter(_) => (StatusCode::BAD_REQUEST, e.to_string()),
                ImportError::Dispatch(_) => {
                    tracing::error!("Import dispatch error: {}", e);
                    (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
                },
                ImportError::Payload(_) | ImportError::Store(_) => {
                    tracing::error!("Import error: {:?}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "Failed to start import".to_string())
                },
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = self.status_and_message();

        let body = Json(json!({
            "error": {
                "message": error_message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}
