use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::DbErr;
use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Design not found: {0}")]
    DesignNotFound(String),

    #[error("Asset not found: {0}")]
    AssetNotFound(i32),

    #[error("Unknown model type: {0}")]
    UnknownKind(String),

    #[error("Invalid model type key: {0}")]
    InvalidKey(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error("File not found: {0}")]
    MediaNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::DesignNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::AssetNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::UnknownKind(_) => StatusCode::NOT_FOUND,
            ServerError::InvalidKey(_) => StatusCode::BAD_REQUEST,
            ServerError::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
            ServerError::Conversion(_) => StatusCode::BAD_REQUEST,
            ServerError::MediaNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Database(_)
            | ServerError::Storage(_)
            | ServerError::Internal(_)
            | ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = serde_json::json!({
            "success": false,
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
