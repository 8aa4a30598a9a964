use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Errors raised by the recommendation engine.
#[derive(thiserror::Error, Debug)]
pub enum RecError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    #[error("Dimension mismatch: expected {expected} factors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid identifier: item id {id} outside [0, {count})")]
    InvalidIdentifier { id: usize, count: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type RecResult<T> = Result<T, RecError>;

impl RecError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RecError::NotFound(_) => StatusCode::NOT_FOUND,
            RecError::InvalidInput(_) | RecError::InvalidIdentifier { .. } => StatusCode::BAD_REQUEST,
            RecError::EmptyDataset(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RecError::DimensionMismatch { .. }
            | RecError::InvalidSnapshot(_)
            | RecError::Io(_)
            | RecError::Serialization(_)
            | RecError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RecError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        let body = Json(json!({
            "success": false,
            "data": null,
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}
