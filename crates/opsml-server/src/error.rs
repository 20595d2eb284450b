//! Error handling for the API server
//!
//! Registry errors cross the wire as `{"detail", "kind", "status"}` so the
//! client can rebuild the original error.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use opsml_registry::{ApiErrorBody, ErrorKind, RegistryError, StorageError};
use thiserror::Error;
use tracing::error;

/// Result type for API operations
pub type Result<T> = std::result::Result<T, ApiError>;

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        ApiError::Registry(RegistryError::Storage(error))
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation | ErrorKind::Version | ErrorKind::Serialization => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Storage | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    fn body(&self) -> ApiErrorBody {
        match self {
            ApiError::Registry(e) => e.to_api_error(),
            ApiError::BadRequest(_) => ApiErrorBody {
                detail: self.to_string(),
                kind: ErrorKind::Validation,
                version_error: None,
            },
            ApiError::Config(_) | ApiError::Io(_) => ApiErrorBody {
                detail: self.to_string(),
                kind: ErrorKind::Internal,
                version_error: None,
            },
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = self.body();
        let status = status_for(body.kind);

        if status.is_server_error() {
            error!("Request failed: {}", body.detail);
        }

        let mut json = serde_json::to_value(&body).unwrap_or_default();
        if let Some(object) = json.as_object_mut() {
            object.insert("status".to_string(), status.as_u16().into());
        }

        (status, Json(json)).into_response()
    }
}
