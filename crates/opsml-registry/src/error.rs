//! Error types for the opsml registry

use opsml::{CardError, VersionError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage client errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return StorageError::NotFound(path.into());
        }
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Backend(_) | StorageError::Io { .. })
    }
}

/// Registry-specific errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Card/table mismatch, re-registration, missing associations, bad names
    #[error("Validation error: {0}")]
    Validation(String),

    /// Version parsing or collision
    #[error("Version error: {0}")]
    Version(#[from] VersionError),

    /// The (name, repository, version) tuple was claimed by another writer
    #[error("Version conflict: {0}")]
    VersionConflict(String),

    #[error("Card not found: {0}")]
    CardNotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Artifacts were written but the record was not committed
    #[error("Failed to commit record for artifacts at {path}: {source}")]
    PartialCommit {
        path: String,
        source: Box<RegistryError>,
        /// Set when removing the written artifacts failed as well
        cleanup: Option<StorageError>,
    },

    #[error("Database error: {0}")]
    Database(String),

    /// Remote registry unreachable after retries
    #[error("Transport error: {detail}")]
    Transport { detail: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

impl From<CardError> for RegistryError {
    fn from(error: CardError) -> Self {
        match error {
            CardError::Validation { message } => RegistryError::Validation(message),
            CardError::Version(version) => RegistryError::Version(version),
        }
    }
}

impl RegistryError {
    pub fn validation(message: impl Into<String>) -> Self {
        RegistryError::Validation(message.into())
    }

    pub fn database(context: &str, error: impl std::fmt::Display) -> Self {
        RegistryError::Database(format!("{context}: {error}"))
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, RegistryError::VersionConflict(_))
    }

    /// Whether retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::VersionConflict(_) | RegistryError::Transport { .. } => true,
            RegistryError::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Stable error kind carried over the HTTP boundary
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Validation(_) => ErrorKind::Validation,
            RegistryError::Version(_) => ErrorKind::Version,
            RegistryError::VersionConflict(_) => ErrorKind::Conflict,
            RegistryError::CardNotFound(_) => ErrorKind::NotFound,
            RegistryError::Storage(StorageError::NotFound(_)) => ErrorKind::NotFound,
            RegistryError::Storage(StorageError::InvalidKey(_)) => ErrorKind::Validation,
            RegistryError::Storage(_) | RegistryError::PartialCommit { .. } => ErrorKind::Storage,
            RegistryError::Serialization(_) => ErrorKind::Serialization,
            RegistryError::Database(_)
            | RegistryError::Transport { .. }
            | RegistryError::Config(_) => ErrorKind::Internal,
        }
    }

    /// Build the JSON error body returned by the server
    pub fn to_api_error(&self) -> ApiErrorBody {
        let version_error = match self {
            RegistryError::Version(e) => Some(e.clone()),
            _ => None,
        };
        ApiErrorBody {
            detail: self.to_string(),
            kind: self.kind(),
            version_error,
        }
    }

    /// Rebuild an error reported by a remote registry
    pub fn from_api_error(body: ApiErrorBody) -> Self {
        match body.kind {
            ErrorKind::Validation => RegistryError::Validation(body.detail),
            ErrorKind::Version => match body.version_error {
                Some(e) => RegistryError::Version(e),
                None => RegistryError::Validation(body.detail),
            },
            ErrorKind::Conflict => RegistryError::VersionConflict(body.detail),
            ErrorKind::NotFound => RegistryError::CardNotFound(body.detail),
            ErrorKind::Storage => RegistryError::Storage(StorageError::Backend(body.detail)),
            ErrorKind::Serialization | ErrorKind::Internal => {
                RegistryError::Transport { detail: body.detail }
            }
        }
    }
}

/// Error classes exposed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Version,
    Conflict,
    NotFound,
    Storage,
    Serialization,
    Internal,
}

/// JSON error body: `{"detail": ..., "kind": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub detail: String,
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_error: Option<VersionError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_error_conversion() {
        let err: RegistryError = CardError::validation("bad name").into();
        assert!(matches!(err, RegistryError::Validation(ref m) if m == "bad name"));
    }

    #[test]
    fn test_api_error_round_trip_keeps_version_error() {
        let original = RegistryError::Version(VersionError::DuplicateVersion {
            name: "iris".to_string(),
            version: "1.0.0".to_string(),
        });
        let body = original.to_api_error();
        let json = serde_json::to_string(&body).unwrap();
        let parsed: ApiErrorBody = serde_json::from_str(&json).unwrap();

        match RegistryError::from_api_error(parsed) {
            RegistryError::Version(VersionError::DuplicateVersion { name, version }) => {
                assert_eq!(name, "iris");
                assert_eq!(version, "1.0.0");
            }
            other => panic!("Expected DuplicateVersion, got {other:?}"),
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RegistryError::VersionConflict("x".into()).is_retryable());
        assert!(RegistryError::Storage(StorageError::Backend("down".into())).is_retryable());
        assert!(!RegistryError::Storage(StorageError::NotFound("k".into())).is_retryable());
        assert!(!RegistryError::validation("nope").is_retryable());
    }

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err = StorageError::io(
            "a/b",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(err.is_not_found());
    }
}
