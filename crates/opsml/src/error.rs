//! Error types for the opsml core library
//!
//! Errors are organized by domain: card validation failures and semantic
//! versioning failures. Both are non-retryable; retrying the same input
//! produces the same error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for card and version handling
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CardError {
    /// Card shape or identity errors (names, registry compatibility, associations)
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Semantic version parsing and collision errors
    #[error("Version error: {0}")]
    Version(#[from] VersionError),
}

/// Semantic versioning errors
///
/// Raised while parsing user supplied versions, resolving range queries, and
/// when a requested version would collide with an existing one.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum VersionError {
    #[error("Version {version} is not a valid semver or partial semver")]
    InvalidVersion { version: String },

    #[error("Partial version {version} cannot carry pre-release or build tags")]
    PartialWithTags { version: String },

    #[error("Version {version} already exists for {name}")]
    DuplicateVersion { name: String, version: String },

    #[error(
        "Cannot create release candidate {version}: an official release with the same major.minor.patch exists"
    )]
    ReleaseCandidateOverRelease { version: String },

    #[error("Version type {version_type} requires a full semver version, got {version:?}")]
    RequiresFullSemver {
        version_type: String,
        version: Option<String>,
    },

    #[error("Invalid version query {query}: {reason}")]
    InvalidQuery { query: String, reason: String },
}

/// Shorthand result type for core card operations
pub type Result<T> = std::result::Result<T, CardError>;

impl CardError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        CardError::Validation {
            message: message.into(),
        }
    }
}
