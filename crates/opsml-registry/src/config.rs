//! Registry configuration
//!
//! Built once at process start and handed to the registry and storage
//! constructors.

use crate::error::{RegistryError, Result};
use crate::storage::StorageBackend;
use serde::{Deserialize, Serialize};

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// SQLite URL (server mode) or `http(s)://` URL of a remote registry (client mode)
    pub tracking_uri: String,

    /// Artifact root: local path, `s3://bucket`, `memory://` or `http(s)://`
    pub storage_uri: String,

    /// Environment label stamped on every record
    pub app_env: String,

    /// Attempts per HTTP request in client mode
    pub request_retries: u32,

    /// Timeout per HTTP request in seconds
    pub request_timeout_secs: u64,

    /// Attempts at claiming a version when concurrent writers collide
    pub version_conflict_retries: u32,

    /// Attempts per artifact write
    pub storage_write_retries: u32,
}

impl RegistryConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            tracking_uri: std::env::var("OPSML_TRACKING_URI").unwrap_or(defaults.tracking_uri),
            storage_uri: std::env::var("OPSML_STORAGE_URI").unwrap_or(defaults.storage_uri),
            app_env: std::env::var("APP_ENV").unwrap_or(defaults.app_env),
            request_retries: parse_env("OPSML_REQUEST_RETRIES", defaults.request_retries)?,
            request_timeout_secs: parse_env("OPSML_REQUEST_TIMEOUT", defaults.request_timeout_secs)?,
            version_conflict_retries: parse_env(
                "OPSML_VERSION_CONFLICT_RETRIES",
                defaults.version_conflict_retries,
            )?,
            storage_write_retries: parse_env(
                "OPSML_STORAGE_WRITE_RETRIES",
                defaults.storage_write_retries,
            )?,
        })
    }

    /// Local configuration rooted at a SQLite database and artifact directory
    pub fn local(tracking_uri: impl Into<String>, storage_uri: impl Into<String>) -> Self {
        Self {
            tracking_uri: tracking_uri.into(),
            storage_uri: storage_uri.into(),
            ..Self::default()
        }
    }

    /// Client configuration against a remote registry
    pub fn remote(tracking_uri: impl Into<String>) -> Self {
        let tracking_uri = tracking_uri.into();
        Self {
            storage_uri: tracking_uri.clone(),
            tracking_uri,
            ..Self::default()
        }
    }

    /// An HTTP tracking URI means every call goes through a remote registry
    pub fn is_client_mode(&self) -> bool {
        is_http_uri(&self.tracking_uri)
    }

    /// The storage backend artifacts are written to
    pub fn storage_backend(&self) -> StorageBackend {
        if self.is_client_mode() {
            return StorageBackend::Api;
        }
        StorageBackend::from_uri(&self.storage_uri)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            tracking_uri: "sqlite:./opsml.db".to_string(),
            storage_uri: "./opsml_artifacts".to_string(),
            app_env: "development".to_string(),
            request_retries: 3,
            request_timeout_secs: 30,
            version_conflict_retries: 3,
            storage_write_retries: 3,
        }
    }
}

pub(crate) fn is_http_uri(uri: &str) -> bool {
    uri.starts_with("http://") || uri.starts_with("https://")
}

fn parse_env<T: std::str::FromStr>(var: &str, default: T) -> Result<T> {
    match std::env::var(var) {
        Ok(value) => value
            .parse()
            .map_err(|_| RegistryError::Config(format!("Invalid {var} value: {value}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_detection() {
        let local = RegistryConfig::local("sqlite:/tmp/opsml.db", "/tmp/artifacts");
        assert!(!local.is_client_mode());
        assert_eq!(local.storage_backend(), StorageBackend::Local);

        let remote = RegistryConfig::remote("http://localhost:8888");
        assert!(remote.is_client_mode());
        assert_eq!(remote.storage_backend(), StorageBackend::Api);
    }

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.request_retries, 3);
        assert_eq!(config.version_conflict_retries, 3);
        assert_eq!(config.app_env, "development");
    }
}
