//! Server configuration management

use crate::error::{ApiError, Result};
use opsml_registry::RegistryConfig;
use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to bind to
    pub port: u16,

    /// Largest accepted request body, artifact uploads included
    pub max_body_bytes: usize,

    /// Database and artifact storage the server fronts
    pub registry: RegistryConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let registry = RegistryConfig::from_env()?;
        if registry.is_client_mode() {
            return Err(ApiError::Config(format!(
                "OPSML_TRACKING_URI must be a database url on the server, got {}",
                registry.tracking_uri
            )));
        }

        Ok(Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8888".to_string())
                .parse()
                .map_err(|_| ApiError::Config("Invalid PORT value".to_string()))?,
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .unwrap_or_else(|_| (512 * 1024 * 1024).to_string())
                .parse()
                .map_err(|_| ApiError::Config("Invalid MAX_BODY_BYTES value".to_string()))?,
            registry,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8888,
            max_body_bytes: 512 * 1024 * 1024,
            registry: RegistryConfig::default(),
        }
    }
}
