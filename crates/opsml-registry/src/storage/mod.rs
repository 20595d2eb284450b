//! Storage clients for card artifacts
//!
//! Every backend exposes the same filesystem-like contract over
//! forward-slash relative paths (`OPSML_DATA_REGISTRY/ml/iris/v1.0.0/card.json`).
//! The backend is chosen once from the storage URI by [`storage_client`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{RegistryConfig, is_http_uri};
use crate::error::{RegistryError, StorageError};
use crate::http::HttpClient;

pub mod api_storage;
pub mod local;
pub mod memory;

#[cfg(feature = "s3")]
pub mod s3_storage;

pub use api_storage::ApiStorage;
pub use local::LocalStorage;
pub use memory::MemoryStorage;

#[cfg(feature = "s3")]
pub use s3_storage::S3Storage;

/// Storage backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Local,
    S3,
    Api,
    Memory,
}

impl StorageBackend {
    /// Resolve the backend from a storage URI
    pub fn from_uri(uri: &str) -> Self {
        if uri.starts_with("s3://") {
            StorageBackend::S3
        } else if is_http_uri(uri) {
            StorageBackend::Api
        } else if uri.starts_with("memory://") {
            StorageBackend::Memory
        } else {
            StorageBackend::Local
        }
    }
}

/// Filesystem-like blob storage
#[async_trait]
pub trait StorageClient: Send + Sync {
    fn backend(&self) -> StorageBackend;

    /// Store bytes at `path`, replacing any existing file
    async fn write(&self, path: &str, data: Vec<u8>) -> Result<(), StorageError>;

    /// Read the file at `path`
    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Whether a file or directory exists at `path`
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Immediate children of `path`, as full paths
    async fn ls(&self, path: &str) -> Result<Vec<String>, StorageError>;

    /// Every file below `path`, recursively
    async fn find(&self, path: &str) -> Result<Vec<String>, StorageError>;

    /// Copy a file or directory tree
    async fn copy(&self, src: &str, dst: &str) -> Result<(), StorageError>;

    /// Remove a file or directory tree; `NotFound` when nothing is there
    async fn rm(&self, path: &str) -> Result<(), StorageError>;

    /// Download `rpath` into the local path `lpath`
    ///
    /// Directories are downloaded recursively, mirroring the remote layout.
    async fn get(&self, rpath: &str, lpath: &Path) -> Result<(), StorageError> {
        let files = self.find(rpath).await?;
        if files.is_empty() {
            return Err(StorageError::NotFound(rpath.to_string()));
        }

        let root = rpath.trim_end_matches('/');
        for file in files {
            let target = match file.strip_prefix(root) {
                Some("") => lpath.to_path_buf(),
                Some(rest) => lpath.join(rest.trim_start_matches('/')),
                None => lpath.join(&file),
            };
            let data = self.read(&file).await?;
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StorageError::io(parent.display().to_string(), e))?;
            }
            tokio::fs::write(&target, data)
                .await
                .map_err(|e| StorageError::io(target.display().to_string(), e))?;
        }
        Ok(())
    }

    /// Upload the local file or directory `lpath` to `rpath`
    async fn put(&self, lpath: &Path, rpath: &str) -> Result<(), StorageError> {
        let metadata = tokio::fs::metadata(lpath)
            .await
            .map_err(|e| StorageError::io(lpath.display().to_string(), e))?;

        if metadata.is_file() {
            let data = tokio::fs::read(lpath)
                .await
                .map_err(|e| StorageError::io(lpath.display().to_string(), e))?;
            return self.write(rpath, data).await;
        }

        let root = rpath.trim_end_matches('/');
        for file in list_local_files(lpath.to_path_buf()).await? {
            let relative = file
                .strip_prefix(lpath)
                .map_err(|_| StorageError::InvalidKey(file.display().to_string()))?;
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let data = tokio::fs::read(&file)
                .await
                .map_err(|e| StorageError::io(file.display().to_string(), e))?;
            self.write(&join_path(root, &key), data).await?;
        }
        Ok(())
    }
}

/// Join two relative storage paths with a single `/`
pub fn join_path(base: &str, child: &str) -> String {
    let base = base.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    match (base.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{child}"),
    }
}

/// Reject absolute paths and `..` segments
pub(crate) fn validate_path(path: &str) -> Result<(), StorageError> {
    if path.starts_with('/') || path.contains('\\') {
        return Err(StorageError::InvalidKey(format!(
            "Path must be relative: {path}"
        )));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(StorageError::InvalidKey(format!(
            "Path cannot contain '..': {path}"
        )));
    }
    Ok(())
}

fn list_local_files(
    dir: PathBuf,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<PathBuf>, StorageError>> + Send>>
{
    Box::pin(async move {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| StorageError::io(dir.display().to_string(), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(dir.display().to_string(), e))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| StorageError::io(path.display().to_string(), e))?;
            if file_type.is_dir() {
                files.extend(list_local_files(path).await?);
            } else {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    })
}

/// Build the storage client for a configuration
///
/// Client mode always talks to the remote registry's file routes.
pub async fn storage_client(
    config: &RegistryConfig,
    http: Option<Arc<HttpClient>>,
) -> Result<Arc<dyn StorageClient>, RegistryError> {
    let client: Arc<dyn StorageClient> = match config.storage_backend() {
        StorageBackend::Local => Arc::new(LocalStorage::new(&config.storage_uri)),
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        StorageBackend::Api => {
            let http = match http {
                Some(http) => http,
                None => {
                    let base = if config.is_client_mode() {
                        &config.tracking_uri
                    } else {
                        &config.storage_uri
                    };
                    Arc::new(HttpClient::new(
                        base,
                        config.request_retries,
                        config.request_timeout_secs,
                    )?)
                }
            };
            Arc::new(ApiStorage::new(http))
        }
        #[cfg(feature = "s3")]
        StorageBackend::S3 => {
            let bucket = config.storage_uri.trim_start_matches("s3://");
            let storage = S3Storage::from_env(bucket)?;
            storage.ensure_bucket().await?;
            Arc::new(storage)
        }
        #[cfg(not(feature = "s3"))]
        StorageBackend::S3 => {
            return Err(RegistryError::Config(
                "S3 storage requires the `s3` feature".to_string(),
            ));
        }
    };

    tracing::debug!("Using {:?} storage for {}", client.backend(), config.storage_uri);
    Ok(client)
}
