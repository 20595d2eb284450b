//! Storage proxied through a remote registry's file routes

use async_trait::async_trait;
use std::sync::Arc;

use super::{StorageBackend, StorageClient, validate_path};
use crate::api::{
    CopyFilesRequest, CopyFilesResponse, FileExistsResponse, FileListResponse, FilePathRequest,
    routes,
};
use crate::error::{RegistryError, StorageError};
use crate::http::HttpClient;

/// Client-mode storage: every operation is an HTTP call to the registry server
#[derive(Debug, Clone)]
pub struct ApiStorage {
    http: Arc<HttpClient>,
}

impl ApiStorage {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    fn blob_route(path: &str) -> String {
        format!("{}/{}", routes::FILE_BLOB, path.trim_matches('/'))
    }
}

/// Fold a remote error back into the storage taxonomy
fn storage_error(path: &str, error: RegistryError) -> StorageError {
    match error {
        RegistryError::Storage(e) => e,
        RegistryError::CardNotFound(_) => StorageError::NotFound(path.to_string()),
        RegistryError::Validation(detail) => StorageError::InvalidKey(detail),
        other => StorageError::Backend(other.to_string()),
    }
}

#[async_trait]
impl StorageClient for ApiStorage {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Api
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<(), StorageError> {
        validate_path(path)?;
        self.http
            .put_bytes(&Self::blob_route(path), data)
            .await
            .map_err(|e| storage_error(path, e))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        validate_path(path)?;
        self.http
            .get_bytes(&Self::blob_route(path))
            .await
            .map_err(|e| storage_error(path, e))
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let request = FilePathRequest {
            path: path.to_string(),
        };
        let response: FileExistsResponse = self
            .http
            .post_json(routes::FILE_EXISTS, &request)
            .await
            .map_err(|e| storage_error(path, e))?;
        Ok(response.exists)
    }

    async fn ls(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let request = FilePathRequest {
            path: path.to_string(),
        };
        let response: FileListResponse = self
            .http
            .post_json(routes::FILE_LIST, &request)
            .await
            .map_err(|e| storage_error(path, e))?;
        Ok(response.files)
    }

    async fn find(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let request = FilePathRequest {
            path: path.to_string(),
        };
        let response: FileListResponse = self
            .http
            .post_json(routes::FILE_FIND, &request)
            .await
            .map_err(|e| storage_error(path, e))?;
        Ok(response.files)
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        let request = CopyFilesRequest {
            src: src.to_string(),
            dst: dst.to_string(),
        };
        let _: CopyFilesResponse = self
            .http
            .post_json(routes::FILE_COPY, &request)
            .await
            .map_err(|e| storage_error(src, e))?;
        Ok(())
    }

    async fn rm(&self, path: &str) -> Result<(), StorageError> {
        validate_path(path)?;
        self.http
            .delete(&Self::blob_route(path))
            .await
            .map_err(|e| storage_error(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_route() {
        assert_eq!(
            ApiStorage::blob_route("/OPSML_DATA_REGISTRY/ml/iris/v1.0.0/card.json"),
            "files/blob/OPSML_DATA_REGISTRY/ml/iris/v1.0.0/card.json"
        );
    }

    #[test]
    fn test_remote_not_found_maps_to_storage_not_found() {
        let err = storage_error("a/b", RegistryError::CardNotFound("gone".into()));
        assert!(err.is_not_found());
    }
}
