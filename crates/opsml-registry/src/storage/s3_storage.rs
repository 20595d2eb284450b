//! S3-compatible storage using the MinIO client
//!
//! Works with AWS S3, MinIO, and any S3-compatible object storage. S3 has no
//! directories, so `ls` groups keys by their next path segment and `rm`/`copy`
//! fan out over every key under the prefix.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use minio::s3::{
    client::Client,
    creds::StaticProvider,
    http::BaseUrl,
    segmented_bytes::SegmentedBytes,
    types::{S3Api, ToStream},
};
use std::collections::BTreeSet;
use std::str::FromStr;

use super::{StorageBackend, StorageClient, join_path};
use crate::error::StorageError;

/// S3-compatible storage implementation using MinIO client
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Create S3 storage for `bucket` from environment variables
    ///
    /// Expects:
    /// - S3_ACCESS_KEY_ID
    /// - S3_SECRET_ACCESS_KEY
    /// - S3_ENDPOINT_URL (for S3-compatible services like MinIO)
    pub fn from_env(bucket: &str) -> Result<Self, StorageError> {
        if bucket.is_empty() {
            return Err(StorageError::Backend(
                "Storage URI must name a bucket: s3://<bucket>".to_string(),
            ));
        }

        let access_key = std::env::var("S3_ACCESS_KEY_ID").map_err(|_| {
            StorageError::Backend("S3_ACCESS_KEY_ID environment variable not set".to_string())
        })?;

        let secret_key = std::env::var("S3_SECRET_ACCESS_KEY").map_err(|_| {
            StorageError::Backend("S3_SECRET_ACCESS_KEY environment variable not set".to_string())
        })?;

        let endpoint_url = std::env::var("S3_ENDPOINT_URL").map_err(|_| {
            StorageError::Backend("S3_ENDPOINT_URL environment variable not set".to_string())
        })?;

        let base_url = BaseUrl::from_str(&endpoint_url)
            .map_err(|e| StorageError::Backend(format!("Invalid S3_ENDPOINT_URL: {}", e)))?;

        let creds_provider = StaticProvider::new(&access_key, &secret_key, None);

        let client = Client::new(base_url, Some(Box::new(creds_provider)), None, None)
            .map_err(|e| StorageError::Backend(format!("Failed to create S3 client: {}", e)))?;

        Ok(Self::new(client, bucket))
    }

    /// Ensure bucket exists (create if it doesn't)
    pub async fn ensure_bucket(&self) -> Result<(), StorageError> {
        let response = self
            .client
            .bucket_exists(&self.bucket)
            .send()
            .await
            .map_err(|e| {
                StorageError::Backend(format!("Failed to check bucket '{}': {}", self.bucket, e))
            })?;

        if response.exists {
            return Ok(());
        }

        self.client
            .create_bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| {
                StorageError::Backend(format!("Failed to create bucket '{}': {}", self.bucket, e))
            })?;
        Ok(())
    }

    /// Validate S3 key format
    fn validate_key(&self, key: &str) -> Result<(), StorageError> {
        if key.is_empty() || key.len() > 1024 {
            return Err(StorageError::InvalidKey(
                "Key must be between 1 and 1024 characters".into(),
            ));
        }

        if key.starts_with('/') || key.ends_with('/') {
            return Err(StorageError::InvalidKey(
                "Key cannot start or end with '/'".into(),
            ));
        }

        if key.split('/').any(|segment| segment == "..") {
            return Err(StorageError::InvalidKey("Key cannot contain '..'".into()));
        }

        Ok(())
    }

    /// Every key under `prefix`, recursively
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut stream = self
            .client
            .list_objects(&self.bucket)
            .prefix(Some(prefix.to_string()))
            .recursive(true)
            .to_stream()
            .await;

        while let Some(result) = stream.next().await {
            let response = result.map_err(|e| {
                StorageError::Backend(format!(
                    "Failed to list files with prefix '{}': {}",
                    prefix, e
                ))
            })?;
            keys.extend(response.contents.into_iter().map(|entry| entry.name));
        }

        keys.sort();
        Ok(keys)
    }

    /// Keys equal to `path` or below the `path/` prefix
    async fn keys_under(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return self.list_keys("").await;
        }

        let dir = format!("{path}/");
        Ok(self
            .list_keys(path)
            .await?
            .into_iter()
            .filter(|key| key == path || key.starts_with(&dir))
            .collect())
    }
}

fn is_not_found(message: &str) -> bool {
    message.contains("NoSuchKey") || message.contains("404")
}

#[async_trait]
impl StorageClient for S3Storage {
    fn backend(&self) -> StorageBackend {
        StorageBackend::S3
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<(), StorageError> {
        self.validate_key(path)?;

        let bytes = SegmentedBytes::from(Bytes::from(data));

        self.client
            .put_object(&self.bucket, path, bytes)
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to put file '{}': {}", path, e)))?;

        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.validate_key(path)?;

        let response = self
            .client
            .get_object(&self.bucket, path)
            .send()
            .await
            .map_err(|e| {
                if is_not_found(&e.to_string()) {
                    StorageError::NotFound(path.to_string())
                } else {
                    StorageError::Backend(format!("Failed to get file '{}': {}", path, e))
                }
            })?;

        let content = response.content.to_segmented_bytes().await.map_err(|e| {
            StorageError::Backend(format!("Failed to read file '{}' content: {}", path, e))
        })?;

        Ok(content.to_bytes().to_vec())
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        self.validate_key(path)?;

        match self.client.stat_object(&self.bucket, path).send().await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e.to_string()) => {
                // Not an object; may still be a "directory" prefix
                Ok(!self.keys_under(path).await?.is_empty())
            }
            Err(e) => Err(StorageError::Backend(format!(
                "Failed to check existence of file '{}': {}",
                path, e
            ))),
        }
    }

    async fn ls(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let root = path.trim_matches('/');
        let children: BTreeSet<String> = self
            .keys_under(root)
            .await?
            .into_iter()
            .filter_map(|key| {
                let rest = if root.is_empty() {
                    key.as_str()
                } else {
                    key.strip_prefix(root)?.strip_prefix('/')?
                };
                let child = rest.split('/').next()?;
                Some(join_path(root, child))
            })
            .collect();
        Ok(children.into_iter().collect())
    }

    async fn find(&self, path: &str) -> Result<Vec<String>, StorageError> {
        self.keys_under(path).await
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        let keys = self.keys_under(src).await?;
        if keys.is_empty() {
            return Err(StorageError::NotFound(src.to_string()));
        }

        let src_root = src.trim_matches('/');
        for key in keys {
            let suffix = key.strip_prefix(src_root).unwrap_or_default();
            let data = self.read(&key).await?;
            self.write(&join_path(dst, suffix), data).await?;
        }
        Ok(())
    }

    async fn rm(&self, path: &str) -> Result<(), StorageError> {
        self.validate_key(path.trim_matches('/'))?;

        let keys = self.keys_under(path).await?;
        if keys.is_empty() {
            return Err(StorageError::NotFound(path.to_string()));
        }

        for key in keys {
            self.client
                .delete_object(&self.bucket, &key)
                .send()
                .await
                .map_err(|e| {
                    StorageError::Backend(format!("Failed to delete file '{}': {}", key, e))
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> S3Storage {
        let client = minio::s3::client::Client::new(
            BaseUrl::from_str("http://localhost:9000").unwrap(),
            None,
            None,
            None,
        )
        .unwrap();
        S3Storage::new(client, "opsml-artifacts")
    }

    #[test]
    fn test_key_validation() {
        let storage = storage();

        assert!(storage.validate_key("OPSML_DATA_REGISTRY/ml/iris/v1.0.0/card.json").is_ok());

        assert!(storage.validate_key("").is_err());
        assert!(storage.validate_key("/starts-with-slash").is_err());
        assert!(storage.validate_key("ends-with-slash/").is_err());
        assert!(storage.validate_key("a/../b").is_err());
        assert!(storage.validate_key(&"x".repeat(1025)).is_err());
    }

    #[test]
    fn test_from_env_requires_bucket() {
        match S3Storage::from_env("") {
            Err(StorageError::Backend(msg)) => assert!(msg.contains("bucket")),
            _ => panic!("Expected Backend error for missing bucket"),
        }
    }

    #[test]
    fn test_backend_kind() {
        assert_eq!(storage().backend(), StorageBackend::S3);
    }
}
