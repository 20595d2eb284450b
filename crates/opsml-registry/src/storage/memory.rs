//! In-memory storage for tests and ephemeral registries

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use super::{StorageBackend, StorageClient, join_path, validate_path};
use crate::error::StorageError;

/// In-memory storage implementation
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Vec<u8>>>, StorageError> {
        self.data
            .lock()
            .map_err(|_| StorageError::Backend("Lock poisoned".into()))
    }

    /// Get all stored keys
    pub fn keys(&self) -> Vec<String> {
        self.lock()
            .map(|data| data.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Get number of stored files
    pub fn len(&self) -> usize {
        self.lock().map(|data| data.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keys equal to `path` or below it
fn matching_keys(data: &BTreeMap<String, Vec<u8>>, path: &str) -> Vec<String> {
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        return data.keys().cloned().collect();
    }
    let dir = format!("{path}/");
    data.keys()
        .filter(|key| key.as_str() == path || key.starts_with(&dir))
        .cloned()
        .collect()
}

#[async_trait]
impl StorageClient for MemoryStorage {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Memory
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<(), StorageError> {
        validate_path(path)?;
        self.lock()?.insert(path.trim_matches('/').to_string(), data);
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.lock()?
            .get(path.trim_matches('/'))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(!matching_keys(&*self.lock()?, path).is_empty())
    }

    async fn ls(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let data = self.lock()?;
        let root = path.trim_end_matches('/');
        let children: BTreeSet<String> = matching_keys(&data, root)
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
        Ok(matching_keys(&*self.lock()?, path))
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        validate_path(dst)?;
        let mut data = self.lock()?;
        let keys = matching_keys(&data, src);
        if keys.is_empty() {
            return Err(StorageError::NotFound(src.to_string()));
        }

        let src_root = src.trim_end_matches('/');
        for key in keys {
            let suffix = key.strip_prefix(src_root).unwrap_or_default();
            let target = join_path(dst, suffix);
            if let Some(bytes) = data.get(&key).cloned() {
                data.insert(target, bytes);
            }
        }
        Ok(())
    }

    async fn rm(&self, path: &str) -> Result<(), StorageError> {
        let mut data = self.lock()?;
        let keys = matching_keys(&data, path);
        if keys.is_empty() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        for key in keys {
            data.remove(&key);
        }
        Ok(())
    }
}
