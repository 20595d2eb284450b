//! Local filesystem storage rooted at a directory

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{StorageBackend, StorageClient, join_path, list_local_files, validate_path};
use crate::error::StorageError;

/// Storage on the local filesystem
///
/// All paths are relative to `root`; absolute paths and `..` segments are
/// rejected so nothing escapes the root.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        validate_path(path)?;
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(self.root.clone());
        }
        Ok(self.root.join(trimmed))
    }

    fn relative(&self, path: &Path) -> Result<String, StorageError> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::InvalidKey(path.display().to_string()))?;
        Ok(relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }
}

#[async_trait]
impl StorageClient for LocalStorage {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Local
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(path, e))?;
        }
        tokio::fs::write(&target, data)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let target = self.resolve(path)?;
        tokio::fs::read(&target)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let target = self.resolve(path)?;
        tokio::fs::try_exists(&target)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn ls(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let target = self.resolve(path)?;
        let mut entries = match tokio::fs::read_dir(&target).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(path, e)),
        };

        let mut children = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(path, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            children.push(join_path(path, &name));
        }
        children.sort();
        Ok(children)
    }

    async fn find(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let target = self.resolve(path)?;
        let metadata = match tokio::fs::metadata(&target).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(path, e)),
        };

        if metadata.is_file() {
            return Ok(vec![path.trim_matches('/').to_string()]);
        }

        list_local_files(target)
            .await?
            .iter()
            .map(|file| self.relative(file))
            .collect()
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        let files = self.find(src).await?;
        if files.is_empty() {
            return Err(StorageError::NotFound(src.to_string()));
        }

        let src_root = src.trim_matches('/');
        for file in files {
            let suffix = file.strip_prefix(src_root).unwrap_or_default();
            let data = self.read(&file).await?;
            self.write(&join_path(dst, suffix), data).await?;
        }
        Ok(())
    }

    async fn rm(&self, path: &str) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        if target == self.root {
            return Err(StorageError::InvalidKey(
                "Refusing to remove the storage root".to_string(),
            ));
        }

        let metadata = tokio::fs::metadata(&target)
            .await
            .map_err(|e| StorageError::io(path, e))?;

        let removed = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&target).await
        } else {
            tokio::fs::remove_file(&target).await
        };
        removed.map_err(|e| StorageError::io(path, e))
    }
}
