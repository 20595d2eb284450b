//! Artifact persistence for cards
//!
//! A card's artifacts live under its version directory, next to a
//! `card.json` snapshot of the card itself:
//!
//! ```text
//! OPSML_MODEL_REGISTRY/ml/iris/v1.2.0/card.json
//! OPSML_MODEL_REGISTRY/ml/iris/v1.2.0/model/weights.bin
//! ```
//!
//! New registrations are written under `{table}/.staging/{uid}` first and
//! only copied into the version directory once their record is committed.
//! A writer that loses a version race therefore never touches the files of
//! the card that owns that version.

use opsml::{CARD_FILE_NAME, Card, CardArtifact};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{RegistryError, Result, StorageError};
use crate::storage::{StorageBackend, StorageClient, join_path};

/// Directory under each table holding uncommitted registrations
pub const STAGING_DIR: &str = ".staging";

/// Where one card's artifacts go, resolved per operation
///
/// Never stored on the shared storage client, so concurrent writes to
/// different cards cannot see each other's path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSpec {
    pub save_path: String,
    pub backend: StorageBackend,
}

/// Writes, reads and removes card artifacts through a storage client
#[derive(Clone)]
pub struct ArtifactStore {
    storage: Arc<dyn StorageClient>,
    write_retries: u32,
}

impl ArtifactStore {
    pub fn new(storage: Arc<dyn StorageClient>, write_retries: u32) -> Self {
        Self {
            storage,
            write_retries: write_retries.max(1),
        }
    }

    pub fn storage(&self) -> &Arc<dyn StorageClient> {
        &self.storage
    }

    /// Storage spec for a versioned card
    pub fn spec_for(&self, card: &Card) -> Result<StorageSpec> {
        let save_path = card.storage_path().ok_or_else(|| {
            RegistryError::validation(format!(
                "{} {} has no version; cannot resolve its storage path",
                card.card_type_name(),
                card.name
            ))
        })?;

        Ok(StorageSpec {
            save_path,
            backend: self.storage.backend(),
        })
    }

    /// Staging path of a card that is not committed yet
    pub fn staging_path(&self, card: &Card) -> Result<String> {
        let uid = card.uid.as_deref().ok_or_else(|| {
            RegistryError::validation(format!(
                "{} {} has no uid; cannot stage its artifacts",
                card.card_type_name(),
                card.name
            ))
        })?;
        Ok(format!(
            "{}/{}/{}",
            card.registry_type().table_name(),
            STAGING_DIR,
            uid
        ))
    }

    /// Write the card snapshot and every artifact to the card's version directory
    pub async fn save(&self, card: &Card) -> Result<StorageSpec> {
        let spec = self.spec_for(card)?;
        self.write_card(card, &spec.save_path).await?;
        Ok(spec)
    }

    /// Write a card under its staging path
    ///
    /// Anything written before a failure is removed again.
    pub async fn stage(&self, card: &Card) -> Result<String> {
        let staged = self.staging_path(card)?;
        if let Err(e) = self.write_card(card, &staged).await {
            self.discard(&staged).await;
            return Err(e);
        }
        Ok(staged)
    }

    /// Move staged artifacts into the card's version directory
    ///
    /// Only called once the card's record owns that version, so whatever
    /// is already there is left over from an earlier failure and replaced.
    pub async fn publish(&self, staged: &str, card: &Card) -> Result<StorageSpec> {
        let spec = self.spec_for(card)?;

        self.delete(&spec.save_path).await?;
        self.storage.copy(staged, &spec.save_path).await?;
        self.discard(staged).await;

        debug!("Published {} to {}", staged, spec.save_path);
        Ok(spec)
    }

    /// Best-effort removal of a staging directory
    pub async fn discard(&self, staged: &str) {
        if let Err(e) = self.delete(staged).await {
            warn!("Failed to remove staged artifacts at {}: {}", staged, e);
        }
    }

    async fn write_card(&self, card: &Card, path: &str) -> Result<()> {
        let snapshot = serde_json::to_vec_pretty(card)?;
        self.write_with_retry(&join_path(path, CARD_FILE_NAME), snapshot)
            .await?;

        for artifact in &card.artifacts {
            self.write_with_retry(&join_path(path, &artifact.file_name), artifact.data.clone())
                .await?;
        }

        debug!("Saved {} artifacts to {}", card.artifacts.len() + 1, path);
        Ok(())
    }

    /// Remove everything at the card's path, then save again
    pub async fn replace(&self, card: &Card) -> Result<StorageSpec> {
        let spec = self.spec_for(card)?;
        self.delete(&spec.save_path).await?;
        self.save(card).await
    }

    /// Every artifact stored under `uri`, excluding the card snapshot
    pub async fn load_artifacts(&self, uri: &str) -> Result<Vec<CardArtifact>> {
        let root = uri.trim_end_matches('/');
        let snapshot = join_path(root, CARD_FILE_NAME);
        let mut artifacts = Vec::new();

        for file in self.storage.find(root).await? {
            if file == snapshot {
                continue;
            }
            let file_name = file
                .strip_prefix(root)
                .unwrap_or(&file)
                .trim_start_matches('/')
                .to_string();
            let data = self.storage.read(&file).await?;
            artifacts.push(CardArtifact::new(file_name, data)?);
        }

        Ok(artifacts)
    }

    /// Remove the artifacts under `uri`; a path that is already gone is fine
    pub async fn delete(&self, uri: &str) -> std::result::Result<(), StorageError> {
        match self.storage.rm(uri).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("Nothing to remove at {}", uri);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn write_with_retry(
        &self,
        path: &str,
        data: Vec<u8>,
    ) -> std::result::Result<(), StorageError> {
        let mut attempt = 1;
        loop {
            match self.storage.write(path, data.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.write_retries => {
                    warn!(
                        "Write to {} failed ({}); retrying ({}/{})",
                        path, e, attempt, self.write_retries
                    );
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use opsml::CardKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn card() -> Card {
        Card::new(CardKind::data(), "iris", "ml", "alice")
            .unwrap()
            .with_version("1.0.0")
            .with_artifact(CardArtifact::new("data/iris.csv", b"1,2,3".to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let storage = Arc::new(MemoryStorage::new());
        let store = ArtifactStore::new(storage.clone(), 3);

        let spec = store.save(&card()).await.unwrap();
        assert_eq!(spec.save_path, "OPSML_DATA_REGISTRY/ml/iris/v1.0.0");
        assert_eq!(spec.backend, StorageBackend::Memory);
        assert!(
            storage
                .exists("OPSML_DATA_REGISTRY/ml/iris/v1.0.0/card.json")
                .await
                .unwrap()
        );

        let artifacts = store.load_artifacts(&spec.save_path).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].file_name, "data/iris.csv");
        assert_eq!(artifacts[0].data, b"1,2,3");
    }

    #[tokio::test]
    async fn test_stage_and_publish() {
        let storage = Arc::new(MemoryStorage::new());
        let store = ArtifactStore::new(storage.clone(), 3);
        let mut card = card();
        card.uid = Some("uid-1".to_string());

        let staged = store.stage(&card).await.unwrap();
        assert_eq!(staged, "OPSML_DATA_REGISTRY/.staging/uid-1");
        assert!(!storage.exists("OPSML_DATA_REGISTRY/ml/iris/v1.0.0").await.unwrap());

        // Leftovers in the version directory are replaced
        storage
            .write("OPSML_DATA_REGISTRY/ml/iris/v1.0.0/stale.bin", b"old".to_vec())
            .await
            .unwrap();

        let spec = store.publish(&staged, &card).await.unwrap();
        assert_eq!(spec.save_path, "OPSML_DATA_REGISTRY/ml/iris/v1.0.0");
        assert!(!storage.exists(&staged).await.unwrap());
        assert_eq!(
            storage.keys(),
            vec![
                "OPSML_DATA_REGISTRY/ml/iris/v1.0.0/card.json".to_string(),
                "OPSML_DATA_REGISTRY/ml/iris/v1.0.0/data/iris.csv".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_stage_is_removed() {
        let flaky = Arc::new(FlakyStorage {
            inner: MemoryStorage::new(),
            failures: AtomicU32::new(0),
            poisoned: Some("iris.csv"),
        });
        let store = ArtifactStore::new(flaky.clone(), 2);
        let mut card = card();
        card.uid = Some("uid-1".to_string());

        // card.json lands, the artifact never does
        assert!(matches!(
            store.stage(&card).await,
            Err(RegistryError::Storage(StorageError::Backend(_)))
        ));
        assert!(flaky.inner.is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = ArtifactStore::new(Arc::new(MemoryStorage::new()), 3);
        let spec = store.save(&card()).await.unwrap();

        store.delete(&spec.save_path).await.unwrap();
        store.delete(&spec.save_path).await.unwrap();
        assert!(store.load_artifacts(&spec.save_path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unversioned_card_has_no_path() {
        let store = ArtifactStore::new(Arc::new(MemoryStorage::new()), 3);
        let card = Card::new(CardKind::data(), "iris", "ml", "alice").unwrap();
        assert!(matches!(
            store.save(&card).await,
            Err(RegistryError::Validation(_))
        ));
    }

    /// Fails the first `failures` writes with a transient error, and every
    /// write to a path ending in `poisoned`
    struct FlakyStorage {
        inner: MemoryStorage,
        failures: AtomicU32,
        poisoned: Option<&'static str>,
    }

    #[async_trait]
    impl StorageClient for FlakyStorage {
        fn backend(&self) -> StorageBackend {
            StorageBackend::Memory
        }
        async fn write(&self, path: &str, data: Vec<u8>) -> std::result::Result<(), StorageError> {
            if self.poisoned.is_some_and(|suffix| path.ends_with(suffix)) {
                return Err(StorageError::Backend("poisoned".into()));
            }
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StorageError::Backend("flaky".into()));
            }
            self.inner.write(path, data).await
        }
        async fn read(&self, path: &str) -> std::result::Result<Vec<u8>, StorageError> {
            self.inner.read(path).await
        }
        async fn exists(&self, path: &str) -> std::result::Result<bool, StorageError> {
            self.inner.exists(path).await
        }
        async fn ls(&self, path: &str) -> std::result::Result<Vec<String>, StorageError> {
            self.inner.ls(path).await
        }
        async fn find(&self, path: &str) -> std::result::Result<Vec<String>, StorageError> {
            self.inner.find(path).await
        }
        async fn copy(&self, src: &str, dst: &str) -> std::result::Result<(), StorageError> {
            self.inner.copy(src, dst).await
        }
        async fn rm(&self, path: &str) -> std::result::Result<(), StorageError> {
            self.inner.rm(path).await
        }
    }

    #[tokio::test]
    async fn test_transient_write_failures_are_retried() {
        let flaky = Arc::new(FlakyStorage {
            inner: MemoryStorage::new(),
            failures: AtomicU32::new(2),
            poisoned: None,
        });
        let store = ArtifactStore::new(flaky.clone(), 3);
        store.save(&card()).await.unwrap();
        assert_eq!(flaky.inner.len(), 2);

        let exhausted = Arc::new(FlakyStorage {
            inner: MemoryStorage::new(),
            failures: AtomicU32::new(5),
            poisoned: None,
        });
        let store = ArtifactStore::new(exhausted, 3);
        assert!(matches!(
            store.save(&card()).await,
            Err(RegistryError::Storage(StorageError::Backend(_)))
        ));
    }
}
