//! Integration tests for opsml-registry

use async_trait::async_trait;
use opsml::{Card, CardArtifact, CardKind, CardRecord, RegistryType, VersionError, VersionType};
use opsml_registry::storage::MemoryStorage;
use opsml_registry::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::{TempDir, tempdir};

async fn local_registries() -> (CardRegistries, TempDir) {
    let temp_dir = tempdir().unwrap();
    let config = RegistryConfig::local(
        format!("sqlite:{}/opsml.db", temp_dir.path().display()),
        temp_dir.path().join("artifacts").display().to_string(),
    );
    let registries = CardRegistries::connect(&config).await.unwrap();
    (registries, temp_dir)
}

fn data_card(name: &str, repository: &str) -> Card {
    Card::new(CardKind::data(), name, repository, "alice").unwrap()
}

fn versions(records: &[CardRecord]) -> Vec<&str> {
    records.iter().map(|r| r.version.as_str()).collect()
}

#[tokio::test]
async fn test_end_to_end_register_and_query() {
    let (registries, _dir) = local_registries().await;

    let mut first = data_card("iris", "ml");
    registries
        .data
        .register_card(&mut first, VersionType::Minor)
        .await
        .unwrap();
    assert_eq!(first.version.as_deref(), Some("1.0.0"));
    let u1 = first.uid.clone().unwrap();

    let mut second = data_card("iris", "ml");
    registries
        .data
        .register_card(&mut second, VersionType::Major)
        .await
        .unwrap();
    assert_eq!(second.version.as_deref(), Some("2.0.0"));
    let u2 = second.uid.clone().unwrap();
    assert_ne!(u1, u2);

    let records = registries
        .data
        .list_cards(&CardQuery::new().name("iris").version("^1"))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].version, "1.0.0");
    assert_eq!(records[0].uid, u1);
}

#[tokio::test]
async fn test_sequential_registrations_are_monotonic() {
    let (registries, _dir) = local_registries().await;

    let expected = [
        (VersionType::Minor, "1.0.0"),
        (VersionType::Minor, "1.1.0"),
        (VersionType::Patch, "1.1.1"),
        (VersionType::Minor, "1.2.0"),
        (VersionType::Major, "2.0.0"),
    ];

    for (version_type, version) in expected {
        let mut card = data_card("iris", "ml");
        registries
            .data
            .register_card(&mut card, version_type)
            .await
            .unwrap();
        assert_eq!(card.version.as_deref(), Some(version));
    }
}

#[tokio::test]
async fn test_partial_version_scopes_to_family() {
    let (registries, _dir) = local_registries().await;

    for version in ["1.9.0", "2.3.1"] {
        let mut card = data_card("iris", "ml").with_version(version);
        registries
            .data
            .register_card(&mut card, VersionType::Minor)
            .await
            .unwrap();
        assert_eq!(card.version.as_deref(), Some(version));
    }

    let mut card = data_card("iris", "ml").with_version("2");
    registries
        .data
        .register_card(&mut card, VersionType::Patch)
        .await
        .unwrap();
    assert_eq!(card.version.as_deref(), Some("2.3.2"));
}

#[tokio::test]
async fn test_supplied_version_collisions() {
    let (registries, _dir) = local_registries().await;

    let mut card = data_card("iris", "ml").with_version("1.0.0");
    registries
        .data
        .register_card(&mut card, VersionType::Minor)
        .await
        .unwrap();

    let mut duplicate = data_card("iris", "ml").with_version("1.0.0");
    let err = registries
        .data
        .register_card(&mut duplicate, VersionType::Minor)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Version(VersionError::DuplicateVersion { .. })
    ));
    assert!(duplicate.uid.is_none());

    let mut candidate = data_card("iris", "ml").with_version("1.0.0");
    let err = registries
        .data
        .register_card(&mut candidate, VersionType::Pre)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Version(VersionError::ReleaseCandidateOverRelease { .. })
    ));
}

#[tokio::test]
async fn test_release_candidates() {
    let (registries, _dir) = local_registries().await;

    let mut rc1 = data_card("iris", "ml").with_version("1.0.0");
    registries
        .data
        .register_card(&mut rc1, VersionType::Pre)
        .await
        .unwrap();
    assert_eq!(rc1.version.as_deref(), Some("1.0.0-rc.1"));

    let mut rc2 = data_card("iris", "ml").with_version("1.0.0");
    registries
        .data
        .register_card(&mut rc2, VersionType::Pre)
        .await
        .unwrap();
    assert_eq!(rc2.version.as_deref(), Some("1.0.0-rc.2"));

    // Release increments bump past a candidate rather than finalizing it
    let mut major = data_card("iris", "ml");
    registries
        .data
        .register_card(&mut major, VersionType::Major)
        .await
        .unwrap();
    assert_eq!(major.version.as_deref(), Some("2.0.0"));

    let mut release = data_card("iris", "ml").with_version("1.0.0");
    registries
        .data
        .register_card(&mut release, VersionType::Minor)
        .await
        .unwrap();
    assert_eq!(release.version.as_deref(), Some("1.0.0"));

    let releases = registries
        .data
        .list_cards(&CardQuery::new().name("iris").ignore_release_candidates())
        .await
        .unwrap();
    assert_eq!(versions(&releases), vec!["2.0.0", "1.0.0"]);
}

#[tokio::test]
async fn test_repository_collision_is_rejected() {
    let (registries, _dir) = local_registries().await;

    let mut card = data_card("x", "a");
    registries
        .data
        .register_card(&mut card, VersionType::Minor)
        .await
        .unwrap();

    let mut other = data_card("x", "b");
    let err = registries
        .data
        .register_card(&mut other, VersionType::Minor)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Validation(_)));
    assert!(other.version.is_none());
    assert!(other.uid.is_none());
}

#[tokio::test]
async fn test_model_card_requires_registered_datacard() {
    let (registries, _dir) = local_registries().await;

    let mut orphan = Card::new(CardKind::model(None), "clf", "ml", "alice").unwrap();
    let err = registries
        .model
        .register_card(&mut orphan, VersionType::Minor)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Validation(_)));

    let mut dangling =
        Card::new(CardKind::model(Some("missing".into())), "clf", "ml", "alice").unwrap();
    assert!(
        registries
            .model
            .register_card(&mut dangling, VersionType::Minor)
            .await
            .is_err()
    );

    let mut data = data_card("iris", "ml");
    registries
        .data
        .register_card(&mut data, VersionType::Minor)
        .await
        .unwrap();

    let mut model = Card::new(CardKind::model(data.uid.clone()), "clf", "ml", "alice").unwrap();
    registries
        .model
        .register_card(&mut model, VersionType::Minor)
        .await
        .unwrap();
    assert_eq!(model.version.as_deref(), Some("1.0.0"));
}

#[tokio::test]
async fn test_wrong_registry_type_is_rejected() {
    let (registries, _dir) = local_registries().await;

    let mut card = Card::new(CardKind::run(), "train", "ml", "alice").unwrap();
    let err = registries
        .data
        .register_card(&mut card, VersionType::Minor)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Validation(_)));
}

#[tokio::test]
async fn test_reregistration_is_a_no_op() {
    let (registries, _dir) = local_registries().await;

    let mut card = data_card("iris", "ml");
    registries
        .data
        .register_card(&mut card, VersionType::Minor)
        .await
        .unwrap();
    let (version, uid) = (card.version.clone(), card.uid.clone());

    registries
        .data
        .register_card(&mut card, VersionType::Major)
        .await
        .unwrap();
    assert_eq!(card.version, version);
    assert_eq!(card.uid, uid);

    let records = registries
        .data
        .list_cards(&CardQuery::new().name("iris"))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn test_update_load_and_delete() {
    let (registries, _dir) = local_registries().await;

    let mut card = data_card("iris", "ml")
        .with_tag("stage", "dev")
        .with_artifact(CardArtifact::new("data/iris.csv", b"1,2,3".to_vec()).unwrap());
    registries
        .data
        .register_card(&mut card, VersionType::Minor)
        .await
        .unwrap();

    let mut updated = card.clone().with_tag("stage", "prod");
    updated.artifacts = vec![CardArtifact::new("data/iris.parquet", b"PAR1".to_vec()).unwrap()];
    registries.data.update_card(&updated).await.unwrap();

    let loaded = registries
        .data
        .load_card(&CardQuery::new().name("Iris").repository("ML"), true)
        .await
        .unwrap();
    assert_eq!(loaded.uid, card.uid);
    assert_eq!(loaded.version.as_deref(), Some("1.0.0"));
    assert_eq!(loaded.tags.get("stage").map(String::as_str), Some("prod"));
    assert_eq!(loaded.artifacts.len(), 1);
    assert_eq!(loaded.artifacts[0].file_name, "data/iris.parquet");

    let uid = card.uid.clone().unwrap();
    registries.data.delete_card(&uid).await.unwrap();
    assert!(matches!(
        registries
            .data
            .load_card(&CardQuery::new().uid(&uid), false)
            .await,
        Err(RegistryError::CardNotFound(_))
    ));
    assert!(
        !registries
            .storage()
            .exists("OPSML_DATA_REGISTRY/ml/iris/v1.0.0")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_update_requires_registration() {
    let (registries, _dir) = local_registries().await;

    let card = data_card("iris", "ml").with_version("1.0.0");
    assert!(matches!(
        registries.data.update_card(&card).await,
        Err(RegistryError::Validation(_))
    ));

    let mut ghost = card.clone();
    ghost.uid = Some("ghost".to_string());
    assert!(matches!(
        registries.data.update_card(&ghost).await,
        Err(RegistryError::CardNotFound(_))
    ));
}

#[tokio::test]
async fn test_invalid_version_query_is_rejected() {
    let (registries, _dir) = local_registries().await;

    let err = registries
        .data
        .list_cards(&CardQuery::new().name("iris").version("^1.*"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Version(VersionError::InvalidQuery { .. })
    ));
}

#[tokio::test]
async fn test_concurrent_registrations_get_distinct_versions() {
    let temp_dir = tempdir().unwrap();
    let mut config = RegistryConfig::local(
        format!("sqlite:{}/opsml.db", temp_dir.path().display()),
        "memory://",
    );
    config.version_conflict_retries = 10;
    let registries = CardRegistries::connect(&config).await.unwrap();

    let mut seed = data_card("iris", "ml");
    registries
        .data
        .register_card(&mut seed, VersionType::Minor)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let registry = registries.data.clone();
        handles.push(tokio::spawn(async move {
            let mut card = data_card("iris", "ml");
            registry.register_card(&mut card, VersionType::Minor).await?;
            Ok::<_, RegistryError>(card.version.unwrap_or_default())
        }));
    }

    let mut assigned = Vec::new();
    for handle in handles {
        assigned.push(handle.await.unwrap().unwrap());
    }
    assigned.sort();
    assigned.dedup();
    assert_eq!(assigned.len(), 4);

    let records = registries
        .data
        .list_cards(&CardQuery::new().name("iris"))
        .await
        .unwrap();
    assert_eq!(records.len(), 5);
}

/// Delegates to a real table but can fail inserts or hand out a stale version
struct ScriptedTable {
    inner: ServerRegistry,
    fail_insert: bool,
    stale_version: AtomicBool,
}

#[async_trait]
impl RegistryTable for ScriptedTable {
    fn registry_type(&self) -> RegistryType {
        self.inner.registry_type()
    }

    async fn list_cards(&self, query: &CardQuery) -> Result<Vec<CardRecord>> {
        self.inner.list_cards(query).await
    }

    async fn check_uid(&self, uid: &str, registry_type: RegistryType) -> Result<bool> {
        self.inner.check_uid(uid, registry_type).await
    }

    async fn set_version(&self, request: &VersionRequest) -> Result<String> {
        if self.stale_version.swap(false, Ordering::SeqCst) {
            return Ok("1.0.0".to_string());
        }
        self.inner.set_version(request).await
    }

    async fn add_and_commit(&self, record: &CardRecord) -> Result<()> {
        if self.fail_insert {
            return Err(RegistryError::Database("disk I/O error".to_string()));
        }
        self.inner.add_and_commit(record).await
    }

    async fn update_card_record(&self, record: &CardRecord) -> Result<()> {
        self.inner.update_card_record(record).await
    }

    async fn delete_card_record(&self, uid: &str) -> Result<()> {
        self.inner.delete_card_record(uid).await
    }
}

async fn scripted(
    fail_insert: bool,
    stale_version: bool,
) -> (CardLifecycle, Arc<MemoryStorage>, ServerRegistry, TempDir) {
    let temp_dir = tempdir().unwrap();
    let pool = connect_sqlite(&format!("sqlite:{}/opsml.db", temp_dir.path().display()))
        .await
        .unwrap();
    let inner = ServerRegistry::new(pool, RegistryType::Data);
    let storage = Arc::new(MemoryStorage::new());

    let table = Arc::new(ScriptedTable {
        inner: inner.clone(),
        fail_insert,
        stale_version: AtomicBool::new(stale_version),
    });
    let lifecycle = CardLifecycle::new(
        table,
        ArtifactStore::new(storage.clone(), 3),
        "development",
        3,
    );
    (lifecycle, storage, inner, temp_dir)
}

#[tokio::test]
async fn test_failed_insert_cleans_up_artifacts() {
    let (lifecycle, storage, inner, _dir) = scripted(true, false).await;

    let mut card = data_card("iris", "ml")
        .with_artifact(CardArtifact::new("data/iris.csv", b"1,2,3".to_vec()).unwrap());
    let err = lifecycle
        .register_card(&mut card, &RegisterOptions::default())
        .await
        .unwrap_err();

    match err {
        RegistryError::PartialCommit {
            path,
            source,
            cleanup,
        } => {
            assert!(path.starts_with("OPSML_DATA_REGISTRY/.staging/"));
            assert!(matches!(*source, RegistryError::Database(_)));
            assert!(cleanup.is_none());
        }
        other => panic!("Expected PartialCommit, got {other:?}"),
    }

    assert!(storage.is_empty());
    assert!(card.uid.is_none());
    assert!(card.version.is_none());
    assert!(inner.list_cards(&CardQuery::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_version_conflict_is_retried() {
    let (lifecycle, storage, inner, _dir) = scripted(false, false).await;

    let mut first = data_card("iris", "ml")
        .with_artifact(CardArtifact::new("data.csv", b"WINNER".to_vec()).unwrap());
    lifecycle
        .register_card(&mut first, &RegisterOptions::default())
        .await
        .unwrap();
    assert_eq!(first.version.as_deref(), Some("1.0.0"));

    // A second writer on the same database and storage whose first version guess is stale
    let table = Arc::new(ScriptedTable {
        inner: inner.clone(),
        fail_insert: false,
        stale_version: AtomicBool::new(true),
    });
    let racing = CardLifecycle::new(
        table,
        ArtifactStore::new(storage.clone(), 3),
        "development",
        3,
    );

    let mut second = data_card("iris", "ml")
        .with_artifact(CardArtifact::new("data.csv", b"LOSER".to_vec()).unwrap());
    racing
        .register_card(&mut second, &RegisterOptions::default())
        .await
        .unwrap();
    assert_eq!(second.version.as_deref(), Some("1.1.0"));

    let records = inner.list_cards(&CardQuery::new().name("iris")).await.unwrap();
    assert_eq!(versions(&records), vec!["1.1.0", "1.0.0"]);

    // The winner's version directory is untouched by the losing attempt
    let winner = lifecycle
        .load_card(&CardQuery::new().name("iris").version("1.0.0"), true)
        .await
        .unwrap();
    assert_eq!(winner.uid, first.uid);
    assert_eq!(winner.artifacts.len(), 1);
    assert_eq!(winner.artifacts[0].data, b"WINNER".to_vec());

    let snapshot = storage
        .read("OPSML_DATA_REGISTRY/ml/iris/v1.0.0/card.json")
        .await
        .unwrap();
    let snapshot: Card = serde_json::from_slice(&snapshot).unwrap();
    assert_eq!(snapshot.uid, first.uid);

    let loser = racing
        .load_card(&CardQuery::new().name("iris").version("1.1.0"), true)
        .await
        .unwrap();
    assert_eq!(loser.artifacts[0].data, b"LOSER".to_vec());
    assert!(
        !storage
            .keys()
            .iter()
            .any(|key| key.contains(".staging"))
    );
}

/// Storage whose writes always fail
struct BrokenStorage {
    inner: MemoryStorage,
}

#[async_trait]
impl StorageClient for BrokenStorage {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Memory
    }
    async fn write(&self, _path: &str, _data: Vec<u8>) -> std::result::Result<(), StorageError> {
        Err(StorageError::Backend("bucket unavailable".into()))
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
async fn test_storage_failure_leaves_registry_uncommitted() {
    let temp_dir = tempdir().unwrap();
    let pool = connect_sqlite(&format!("sqlite:{}/opsml.db", temp_dir.path().display()))
        .await
        .unwrap();
    let inner = ServerRegistry::new(pool, RegistryType::Data);

    // Inserts would fail too, so reaching the table surfaces as PartialCommit
    let table = Arc::new(ScriptedTable {
        inner: inner.clone(),
        fail_insert: true,
        stale_version: AtomicBool::new(false),
    });
    let lifecycle = CardLifecycle::new(
        table,
        ArtifactStore::new(
            Arc::new(BrokenStorage {
                inner: MemoryStorage::new(),
            }),
            3,
        ),
        "development",
        3,
    );

    let mut card = data_card("iris", "ml")
        .with_version("2")
        .with_artifact(CardArtifact::new("data.csv", b"1,2".to_vec()).unwrap());
    let err = lifecycle
        .register_card(&mut card, &RegisterOptions::default())
        .await
        .unwrap_err();

    assert!(
        matches!(err, RegistryError::Storage(StorageError::Backend(_))),
        "Expected a storage failure, got {err:?}"
    );
    assert!(card.uid.is_none());
    assert_eq!(card.version.as_deref(), Some("2"));
    assert!(
        lifecycle
            .list_cards(&CardQuery::new().name("iris"))
            .await
            .unwrap()
            .is_empty()
    );
}
