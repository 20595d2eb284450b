//! Card lifecycle: validation, versioning, artifact persistence and commit
//!
//! Registration walks `Unregistered -> Versioning -> StoragePending ->
//! Committed`. Artifacts are staged under the card's uid, the record is
//! inserted, and only then are the artifacts copied into the version
//! directory. If the insert fails the staged files are removed on a
//! best-effort basis and the caller gets a [`RegistryError::PartialCommit`]
//! describing both outcomes. A version conflict only ever discards the
//! loser's own staged files.

use opsml::{
    Card, CardKind, CardRecord, RegistryType, VersionError, VersionQuery, VersionType,
    DEFAULT_BUILD_TAG, DEFAULT_PRE_TAG, normalize_identifier, validate_name_repository,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::artifacts::ArtifactStore;
use crate::error::{RegistryError, Result, StorageError};
use crate::table::{CardQuery, RegistryTable, VersionRequest};
use crate::versioning::SemVerRegistryValidator;

/// How the next version of a card is derived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOptions {
    pub version_type: VersionType,
    pub pre_tag: String,
    pub build_tag: String,
}

impl RegisterOptions {
    pub fn new(version_type: VersionType) -> Self {
        Self {
            version_type,
            ..Self::default()
        }
    }
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self {
            version_type: VersionType::default(),
            pre_tag: DEFAULT_PRE_TAG.to_string(),
            build_tag: DEFAULT_BUILD_TAG.to_string(),
        }
    }
}

/// Orchestrates card writes against one registry table
#[derive(Clone)]
pub struct CardLifecycle {
    table: Arc<dyn RegistryTable>,
    artifacts: ArtifactStore,
    app_env: String,
    conflict_retries: u32,
}

impl CardLifecycle {
    pub fn new(
        table: Arc<dyn RegistryTable>,
        artifacts: ArtifactStore,
        app_env: impl Into<String>,
        conflict_retries: u32,
    ) -> Self {
        Self {
            table,
            artifacts,
            app_env: app_env.into(),
            conflict_retries: conflict_retries.max(1),
        }
    }

    pub fn registry_type(&self) -> RegistryType {
        self.table.registry_type()
    }

    pub fn table(&self) -> &Arc<dyn RegistryTable> {
        &self.table
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    fn validate_card_type(&self, card: &Card) -> Result<()> {
        let expected = self.registry_type();
        if card.registry_type() != expected {
            return Err(RegistryError::validation(format!(
                "Card type {} is not supported by the {} registry (expected {})",
                card.card_type_name(),
                expected,
                expected.card_type_name()
            )));
        }
        Ok(())
    }

    /// Associations that must point at registered cards
    async fn validate_associations(&self, card: &Card) -> Result<()> {
        if let CardKind::Model { datacard_uid, .. } = &card.kind {
            let uid = datacard_uid.as_deref().ok_or_else(|| {
                RegistryError::validation("ModelCard must be associated with a DataCard uid")
            })?;

            if !self.table.check_uid(uid, RegistryType::Data).await? {
                return Err(RegistryError::validation(format!(
                    "ModelCard references DataCard {uid}, which is not registered"
                )));
            }
        }
        Ok(())
    }

    /// Names are unique across repositories
    async fn validate_repository(&self, card: &Card) -> Result<()> {
        let existing = self
            .table
            .list_cards(&CardQuery::new().name(&card.name).limit(1))
            .await?;

        if let Some(record) = existing
            .iter()
            .find(|record| record.repository != card.repository)
        {
            return Err(RegistryError::validation(format!(
                "{} {} already exists in repository {}; card names are unique across repositories",
                card.card_type_name(),
                card.name,
                record.repository
            )));
        }
        Ok(())
    }

    /// Register a new card
    ///
    /// On success `card.version` and `card.uid` are set. On failure the card
    /// is left as it was passed in.
    pub async fn register_card(&self, card: &mut Card, options: &RegisterOptions) -> Result<()> {
        self.validate_card_type(card)?;

        if card.uid.is_some() {
            return Err(RegistryError::validation(format!(
                "{} {} already has a uid; use update_card instead",
                card.card_type_name(),
                card.name
            )));
        }

        validate_name_repository(&card.name, &card.repository)?;
        self.validate_associations(card).await?;
        self.validate_repository(card).await?;

        let request = VersionRequest::new(&card.name, &card.repository)
            .with_version(card.version.clone())
            .with_version_type(options.version_type)
            .with_tags(&options.pre_tag, &options.build_tag);
        let pinned = SemVerRegistryValidator::new(&request)?.is_pinned();

        let supplied_version = card.version.clone();
        let uid = Uuid::new_v4().to_string();
        let mut attempt = 1;

        loop {
            let version = self.table.set_version(&request).await?;
            debug!(
                "Assigned {}/{} version {} (attempt {})",
                card.repository, card.name, version, attempt
            );

            card.version = Some(version.clone());
            card.uid = Some(uid.clone());

            let staged = match self.artifacts.stage(card).await {
                Ok(staged) => staged,
                Err(e) => {
                    card.version = supplied_version;
                    card.uid = None;
                    return Err(e);
                }
            };

            let committed = match CardRecord::from_card(card, &self.app_env) {
                Ok(record) => self.table.add_and_commit(&record).await,
                Err(e) => Err(e.into()),
            };

            let error = match committed {
                Ok(()) => match self.publish(&staged, card, &uid).await {
                    Ok(()) => {
                        info!(
                            "Registered {} {}/{} v{} ({})",
                            card.card_type_name(),
                            card.repository,
                            card.name,
                            version,
                            uid
                        );
                        return Ok(());
                    }
                    Err(e) => {
                        card.version = supplied_version;
                        card.uid = None;
                        return Err(e);
                    }
                },
                Err(e) => e,
            };

            card.version = supplied_version.clone();
            card.uid = None;

            if error.is_version_conflict() {
                // Staged files are ours alone; the version directory belongs to the winner
                self.artifacts.discard(&staged).await;
                if pinned {
                    return Err(RegistryError::Version(VersionError::DuplicateVersion {
                        name: card.name.clone(),
                        version,
                    }));
                }
                if attempt >= self.conflict_retries {
                    return Err(error);
                }
                warn!(
                    "Version {} of {}/{} was claimed concurrently; recomputing ({}/{})",
                    version, card.repository, card.name, attempt, self.conflict_retries
                );
                attempt += 1;
                continue;
            }

            let cleanup = self.remove_orphan(&staged).await;
            return Err(RegistryError::PartialCommit {
                path: staged,
                source: Box::new(error),
                cleanup,
            });
        }
    }

    /// Move committed artifacts into place, undoing the commit if that fails
    async fn publish(&self, staged: &str, card: &Card, uid: &str) -> Result<()> {
        let error = match self.artifacts.publish(staged, card).await {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };

        error!("Failed to publish artifacts for {}: {}", uid, error);
        if let Err(e) = self.table.delete_card_record(uid).await {
            error!("Failed to roll back record {}: {}", uid, e);
        }

        let path = card.storage_path().unwrap_or_default();
        let mut cleanup = self.remove_orphan(staged).await;
        if !path.is_empty() {
            cleanup = self.remove_orphan(&path).await.or(cleanup);
        }

        Err(RegistryError::PartialCommit {
            path,
            source: Box::new(error),
            cleanup,
        })
    }

    async fn remove_orphan(&self, path: &str) -> Option<StorageError> {
        match self.artifacts.delete(path).await {
            Ok(()) => {
                warn!("Removed orphaned artifacts at {}", path);
                None
            }
            Err(e) => {
                error!("Failed to remove orphaned artifacts at {}: {}", path, e);
                Some(e)
            }
        }
    }

    /// Overwrite a registered card's artifacts and record
    pub async fn update_card(&self, card: &Card) -> Result<()> {
        self.validate_card_type(card)?;

        let uid = card.uid.as_deref().ok_or_else(|| {
            RegistryError::validation(format!(
                "{} {} is not registered; register it first",
                card.card_type_name(),
                card.name
            ))
        })?;

        if !self.table.check_uid(uid, self.registry_type()).await? {
            return Err(RegistryError::CardNotFound(uid.to_string()));
        }

        self.artifacts.replace(card).await?;
        let record = CardRecord::from_card(card, &self.app_env)?;
        self.table.update_card_record(&record).await?;

        info!("Updated {} {} ({})", card.card_type_name(), card.name, uid);
        Ok(())
    }

    /// Delete a card's artifacts and record
    pub async fn delete_card(&self, uid: &str) -> Result<()> {
        let record = self
            .table
            .list_cards(&CardQuery::new().uid(uid))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RegistryError::CardNotFound(uid.to_string()))?;

        self.artifacts.delete(&record.uri).await?;
        self.table.delete_card_record(uid).await?;

        info!(
            "Deleted {} {}/{} v{} ({})",
            self.registry_type().card_type_name(),
            record.repository,
            record.name,
            record.version,
            uid
        );
        Ok(())
    }

    /// Records matching `query`, highest version first
    pub async fn list_cards(&self, query: &CardQuery) -> Result<Vec<CardRecord>> {
        if let Some(version) = &query.version {
            VersionQuery::parse(version)?;
        }

        let mut query = query.clone();
        query.name = query.name.as_deref().map(normalize_identifier);
        query.repository = query.repository.as_deref().map(normalize_identifier);

        self.table.list_cards(&query).await
    }

    /// Load the single best match for `query`
    pub async fn load_card(&self, query: &CardQuery, load_artifacts: bool) -> Result<Card> {
        let record = self
            .list_cards(&query.clone().limit(1))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RegistryError::CardNotFound(describe(query)))?;

        let mut card = record.to_card();
        if load_artifacts {
            card.artifacts = self.artifacts.load_artifacts(&record.uri).await?;
        }
        Ok(card)
    }
}

fn describe(query: &CardQuery) -> String {
    if let Some(uid) = &query.uid {
        return uid.clone();
    }
    let mut parts = Vec::new();
    if let Some(repository) = &query.repository {
        parts.push(repository.clone());
    }
    if let Some(name) = &query.name {
        parts.push(name.clone());
    }
    let mut description = parts.join("/");
    if let Some(version) = &query.version {
        description.push_str(&format!(" v{version}"));
    }
    description
}
