//! User-facing registries
//!
//! [`CardRegistries`] holds one [`CardRegistry`] per card type and is built
//! once from a [`RegistryConfig`]. The configuration alone decides whether
//! the tables talk to SQLite or to a remote registry.

use opsml::{Card, CardRecord, RegistryType, VersionType};
use std::sync::Arc;
use tracing::info;

use crate::artifacts::ArtifactStore;
use crate::config::RegistryConfig;
use crate::error::Result;
use crate::http::HttpClient;
use crate::lifecycle::{CardLifecycle, RegisterOptions};
use crate::storage::{StorageClient, storage_client};
use crate::table::{CardQuery, ClientRegistry, RegistryTable, ServerRegistry, connect_sqlite};

/// Registry for one card type
#[derive(Clone)]
pub struct CardRegistry {
    lifecycle: CardLifecycle,
}

impl CardRegistry {
    pub fn new(lifecycle: CardLifecycle) -> Self {
        Self { lifecycle }
    }

    pub fn registry_type(&self) -> RegistryType {
        self.lifecycle.registry_type()
    }

    pub fn table(&self) -> &Arc<dyn RegistryTable> {
        self.lifecycle.table()
    }

    /// Register a card, incrementing its version by `version_type`
    ///
    /// A card that already carries a uid is left untouched.
    pub async fn register_card(&self, card: &mut Card, version_type: VersionType) -> Result<()> {
        self.register_card_with(card, &RegisterOptions::new(version_type))
            .await
    }

    /// Register a card with custom pre-release/build tags
    pub async fn register_card_with(
        &self,
        card: &mut Card,
        options: &RegisterOptions,
    ) -> Result<()> {
        if let Some(uid) = &card.uid {
            info!(
                "{} {} is already registered as {}; skipping",
                card.card_type_name(),
                card.name,
                uid
            );
            return Ok(());
        }
        self.lifecycle.register_card(card, options).await
    }

    pub async fn update_card(&self, card: &Card) -> Result<()> {
        self.lifecycle.update_card(card).await
    }

    pub async fn delete_card(&self, uid: &str) -> Result<()> {
        self.lifecycle.delete_card(uid).await
    }

    pub async fn list_cards(&self, query: &CardQuery) -> Result<Vec<CardRecord>> {
        self.lifecycle.list_cards(query).await
    }

    pub async fn load_card(&self, query: &CardQuery, load_artifacts: bool) -> Result<Card> {
        self.lifecycle.load_card(query, load_artifacts).await
    }
}

/// One registry per card type
#[derive(Clone)]
pub struct CardRegistries {
    pub data: CardRegistry,
    pub model: CardRegistry,
    pub run: CardRegistry,
    pub pipeline: CardRegistry,
    pub project: CardRegistry,
    pub audit: CardRegistry,
    storage: Arc<dyn StorageClient>,
}

impl CardRegistries {
    /// Build every registry from configuration
    pub async fn connect(config: &RegistryConfig) -> Result<Self> {
        if config.is_client_mode() {
            let http = Arc::new(HttpClient::new(
                &config.tracking_uri,
                config.request_retries,
                config.request_timeout_secs,
            )?);
            let storage = storage_client(config, Some(http.clone())).await?;

            info!("Using remote registry at {}", config.tracking_uri);
            return Ok(Self::from_tables(config, storage, |registry_type| -> Arc<dyn RegistryTable> {
                Arc::new(ClientRegistry::new(http.clone(), registry_type))
            }));
        }

        let pool = connect_sqlite(&config.tracking_uri).await?;
        let storage = storage_client(config, None).await?;

        info!("Using local registry at {}", config.tracking_uri);
        Ok(Self::from_tables(config, storage, |registry_type| -> Arc<dyn RegistryTable> {
            Arc::new(ServerRegistry::new(pool.clone(), registry_type))
        }))
    }

    /// Assemble registries from a table constructor and a storage client
    pub fn from_tables<F>(config: &RegistryConfig, storage: Arc<dyn StorageClient>, table: F) -> Self
    where
        F: Fn(RegistryType) -> Arc<dyn RegistryTable>,
    {
        let registry = |registry_type: RegistryType| {
            CardRegistry::new(CardLifecycle::new(
                table(registry_type),
                ArtifactStore::new(storage.clone(), config.storage_write_retries),
                &config.app_env,
                config.version_conflict_retries,
            ))
        };

        Self {
            data: registry(RegistryType::Data),
            model: registry(RegistryType::Model),
            run: registry(RegistryType::Run),
            pipeline: registry(RegistryType::Pipeline),
            project: registry(RegistryType::Project),
            audit: registry(RegistryType::Audit),
            storage,
        }
    }

    pub fn get(&self, registry_type: RegistryType) -> &CardRegistry {
        match registry_type {
            RegistryType::Data => &self.data,
            RegistryType::Model => &self.model,
            RegistryType::Run => &self.run,
            RegistryType::Pipeline => &self.pipeline,
            RegistryType::Project => &self.project,
            RegistryType::Audit => &self.audit,
        }
    }

    pub fn storage(&self) -> &Arc<dyn StorageClient> {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsml::CardKind;

    #[tokio::test]
    async fn test_connect_local_and_route_by_type() {
        let dir = tempfile::tempdir().unwrap();
        let config = RegistryConfig::local(
            format!("sqlite:{}", dir.path().join("opsml.db").display()),
            "memory://",
        );
        let registries = CardRegistries::connect(&config).await.unwrap();

        for registry_type in RegistryType::ALL {
            assert_eq!(registries.get(registry_type).registry_type(), registry_type);
        }

        let mut card = Card::new(CardKind::run(), "train", "ml", "alice").unwrap();
        registries
            .run
            .register_card(&mut card, VersionType::Minor)
            .await
            .unwrap();
        assert_eq!(card.version.as_deref(), Some("1.0.0"));
        assert!(
            registries
                .storage()
                .exists("OPSML_RUN_REGISTRY/ml/train/v1.0.0/card.json")
                .await
                .unwrap()
        );
    }
}
