//! # opsml registry
//!
//! Card registry and versioning engine:
//! - Semantic versioning of cards with partial versions and `^`/`~`/`*` range queries
//! - One registry table per card type, backed by SQLite or a remote registry over HTTP
//! - Artifact persistence to local, S3, in-memory or remote storage
//! - Registration as a saga: artifacts first, then the record, with cleanup on failure
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use opsml::{Card, CardKind, VersionType};
//! use opsml_registry::{CardQuery, CardRegistries, RegistryConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RegistryConfig::local("sqlite:./opsml.db", "./opsml_artifacts");
//! let registries = CardRegistries::connect(&config).await?;
//!
//! let mut card = Card::new(CardKind::data(), "iris", "ml", "alice@company.com")?;
//! registries.data.register_card(&mut card, VersionType::Minor).await?;
//! println!("Registered iris v{:?} as {:?}", card.version, card.uid);
//!
//! let latest = registries
//!     .data
//!     .load_card(&CardQuery::new().name("iris").version("^1"), false)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod registry;
pub mod storage;
pub mod table;
pub mod versioning;

pub use artifacts::{ArtifactStore, StorageSpec};
pub use config::RegistryConfig;
pub use error::{ApiErrorBody, ErrorKind, RegistryError, Result, StorageError};
pub use http::HttpClient;
pub use lifecycle::{CardLifecycle, RegisterOptions};
pub use registry::{CardRegistries, CardRegistry};
pub use storage::{StorageBackend, StorageClient, storage_client};
pub use table::{
    CardQuery, ClientRegistry, RegistryTable, ServerRegistry, VersionRequest, connect_sqlite,
};
pub use versioning::SemVerRegistryValidator;
