//! Registry tables
//!
//! One [`RegistryTable`] per card type. [`ServerRegistry`] talks to SQLite
//! directly; [`ClientRegistry`] proxies every call to a remote registry over
//! HTTP. Both satisfy the same contract so the lifecycle code above them does
//! not care which one it holds.

use async_trait::async_trait;
use opsml::{CardRecord, DEFAULT_BUILD_TAG, DEFAULT_PRE_TAG, RegistryType, VersionType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

pub mod client;
pub mod server;

pub use client::ClientRegistry;
pub use server::{ServerRegistry, connect_sqlite};

/// Filters for listing cards
///
/// Every filter is optional; an empty query lists the whole table, newest
/// version first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardQuery {
    pub name: Option<String>,
    pub repository: Option<String>,
    /// Exact version, version family prefix, or `^`/`~`/`*` range
    pub version: Option<String>,
    pub uid: Option<String>,
    /// Every tag must match
    pub tags: Option<BTreeMap<String, String>>,
    /// `YYYY-MM-DD`; only cards written on or before that day
    pub max_date: Option<String>,
    pub limit: Option<usize>,
    pub ignore_release_candidates: bool,
}

impl CardQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn max_date(mut self, max_date: impl Into<String>) -> Self {
        self.max_date = Some(max_date.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn ignore_release_candidates(mut self) -> Self {
        self.ignore_release_candidates = true;
        self
    }
}

fn default_pre_tag() -> String {
    DEFAULT_PRE_TAG.to_string()
}

fn default_build_tag() -> String {
    DEFAULT_BUILD_TAG.to_string()
}

/// Arguments for computing the next version of a card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRequest {
    pub name: String,
    pub repository: String,
    /// Full or partial version supplied by the caller
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub version_type: VersionType,
    #[serde(default = "default_pre_tag")]
    pub pre_tag: String,
    #[serde(default = "default_build_tag")]
    pub build_tag: String,
}

impl VersionRequest {
    pub fn new(name: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repository: repository.into(),
            version: None,
            version_type: VersionType::default(),
            pre_tag: default_pre_tag(),
            build_tag: default_build_tag(),
        }
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    pub fn with_version_type(mut self, version_type: VersionType) -> Self {
        self.version_type = version_type;
        self
    }

    pub fn with_tags(mut self, pre_tag: impl Into<String>, build_tag: impl Into<String>) -> Self {
        self.pre_tag = pre_tag.into();
        self.build_tag = build_tag.into();
        self
    }
}

/// The persistence contract of one registry table
#[async_trait]
pub trait RegistryTable: Send + Sync {
    fn registry_type(&self) -> RegistryType;

    /// Records matching `query`, highest version first
    async fn list_cards(&self, query: &CardQuery) -> Result<Vec<CardRecord>>;

    /// Whether `uid` exists in the table for `registry_type`
    async fn check_uid(&self, uid: &str, registry_type: RegistryType) -> Result<bool>;

    /// Compute the next version for `request`
    async fn set_version(&self, request: &VersionRequest) -> Result<String>;

    /// Insert a new record
    ///
    /// Fails with `VersionConflict` when the (name, repository, version)
    /// tuple is already taken.
    async fn add_and_commit(&self, record: &CardRecord) -> Result<()>;

    /// Overwrite the record with the same uid
    async fn update_card_record(&self, record: &CardRecord) -> Result<()>;

    /// Delete the record with `uid`
    async fn delete_card_record(&self, uid: &str) -> Result<()>;
}
