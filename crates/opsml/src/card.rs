//! Artifact cards
//!
//! A [`Card`] is a versioned metadata record for a dataset, model, run,
//! pipeline, project or audit. The card-type specific associations live in
//! [`CardKind`]; the domain payload is opaque JSON and the large in-memory
//! artifacts are carried as [`CardArtifact`] blobs that never reach the
//! relational record.

use crate::error::{CardError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Maximum length of `{repository}/{name}`
pub const MAX_NAME_REPOSITORY_LEN: usize = 53;

/// File name reserved for the serialized card snapshot
pub const CARD_FILE_NAME: &str = "card.json";

/// The registry (and relational table) a card belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryType {
    Data,
    Model,
    Run,
    Pipeline,
    Project,
    Audit,
}

impl RegistryType {
    pub const ALL: [RegistryType; 6] = [
        RegistryType::Data,
        RegistryType::Model,
        RegistryType::Run,
        RegistryType::Pipeline,
        RegistryType::Project,
        RegistryType::Audit,
    ];

    /// Table name, also the first segment of every artifact path
    pub fn table_name(&self) -> &'static str {
        match self {
            RegistryType::Data => "OPSML_DATA_REGISTRY",
            RegistryType::Model => "OPSML_MODEL_REGISTRY",
            RegistryType::Run => "OPSML_RUN_REGISTRY",
            RegistryType::Pipeline => "OPSML_PIPELINE_REGISTRY",
            RegistryType::Project => "OPSML_PROJECT_REGISTRY",
            RegistryType::Audit => "OPSML_AUDIT_REGISTRY",
        }
    }

    /// Name of the card type this registry accepts
    pub fn card_type_name(&self) -> &'static str {
        match self {
            RegistryType::Data => "DataCard",
            RegistryType::Model => "ModelCard",
            RegistryType::Run => "RunCard",
            RegistryType::Pipeline => "PipelineCard",
            RegistryType::Project => "ProjectCard",
            RegistryType::Audit => "AuditCard",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryType::Data => "data",
            RegistryType::Model => "model",
            RegistryType::Run => "run",
            RegistryType::Pipeline => "pipeline",
            RegistryType::Project => "project",
            RegistryType::Audit => "audit",
        }
    }
}

impl fmt::Display for RegistryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistryType {
    type Err = CardError;

    fn from_str(s: &str) -> Result<Self> {
        RegistryType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.to_lowercase())
            .ok_or_else(|| CardError::validation(format!("Unknown registry type: {s}")))
    }
}

/// Card-type specific fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "card_type", rename_all = "snake_case")]
pub enum CardKind {
    Data {
        #[serde(default)]
        runcard_uid: Option<String>,
        #[serde(default)]
        pipelinecard_uid: Option<String>,
    },
    Model {
        /// Required at registration, must reference a registered DataCard
        #[serde(default)]
        datacard_uid: Option<String>,
        #[serde(default)]
        runcard_uid: Option<String>,
        #[serde(default)]
        pipelinecard_uid: Option<String>,
    },
    Run {
        #[serde(default)]
        project: Option<String>,
        #[serde(default)]
        datacard_uids: Vec<String>,
        #[serde(default)]
        modelcard_uids: Vec<String>,
        #[serde(default)]
        pipelinecard_uid: Option<String>,
    },
    Pipeline {
        #[serde(default)]
        pipeline_code_uri: Option<String>,
        #[serde(default)]
        datacard_uids: Vec<String>,
        #[serde(default)]
        modelcard_uids: Vec<String>,
        #[serde(default)]
        runcard_uids: Vec<String>,
    },
    Project {
        #[serde(default)]
        project_id: Option<i64>,
    },
    Audit {
        #[serde(default)]
        approved: bool,
        #[serde(default)]
        datacard_uids: Vec<String>,
        #[serde(default)]
        modelcard_uids: Vec<String>,
        #[serde(default)]
        runcard_uids: Vec<String>,
    },
}

impl CardKind {
    pub fn data() -> Self {
        CardKind::Data {
            runcard_uid: None,
            pipelinecard_uid: None,
        }
    }

    pub fn model(datacard_uid: Option<String>) -> Self {
        CardKind::Model {
            datacard_uid,
            runcard_uid: None,
            pipelinecard_uid: None,
        }
    }

    pub fn run() -> Self {
        CardKind::Run {
            project: None,
            datacard_uids: Vec::new(),
            modelcard_uids: Vec::new(),
            pipelinecard_uid: None,
        }
    }

    pub fn pipeline() -> Self {
        CardKind::Pipeline {
            pipeline_code_uri: None,
            datacard_uids: Vec::new(),
            modelcard_uids: Vec::new(),
            runcard_uids: Vec::new(),
        }
    }

    pub fn project() -> Self {
        CardKind::Project { project_id: None }
    }

    pub fn audit() -> Self {
        CardKind::Audit {
            approved: false,
            datacard_uids: Vec::new(),
            modelcard_uids: Vec::new(),
            runcard_uids: Vec::new(),
        }
    }

    /// The registry this kind of card is stored in
    pub fn registry_type(&self) -> RegistryType {
        match self {
            CardKind::Data { .. } => RegistryType::Data,
            CardKind::Model { .. } => RegistryType::Model,
            CardKind::Run { .. } => RegistryType::Run,
            CardKind::Pipeline { .. } => RegistryType::Pipeline,
            CardKind::Project { .. } => RegistryType::Project,
            CardKind::Audit { .. } => RegistryType::Audit,
        }
    }

    pub fn card_type_name(&self) -> &'static str {
        self.registry_type().card_type_name()
    }
}

/// An in-memory artifact persisted next to the card
#[derive(Debug, Clone, PartialEq)]
pub struct CardArtifact {
    /// Path relative to the card's version directory
    pub file_name: String,
    pub data: Vec<u8>,
}

impl CardArtifact {
    pub fn new(file_name: impl Into<String>, data: impl Into<Vec<u8>>) -> Result<Self> {
        let file_name = file_name.into();
        validate_artifact_name(&file_name)?;
        Ok(Self {
            file_name,
            data: data.into(),
        })
    }
}

/// A versioned metadata record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub name: String,
    pub repository: String,
    pub contact: String,

    /// Assigned by the registry, or supplied up front as a full/partial version
    pub version: Option<String>,

    /// Assigned exactly once at first successful registration
    pub uid: Option<String>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    pub kind: CardKind,

    /// Opaque domain payload
    #[serde(default)]
    pub metadata: serde_json::Value,

    #[serde(skip)]
    pub artifacts: Vec<CardArtifact>,
}

impl Card {
    /// Create a new unregistered card
    ///
    /// `name` and `repository` are normalized (lowercased, `_` -> `-`) and
    /// validated.
    pub fn new(
        kind: CardKind,
        name: impl AsRef<str>,
        repository: impl AsRef<str>,
        contact: impl Into<String>,
    ) -> Result<Self> {
        let name = normalize_identifier(name.as_ref());
        let repository = normalize_identifier(repository.as_ref());
        validate_name_repository(&name, &repository)?;

        Ok(Self {
            name,
            repository,
            contact: contact.into(),
            version: None,
            uid: None,
            tags: BTreeMap::new(),
            kind,
            metadata: serde_json::Value::Null,
            artifacts: Vec::new(),
        })
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_artifact(mut self, artifact: CardArtifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn registry_type(&self) -> RegistryType {
        self.kind.registry_type()
    }

    pub fn card_type_name(&self) -> &'static str {
        self.kind.card_type_name()
    }

    pub fn is_registered(&self) -> bool {
        self.uid.is_some()
    }

    /// Storage path of this card's artifacts, once it has a version
    pub fn storage_path(&self) -> Option<String> {
        self.version.as_deref().map(|version| {
            artifact_path(self.registry_type(), &self.repository, &self.name, version)
        })
    }
}

/// `{table}/{repository}/{name}/v{version}`
pub fn artifact_path(
    registry_type: RegistryType,
    repository: &str,
    name: &str,
    version: &str,
) -> String {
    format!(
        "{}/{}/{}/v{}",
        registry_type.table_name(),
        repository,
        name,
        version
    )
}

/// Lowercase and replace underscores with dashes
pub fn normalize_identifier(value: &str) -> String {
    value.trim().to_lowercase().replace('_', "-")
}

/// Validate a normalized `name` and `repository` pair
///
/// Both are lowercase alphanumerics and dashes; the repository must start
/// with an alphanumeric, and `{repository}/{name}` is bounded in length.
pub fn validate_name_repository(name: &str, repository: &str) -> Result<()> {
    let allowed = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-';

    if repository.is_empty() || !repository.chars().all(allowed) {
        return Err(CardError::validation(format!(
            "Repository {repository:?} can only contain lowercase letters, digits and dashes"
        )));
    }

    if repository.starts_with('-') {
        return Err(CardError::validation(format!(
            "Repository {repository:?} must start with a letter or digit"
        )));
    }

    if name.is_empty() || !name.chars().all(allowed) {
        return Err(CardError::validation(format!(
            "Name {name:?} can only contain lowercase letters, digits and dashes"
        )));
    }

    let combined = repository.len() + 1 + name.len();
    if combined > MAX_NAME_REPOSITORY_LEN {
        return Err(CardError::validation(format!(
            "{repository}/{name} must be {MAX_NAME_REPOSITORY_LEN} characters or less"
        )));
    }

    Ok(())
}

fn validate_artifact_name(file_name: &str) -> Result<()> {
    if file_name.is_empty() || file_name.starts_with('/') || file_name.ends_with('/') {
        return Err(CardError::validation(format!(
            "Invalid artifact file name {file_name:?}"
        )));
    }

    if file_name.split('/').any(|segment| segment == ".." || segment.is_empty()) {
        return Err(CardError::validation(format!(
            "Artifact file name {file_name:?} must be a relative path without '..'"
        )));
    }

    if file_name == CARD_FILE_NAME {
        return Err(CardError::validation(format!(
            "{CARD_FILE_NAME} is reserved for the card snapshot"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_normalizes_identifiers() {
        let card = Card::new(CardKind::data(), "Iris_Data", "ML_Team", "alice").unwrap();
        assert_eq!(card.name, "iris-data");
        assert_eq!(card.repository, "ml-team");
        assert_eq!(card.registry_type(), RegistryType::Data);
        assert!(!card.is_registered());
    }

    #[test]
    fn test_card_rejects_invalid_identifiers() {
        assert!(Card::new(CardKind::data(), "iris data", "ml", "alice").is_err());
        assert!(Card::new(CardKind::data(), "iris", "", "alice").is_err());
        assert!(Card::new(CardKind::data(), "iris", "-ml", "alice").is_err());
        assert!(Card::new(CardKind::data(), "x".repeat(60), "ml", "alice").is_err());
    }

    #[test]
    fn test_storage_path_layout() {
        let card = Card::new(CardKind::model(None), "iris", "ml", "alice")
            .unwrap()
            .with_version("1.2.0");
        assert_eq!(
            card.storage_path().as_deref(),
            Some("OPSML_MODEL_REGISTRY/ml/iris/v1.2.0")
        );
    }

    #[test]
    fn test_registry_type_round_trip_names() {
        for registry_type in RegistryType::ALL {
            let parsed: RegistryType = registry_type.as_str().parse().unwrap();
            assert_eq!(parsed, registry_type);
            assert!(registry_type.table_name().starts_with("OPSML_"));
        }
        assert!("unknown".parse::<RegistryType>().is_err());
    }

    #[test]
    fn test_kind_serializes_with_card_type_tag() {
        let kind = CardKind::model(Some("abc".to_string()));
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["card_type"], "model");
        assert_eq!(value["datacard_uid"], "abc");
    }

    #[test]
    fn test_artifact_names() {
        assert!(CardArtifact::new("model/weights.bin", vec![1, 2]).is_ok());
        assert!(CardArtifact::new("../escape", vec![]).is_err());
        assert!(CardArtifact::new("/abs", vec![]).is_err());
        assert!(CardArtifact::new(CARD_FILE_NAME, vec![]).is_err());
    }
}
