//! opsml core types: versioned artifact cards, their flat registry records
//! and the semantic version rules the registry enforces.

pub mod card;
pub mod error;
pub mod record;
pub mod version;

// Re-export core types
pub use card::{
    CARD_FILE_NAME, Card, CardArtifact, CardKind, RegistryType, artifact_path,
    normalize_identifier, validate_name_repository,
};
pub use error::{CardError, Result, VersionError};
pub use record::{CardRecord, end_of_day_timestamp};
pub use version::{
    CardVersion, DEFAULT_BUILD_TAG, DEFAULT_PRE_TAG, RangeSymbol, VersionQuery, VersionType,
};

/// Get the library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
