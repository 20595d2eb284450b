//! Flat, storage-ready projection of a card

use crate::card::{Card, CardKind, RegistryType};
use crate::error::{CardError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::macros::format_description;
use time::{Date, OffsetDateTime, Time};

/// One row of a registry table
///
/// Built from a card at registration or update time. Everything except the
/// in-memory artifacts is carried over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardRecord {
    pub uid: String,
    pub app_env: String,
    /// `YYYY-MM-DD` of the write
    pub date: String,
    /// Unix timestamp in microseconds
    pub timestamp: i64,
    pub name: String,
    pub repository: String,
    pub contact: String,
    pub version: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Artifact path, `{table}/{repository}/{name}/v{version}`
    pub uri: String,
    pub kind: CardKind,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl CardRecord {
    /// Project a versioned, uid'd card into a record
    pub fn from_card(card: &Card, app_env: &str) -> Result<Self> {
        let uid = card
            .uid
            .clone()
            .ok_or_else(|| CardError::validation("Card has no uid; register it first"))?;
        let version = card
            .version
            .clone()
            .ok_or_else(|| CardError::validation("Card has no version; register it first"))?;
        let uri = card
            .storage_path()
            .ok_or_else(|| CardError::validation("Card has no storage path"))?;

        let now = OffsetDateTime::now_utc();

        Ok(Self {
            uid,
            app_env: app_env.to_string(),
            date: format_date(now.date()),
            timestamp: unix_micros(now),
            name: card.name.clone(),
            repository: card.repository.clone(),
            contact: card.contact.clone(),
            version,
            tags: card.tags.clone(),
            uri,
            kind: card.kind.clone(),
            metadata: card.metadata.clone(),
        })
    }

    /// Rebuild a card without artifacts
    pub fn to_card(&self) -> Card {
        Card {
            name: self.name.clone(),
            repository: self.repository.clone(),
            contact: self.contact.clone(),
            version: Some(self.version.clone()),
            uid: Some(self.uid.clone()),
            tags: self.tags.clone(),
            kind: self.kind.clone(),
            metadata: self.metadata.clone(),
            artifacts: Vec::new(),
        }
    }

    pub fn registry_type(&self) -> RegistryType {
        self.kind.registry_type()
    }

    pub fn semver(&self) -> Option<semver::Version> {
        semver::Version::parse(&self.version).ok()
    }
}

fn format_date(date: Date) -> String {
    let format = format_description!("[year]-[month]-[day]");
    date.format(&format)
        .unwrap_or_else(|_| date.to_string())
}

/// Unix timestamp in microseconds
pub fn unix_micros(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000) as i64
}

/// Last microsecond of a `YYYY-MM-DD` day (UTC), as a unix micros timestamp
pub fn end_of_day_timestamp(date: &str) -> Result<i64> {
    let format = format_description!("[year]-[month]-[day]");
    let day = Date::parse(date, &format)
        .map_err(|e| CardError::validation(format!("Invalid date {date:?}: {e}")))?;
    let end = Time::from_hms_micro(23, 59, 59, 999_999)
        .map_err(|e| CardError::validation(format!("Invalid time: {e}")))?;

    Ok(unix_micros(day.with_time(end).assume_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::CardKind;

    #[test]
    fn test_record_requires_registration() {
        let card = Card::new(CardKind::data(), "iris", "ml", "alice").unwrap();
        assert!(CardRecord::from_card(&card, "development").is_err());
    }

    #[test]
    fn test_record_round_trips_card_fields() {
        let mut card = Card::new(CardKind::data(), "iris", "ml", "alice")
            .unwrap()
            .with_version("1.0.0")
            .with_tag("stage", "dev")
            .with_metadata(serde_json::json!({"rows": 150}));
        card.uid = Some("uid-1".to_string());

        let record = CardRecord::from_card(&card, "staging").unwrap();
        assert_eq!(record.uri, "OPSML_DATA_REGISTRY/ml/iris/v1.0.0");
        assert_eq!(record.app_env, "staging");
        assert_eq!(record.date.len(), 10);

        let rebuilt = record.to_card();
        assert_eq!(rebuilt, card);
    }

    #[test]
    fn test_end_of_day_timestamp() {
        let ts = end_of_day_timestamp("1970-01-01").unwrap();
        assert_eq!(ts, 86_399_999_999);
        assert!(end_of_day_timestamp("01/01/1970").is_err());
    }
}
