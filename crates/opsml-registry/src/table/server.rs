//! SQLite-backed registry tables
//!
//! One table per registry type, all in the same database. The
//! `UNIQUE (name, repository, version)` constraint is what makes concurrent
//! registrations safe: the loser of a race gets `VersionConflict` and the
//! lifecycle recomputes its version.

use async_trait::async_trait;
use opsml::version::{compare_versions, is_release_candidate};
use opsml::{CardRecord, RegistryType, VersionQuery, end_of_day_timestamp};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::{CardQuery, RegistryTable, VersionRequest};
use crate::error::{RegistryError, Result};
use crate::versioning::SemVerRegistryValidator;

const COLUMNS: &str =
    "uid, app_env, date, timestamp, name, repository, contact, version, tags, uri, kind, metadata";

/// Open (creating if missing) the registry database and its tables
pub async fn connect_sqlite(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| RegistryError::database("Invalid database url", e))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePool::connect_with(options)
        .await
        .map_err(|e| RegistryError::database("Failed to connect to SQLite", e))?;

    init_schema(&pool).await?;
    debug!("Connected to registry database {}", database_url);
    Ok(pool)
}

async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for registry_type in RegistryType::ALL {
        let table = registry_type.table_name();

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                uid TEXT PRIMARY KEY,
                app_env TEXT NOT NULL,
                date TEXT NOT NULL,          -- YYYY-MM-DD
                timestamp INTEGER NOT NULL,  -- unix micros
                name TEXT NOT NULL,
                repository TEXT NOT NULL,
                contact TEXT NOT NULL,
                version TEXT NOT NULL,
                tags TEXT NOT NULL,          -- JSON object
                uri TEXT NOT NULL,
                kind TEXT NOT NULL,          -- JSON
                metadata TEXT NOT NULL,      -- JSON
                UNIQUE (name, repository, version)
            )
        "#
        ))
        .execute(pool)
        .await
        .map_err(|e| RegistryError::database(&format!("Failed to create {table}"), e))?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_name ON {table}(name, repository, timestamp)"
        ))
        .execute(pool)
        .await
        .map_err(|e| RegistryError::database(&format!("Failed to index {table}"), e))?;
    }

    Ok(())
}

/// Direct SQL registry table
#[derive(Debug, Clone)]
pub struct ServerRegistry {
    pool: SqlitePool,
    registry_type: RegistryType,
}

impl ServerRegistry {
    pub fn new(pool: SqlitePool, registry_type: RegistryType) -> Self {
        Self {
            pool,
            registry_type,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn table(&self) -> &'static str {
        self.registry_type.table_name()
    }

    /// Another repository already owns `name`
    async fn owning_repository(&self, name: &str, repository: &str) -> Result<Option<String>> {
        let row = sqlx::query(&format!(
            "SELECT repository FROM {} WHERE name = ? AND repository != ? LIMIT 1",
            self.table()
        ))
        .bind(name)
        .bind(repository)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RegistryError::database("Failed to check repository", e))?;

        row.map(|row| {
            row.try_get::<String, _>("repository")
                .map_err(|e| RegistryError::database("Failed to read repository", e))
        })
        .transpose()
    }

    async fn existing_versions(&self, name: &str, repository: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(&format!(
            "SELECT version FROM {} WHERE name = ? AND repository = ? ORDER BY timestamp DESC",
            self.table()
        ))
        .bind(name)
        .bind(repository)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RegistryError::database("Failed to fetch versions", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("version")
                    .map_err(|e| RegistryError::database("Failed to read version", e))
            })
            .collect()
    }

    fn map_write_error(&self, record: &CardRecord, error: sqlx::Error) -> RegistryError {
        if let sqlx::Error::Database(db) = &error {
            if db.is_unique_violation() {
                if db.message().contains(".uid") {
                    return RegistryError::validation(format!(
                        "Card uid {} already exists in {}",
                        record.uid,
                        self.table()
                    ));
                }
                return RegistryError::VersionConflict(format!(
                    "{}/{} version {} already exists",
                    record.repository, record.name, record.version
                ));
            }
        }
        RegistryError::database("Failed to write card record", error)
    }
}

fn record_from_row(row: &SqliteRow) -> Result<CardRecord> {
    let text = |column: &str| -> Result<String> {
        row.try_get::<String, _>(column)
            .map_err(|e| RegistryError::database(&format!("Failed to read {column}"), e))
    };

    Ok(CardRecord {
        uid: text("uid")?,
        app_env: text("app_env")?,
        date: text("date")?,
        timestamp: row
            .try_get::<i64, _>("timestamp")
            .map_err(|e| RegistryError::database("Failed to read timestamp", e))?,
        name: text("name")?,
        repository: text("repository")?,
        contact: text("contact")?,
        version: text("version")?,
        tags: serde_json::from_str(&text("tags")?)?,
        uri: text("uri")?,
        kind: serde_json::from_str(&text("kind")?)?,
        metadata: serde_json::from_str(&text("metadata")?)?,
    })
}

/// Post-query ordering and trimming shared by every listing
fn finish_listing(
    mut records: Vec<CardRecord>,
    query: &CardQuery,
    version_query: Option<&VersionQuery>,
) -> Vec<CardRecord> {
    // Stable: records with equal versions keep their timestamp order
    records.sort_by(|a, b| compare_versions(&b.version, &a.version));

    if let Some(version_query) = version_query {
        records.retain(|record| version_query.matches(&record.version));
    }

    if query.ignore_release_candidates {
        records.retain(|record| !record.semver().is_some_and(|v| is_release_candidate(&v)));
    }

    if version_query.is_some_and(VersionQuery::latest_only) {
        records.truncate(1);
    }

    if let Some(limit) = query.limit {
        records.truncate(limit);
    }

    records
}

#[async_trait]
impl RegistryTable for ServerRegistry {
    fn registry_type(&self) -> RegistryType {
        self.registry_type
    }

    async fn list_cards(&self, query: &CardQuery) -> Result<Vec<CardRecord>> {
        if let Some(uid) = &query.uid {
            let rows = sqlx::query(&format!(
                "SELECT {COLUMNS} FROM {} WHERE uid = ?",
                self.table()
            ))
            .bind(uid)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RegistryError::database("Failed to list cards", e))?;

            return rows.iter().map(record_from_row).collect();
        }

        let version_query = query
            .version
            .as_deref()
            .map(VersionQuery::parse)
            .transpose()?;

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM {} WHERE 1 = 1", self.table()));

        if let Some(name) = &query.name {
            builder.push(" AND name = ").push_bind(name.clone());
        }

        if let Some(repository) = &query.repository {
            builder.push(" AND repository = ").push_bind(repository.clone());
        }

        if let Some(prefix) = version_query.as_ref().and_then(VersionQuery::prefix) {
            builder
                .push(" AND (version = ")
                .push_bind(prefix.to_string())
                .push(" OR version LIKE ")
                .push_bind(format!("{prefix}.%"))
                .push(" OR version LIKE ")
                .push_bind(format!("{prefix}-%"))
                .push(" OR version LIKE ")
                .push_bind(format!("{prefix}+%"))
                .push(")");
        }

        for (key, value) in query.tags.iter().flatten() {
            builder
                .push(" AND json_extract(tags, ")
                .push_bind(format!("$.\"{key}\""))
                .push(") = ")
                .push_bind(value.clone());
        }

        if let Some(max_date) = &query.max_date {
            builder
                .push(" AND timestamp <= ")
                .push_bind(end_of_day_timestamp(max_date)?);
        }

        builder.push(" ORDER BY timestamp DESC");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RegistryError::database("Failed to list cards", e))?;

        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Listed {} records from {} for {:?}",
            records.len(),
            self.table(),
            query
        );

        Ok(finish_listing(records, query, version_query.as_ref()))
    }

    async fn check_uid(&self, uid: &str, registry_type: RegistryType) -> Result<bool> {
        let row = sqlx::query(&format!(
            "SELECT uid FROM {} WHERE uid = ?",
            registry_type.table_name()
        ))
        .bind(uid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RegistryError::database("Failed to check uid", e))?;

        Ok(row.is_some())
    }

    async fn set_version(&self, request: &VersionRequest) -> Result<String> {
        let validator = SemVerRegistryValidator::new(request)?;

        if let Some(repository) = self
            .owning_repository(&request.name, &request.repository)
            .await?
        {
            return Err(RegistryError::validation(format!(
                "{} {} already exists in repository {}; card names are unique across repositories",
                self.registry_type.card_type_name(),
                request.name,
                repository
            )));
        }

        let existing = self
            .existing_versions(&request.name, &request.repository)
            .await?;
        let version = validator.next_version(&existing)?;

        debug!(
            "Resolved {}/{} to version {} ({})",
            request.repository, request.name, version, request.version_type
        );
        Ok(version)
    }

    async fn add_and_commit(&self, record: &CardRecord) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RegistryError::database("Failed to begin transaction", e))?;

        sqlx::query(&format!(
            "INSERT INTO {} ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.table()
        ))
        .bind(&record.uid)
        .bind(&record.app_env)
        .bind(&record.date)
        .bind(record.timestamp)
        .bind(&record.name)
        .bind(&record.repository)
        .bind(&record.contact)
        .bind(&record.version)
        .bind(serde_json::to_string(&record.tags)?)
        .bind(&record.uri)
        .bind(serde_json::to_string(&record.kind)?)
        .bind(serde_json::to_string(&record.metadata)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| self.map_write_error(record, e))?;

        tx.commit()
            .await
            .map_err(|e| self.map_write_error(record, e))?;

        info!(
            "Registered {} {}/{} v{} ({})",
            self.registry_type.card_type_name(),
            record.repository,
            record.name,
            record.version,
            record.uid
        );
        Ok(())
    }

    async fn update_card_record(&self, record: &CardRecord) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RegistryError::database("Failed to begin transaction", e))?;

        let result = sqlx::query(&format!(
            r#"
            UPDATE {} SET
                app_env = ?, date = ?, timestamp = ?, name = ?, repository = ?, contact = ?,
                version = ?, tags = ?, uri = ?, kind = ?, metadata = ?
            WHERE uid = ?
        "#,
            self.table()
        ))
        .bind(&record.app_env)
        .bind(&record.date)
        .bind(record.timestamp)
        .bind(&record.name)
        .bind(&record.repository)
        .bind(&record.contact)
        .bind(&record.version)
        .bind(serde_json::to_string(&record.tags)?)
        .bind(&record.uri)
        .bind(serde_json::to_string(&record.kind)?)
        .bind(serde_json::to_string(&record.metadata)?)
        .bind(&record.uid)
        .execute(&mut *tx)
        .await
        .map_err(|e| self.map_write_error(record, e))?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::CardNotFound(record.uid.clone()));
        }

        tx.commit()
            .await
            .map_err(|e| self.map_write_error(record, e))?;

        info!("Updated {} {}", self.registry_type.card_type_name(), record.uid);
        Ok(())
    }

    async fn delete_card_record(&self, uid: &str) -> Result<()> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE uid = ?", self.table()))
            .bind(uid)
            .execute(&self.pool)
            .await
            .map_err(|e| RegistryError::database("Failed to delete card", e))?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::CardNotFound(uid.to_string()));
        }

        info!("Deleted {} {}", self.registry_type.card_type_name(), uid);
        Ok(())
    }
}
