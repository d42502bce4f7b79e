//! Diesel-based configuration history repository for SQLite/PostgreSQL.
//!
//! Every config snapshot is content-hashed (`sha2`) before being persisted,
//! so re-applying an unchanged configuration is a no-op.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_models::{ConfigHistoryRecord, NewConfigHistory};
use super::pool::DbPool;
use super::{parse_datetime, Result};
use crate::schema::configuration_history;
use crate::with_conn;

/// Maximum number of configuration history entries to retain.
const MAX_HISTORY_ENTRIES: i64 = 16;

/// A stored configuration snapshot.
#[derive(Debug, Clone)]
pub struct ConfigHistoryEntry {
    pub uuid: String,
    pub created_at: DateTime<Utc>,
    pub data: String,
    pub format: String,
    pub hash: String,
}

impl From<ConfigHistoryRecord> for ConfigHistoryEntry {
    fn from(record: ConfigHistoryRecord) -> Self {
        ConfigHistoryEntry {
            uuid: record.uuid,
            created_at: parse_datetime(&record.created_at),
            data: record.data,
            format: record.format,
            hash: record.hash,
        }
    }
}

/// Diesel-based repository for the `configuration_history` table.
#[derive(Clone)]
pub struct ConfigHistoryRepository {
    pool: DbPool,
}

impl ConfigHistoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Check if a config snapshot with the given hash already exists.
    pub async fn hash_exists(&self, hash: &str) -> Result<bool> {
        use diesel::dsl::count_star;

        let count: i64 = with_conn!(self.pool, conn => {
            configuration_history::table
                .filter(configuration_history::hash.eq(hash))
                .select(count_star())
                .first(&mut conn)
                .await?
        });

        Ok(count > 0)
    }

    /// Insert a new configuration snapshot if its hash isn't already stored.
    /// Returns `true` if inserted, `false` if the hash already exists.
    pub async fn insert_if_new(&self, uuid: &str, data: &str, format: &str, hash: &str) -> Result<bool> {
        if self.hash_exists(hash).await? {
            return Ok(false);
        }

        let now = Utc::now().to_rfc3339();
        let new_entry = NewConfigHistory {
            uuid,
            data,
            format,
            hash,
            created_at: &now,
        };

        with_conn!(self.pool, conn => {
            diesel::insert_into(configuration_history::table)
                .values(&new_entry)
                .execute(&mut conn)
                .await?;
        });

        self.prune_old_entries().await?;

        Ok(true)
    }

    /// Get the most recently stored configuration snapshot.
    pub async fn get_latest(&self) -> Result<Option<ConfigHistoryEntry>> {
        let record: Option<ConfigHistoryRecord> = with_conn!(self.pool, conn => {
            configuration_history::table
                .order(configuration_history::created_at.desc())
                .first::<ConfigHistoryRecord>(&mut conn)
                .await
                .optional()?
        });

        Ok(record.map(ConfigHistoryEntry::from))
    }

    /// Get every configuration snapshot, most recent first.
    pub async fn get_all(&self) -> Result<Vec<ConfigHistoryEntry>> {
        let records: Vec<ConfigHistoryRecord> = with_conn!(self.pool, conn => {
            configuration_history::table
                .order(configuration_history::created_at.desc())
                .load::<ConfigHistoryRecord>(&mut conn)
                .await?
        });

        Ok(records.into_iter().map(ConfigHistoryEntry::from).collect())
    }

    /// Keep only the most recent `MAX_HISTORY_ENTRIES` snapshots.
    async fn prune_old_entries(&self) -> Result<()> {
        let ids_to_keep: Vec<String> = with_conn!(self.pool, conn => {
            configuration_history::table
                .select(configuration_history::uuid)
                .order(configuration_history::created_at.desc())
                .limit(MAX_HISTORY_ENTRIES)
                .load(&mut conn)
                .await?
        });

        if !ids_to_keep.is_empty() {
            with_conn!(self.pool, conn => {
                diesel::delete(
                    configuration_history::table
                        .filter(configuration_history::uuid.ne_all(&ids_to_keep)),
                )
                .execute(&mut conn)
                .await?;
            });
        }

        Ok(())
    }
}
