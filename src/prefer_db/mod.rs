//! Database-backed configuration loader for BuildTrace.
//!
//! Loads the most recent `Settings` snapshot from the `configuration_history`
//! table, so an orchestrator restarted without a config file picks up the
//! configuration it last ran with.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use prefer::FromValue;
use prefer_db::{ConfigEntry, ConfigLoader, DbSource};

use crate::config::{FileConfig, Settings};
use crate::repository::pool::DbPool;
use crate::repository::ConfigHistoryRepository;

/// Loads `Settings` snapshots from the `configuration_history` table.
pub struct DbConfigLoader {
    db_path: PathBuf,
}

impl DbConfigLoader {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    /// Load the latest stored `Settings` snapshot, if any.
    pub async fn load_snapshot(&self) -> Option<Settings> {
        let source = DbSource::new(SelfLoader {
            db_path: self.db_path.clone(),
        });

        let config = prefer::Config::builder().add_source(source).build().await.ok()?;

        let file_config = FileConfig::from_value(config.data()).ok()?;
        Some(file_config.apply_to(Settings::default()))
    }
}

/// Internal `ConfigLoader` impl, kept separate so it doesn't need to borrow
/// from `DbConfigLoader` across the `prefer::Config` builder's async boundary.
struct SelfLoader {
    db_path: PathBuf,
}

#[async_trait]
impl ConfigLoader for SelfLoader {
    async fn load_config(&self) -> Option<ConfigEntry> {
        let pool = DbPool::sqlite_from_path(&self.db_path);
        let repo = ConfigHistoryRepository::new(pool);
        let entry = repo.get_latest().await.ok()??;

        Some(ConfigEntry {
            format: entry.format,
            data: entry.data,
        })
    }

    fn name(&self) -> &str {
        "buildtrace_db"
    }
}
