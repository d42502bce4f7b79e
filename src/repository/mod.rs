//! Repository layer for database persistence.

#![allow(dead_code)]

pub mod diesel_context;
pub mod diesel_models;
pub mod pool;
pub mod util;

mod change_summary;
mod config_history;
mod diff_result;
mod drawing_version;
mod job;
mod job_stage;
mod manual_overlay;
mod page_result;
mod page_task;
mod project;

pub use change_summary::ChangeSummaryRepository;
pub use config_history::ConfigHistoryRepository;
pub use diesel_context::DieselDbContext;
pub use diff_result::DiffResultRepository;
pub use drawing_version::DrawingVersionRepository;
pub use job::JobRepository;
pub use job_stage::JobStageRepository;
pub use manual_overlay::ManualOverlayRepository;
pub use page_result::PageResultRepository;
pub use page_task::PageTaskRepository;
pub use project::ProjectRepository;

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

fn is_lock_error(e: &diesel::result::Error) -> bool {
    let msg = e.to_string();
    msg.contains("database is locked") || msg.contains("SQLITE_BUSY") || msg.contains("SQLITE_LOCKED")
}

/// Run an async database operation, retrying on SQLite lock contention.
///
/// Retries up to 5 times with exponential backoff (100ms, 200ms, 400ms, 800ms, 1600ms).
/// Any other error is returned immediately.
pub async fn with_retry<T, Fut, F>(mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_retries = 5;
    let mut delay_ms = 100u64;

    for attempt in 0..max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(RepositoryError::Database(e)) if is_lock_error(&e) && attempt < max_retries - 1 => {
                tracing::debug!(
                    "database locked, retrying in {}ms (attempt {}/{})",
                    delay_ms,
                    attempt + 1,
                    max_retries
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    operation().await
}
