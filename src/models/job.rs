//! Job: a comparison between two DrawingVersions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    PartiallyFailed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::PartiallyFailed => "partially_failed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "partially_failed" => Some(Self::PartiallyFailed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether this status is terminal (no further transitions expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyFailed | Self::Failed)
    }
}

/// A comparison between two DrawingVersions (`old`, `new`).
///
/// Created by the API; mutated exclusively by the Orchestrator; never
/// deleted while any child row exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub project_id: String,
    pub old_version_id: String,
    pub new_version_id: String,
    pub created_by: String,
    pub status: JobStatus,
    /// Drawing names present on exactly one side, surfaced per spec §4.3/§6
    /// without failing the job.
    pub unmatched_old_names: Vec<String>,
    pub unmatched_new_names: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        id: String,
        project_id: String,
        old_version_id: String,
        new_version_id: String,
        created_by: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            project_id,
            old_version_id,
            new_version_id,
            created_by,
            status: JobStatus::Queued,
            unmatched_old_names: Vec::new(),
            unmatched_new_names: Vec::new(),
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }
}
