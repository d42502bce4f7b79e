//! JobStage: a logical stage within a Job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the four logical phases of a Job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    OcrOld,
    OcrNew,
    Diff,
    Summary,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::OcrOld,
        StageKind::OcrNew,
        StageKind::Diff,
        StageKind::Summary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OcrOld => "ocr_old",
            Self::OcrNew => "ocr_new",
            Self::Diff => "diff",
            Self::Summary => "summary",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ocr_old" => Some(Self::OcrOld),
            "ocr_new" => Some(Self::OcrNew),
            "diff" => Some(Self::Diff),
            "summary" => Some(Self::Summary),
            _ => None,
        }
    }
}

/// Status of a [`JobStage`].
///
/// Transitions are total: once a stage reaches a terminal status it never
/// re-enters `Running`, even if a late completion arrives for one of its
/// tasks (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    PartiallyCompleted,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::PartiallyCompleted => "partially_completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "partially_completed" => Some(Self::PartiallyCompleted),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartiallyCompleted | Self::Failed | Self::Skipped
        )
    }
}

/// A logical stage within a Job: `ocr_old`, `ocr_new`, `diff`, or `summary`.
///
/// Terminal when `completed_count + failed_count + skipped_count = expected_count` (I1/I2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStage {
    pub id: String,
    pub job_id: String,
    pub kind: StageKind,
    pub status: StageStatus,
    pub expected_count: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub skipped_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobStage {
    pub fn new(id: String, job_id: String, kind: StageKind) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_id,
            kind,
            status: StageStatus::Pending,
            expected_count: 0,
            completed_count: 0,
            failed_count: 0,
            skipped_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// `completed_count + failed_count + skipped_count = expected_count` (P1).
    pub fn is_quiescent(&self) -> bool {
        self.completed_count + self.failed_count + self.skipped_count >= self.expected_count
    }

    /// The terminal status this stage should transition to once quiescent,
    /// per the state machine in spec §4.1.
    pub fn terminal_status(&self) -> StageStatus {
        if self.expected_count == 0 {
            return StageStatus::Skipped;
        }
        if self.failed_count == self.expected_count {
            StageStatus::Failed
        } else if self.failed_count == 0 {
            StageStatus::Completed
        } else {
            StageStatus::PartiallyCompleted
        }
    }
}
