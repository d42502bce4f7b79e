//! ChangeSummary: per-DiffResult structured change description.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a change was added, modified, or removed between baseline and revised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "added" => Some(Self::Added),
            "modified" => Some(Self::Modified),
            "removed" => Some(Self::Removed),
            _ => None,
        }
    }
}

/// One typed change item within a [`ChangeSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeItem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub change_type: ChangeType,
    pub location: Option<String>,
    pub impact: Option<String>,
    pub trade: Option<String>,
}

/// Where a ChangeSummary came from: the model, or a human correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarySource {
    Machine,
    HumanCorrected,
}

impl SummarySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Machine => "machine",
            Self::HumanCorrected => "human_corrected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "machine" => Some(Self::Machine),
            "human_corrected" => Some(Self::HumanCorrected),
            _ => None,
        }
    }
}

/// Structured natural-language description of the changes on one DiffResult.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub id: String,
    pub diff_result_id: String,
    pub overall_summary: String,
    pub changes: Vec<ChangeItem>,
    pub critical_change: Option<String>,
    pub recommendations: Option<String>,
    /// Derived from the LLM output; independent of `DiffResult::change_count` (spec §9).
    pub total_changes: i32,
    pub free_text: String,
    pub model_tag: String,
    pub source: SummarySource,
    pub created_at: DateTime<Utc>,
}
