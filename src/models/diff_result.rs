//! DiffResult: per-matched-page output, keyed by (job, drawing_name).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Output of aligning and overlaying one matched pair of pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffResult {
    pub id: String,
    pub job_id: String,
    pub drawing_name: String,
    pub old_image_ref: String,
    pub new_image_ref: String,
    pub overlay_ref: String,
    /// Dimensionless alignment quality metric, monotonically higher-is-better.
    pub alignment_score: f64,
    pub change_detected: bool,
    /// Coarse heuristic change count; independent of `ChangeSummary::total_changes` (spec §9).
    pub change_count: Option<i64>,
    pub created_at: DateTime<Utc>,
}
