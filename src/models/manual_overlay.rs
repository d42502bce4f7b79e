//! ManualOverlay: a user-supplied override overlay attached to a DiffResult.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user-supplied override overlay for a DiffResult.
///
/// Presence triggers a new Summary task for that pair (spec §3/§6). Modeled
/// as a real table even though the spec's own UI for uploading one is out
/// of scope, since `regenerate_summary` (§6) requires it to exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualOverlay {
    pub id: String,
    pub diff_result_id: String,
    pub overlay_ref: String,
    pub uploaded_by: String,
    pub created_at: DateTime<Utc>,
}
