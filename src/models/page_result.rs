//! PageResult: per-page OCR output, keyed by (drawing_version_id, page_index).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-page OCR output.
///
/// Write-once: produced by exactly one OCR worker completion, keyed by
/// `(drawing_version_id, page_index)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    pub id: String,
    pub job_id: String,
    pub drawing_version_id: String,
    pub page_index: i32,
    pub image_ref: String,
    /// The detected sheet identifier (e.g. "A-101"); `None` if the extractor
    /// found nothing with sufficient confidence. Absence is not an error.
    pub drawing_name: Option<String>,
    pub extracted_metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
