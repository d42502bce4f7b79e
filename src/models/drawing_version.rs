//! DrawingVersion: one uploaded PDF with N pages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One uploaded PDF, immutable once created.
///
/// `page_count` is recorded at upload time by the out-of-scope ingestion
/// layer (PDF parsing itself is not this core's concern, per spec §1); the
/// Orchestrator only reads it to know how many OCR PageTasks to create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawingVersion {
    pub id: String,
    pub project_id: String,
    pub storage_ref: String,
    pub page_count: i32,
    pub created_at: DateTime<Utc>,
}

impl DrawingVersion {
    pub fn new(id: String, project_id: String, storage_ref: String, page_count: i32) -> Self {
        Self {
            id,
            project_id,
            storage_ref,
            page_count,
            created_at: Utc::now(),
        }
    }
}
