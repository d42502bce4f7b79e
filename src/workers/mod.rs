//! Worker trait seams and progress events (§4.2, §4.4, §4.5).
//!
//! Each worker (`OcrWorker`, `DiffWorker`, `SummaryWorker`) is generic over a
//! small backend trait — `Rasterizer`, `DrawingNameExtractor`, `PageAligner`,
//! `ChangeSummarizer` — so the real rasterization/extraction/alignment/LLM
//! backends are swappable without touching the claim/write-result/publish
//! control flow. Tests use the deterministic fakes in this module instead of
//! a real PDF renderer or LLM.

pub mod diff;
pub mod ocr;
pub mod summary;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use thiserror::Error;

use crate::bus::BusError;
use crate::models::TaskErrorKind;
use crate::repository::RepositoryError;

pub use diff::DiffWorker;
pub use ocr::OcrWorker;
pub use summary::SummaryWorker;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

pub type Result<T, E = WorkerError> = std::result::Result<T, E>;

/// Storage key relative to the storage root, for the `*_ref` columns
/// written alongside the absolute path helpers in `storage.rs`.
pub(crate) fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Progress events emitted by a worker's batch `process` driver, mirroring
/// the teacher's `OcrEvent` progress-channel shape.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Started { page_task_id: String },
    Completed { page_task_id: String },
    Failed { page_task_id: String, error_kind: TaskErrorKind, message: String },
}

/// Rasterizes one page of a drawing version to an image. Implementations
/// are free to cache the decoded PDF; the worker calls this once per task.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, storage_ref: &str, page_index: i32, dpi: u32) -> Result<Vec<u8>, TaskErrorKind>;
}

/// Extracts a drawing's sheet identifier (e.g. "A-101") from a rasterized
/// page. `None` means no title block was found with sufficient confidence —
/// not an error (spec §4.2).
pub trait DrawingNameExtractor: Send + Sync {
    fn extract(&self, storage_ref: &str, page_index: i32, page_image: &[u8]) -> Option<String>;
}

/// Outcome of aligning and overlaying one matched pair of pages.
pub struct AlignmentOutcome {
    pub overlay_bytes: Vec<u8>,
    pub alignment_score: f64,
    pub change_detected: bool,
    pub change_count: Option<i64>,
}

/// Aligns two page images and produces a diff overlay.
pub trait PageAligner: Send + Sync {
    fn align(&self, old_image: &[u8], new_image: &[u8]) -> Result<AlignmentOutcome, TaskErrorKind>;
}

/// A drafted change, independent of the eventual `ChangeItem` id.
pub struct ChangeDraft {
    pub title: String,
    pub description: String,
    pub change_type: crate::models::ChangeType,
    pub location: Option<String>,
    pub impact: Option<String>,
    pub trade: Option<String>,
}

/// Narrative + structured output of summarizing one diff result.
pub struct SummaryDraft {
    pub overall_summary: String,
    pub changes: Vec<ChangeDraft>,
    pub critical_change: Option<String>,
    pub recommendations: Option<String>,
    pub free_text: String,
    pub model_tag: String,
}

/// Produces a structured change summary for one diff result.
pub trait ChangeSummarizer: Send + Sync {
    fn summarize(
        &self,
        drawing_name: &str,
        change_detected: bool,
        change_count: Option<i64>,
        alignment_score: f64,
    ) -> Result<SummaryDraft, TaskErrorKind>;
}

/// Deterministic rasterizer for tests: produces page bytes from
/// `storage_ref`/`page_index` alone, so the same task always rasterizes to
/// the same bytes.
pub struct DeterministicRasterizer;

impl Rasterizer for DeterministicRasterizer {
    fn rasterize(&self, storage_ref: &str, page_index: i32, dpi: u32) -> Result<Vec<u8>, TaskErrorKind> {
        Ok(format!("raster:{storage_ref}:{page_index}:{dpi}").into_bytes())
    }
}

/// Deterministic extractor for tests, backed by a fixed lookup table keyed
/// on `(storage_ref, page_index)`.
pub struct DeterministicNameExtractor {
    names: Mutex<HashMap<(String, i32), String>>,
}

impl DeterministicNameExtractor {
    pub fn new(names: HashMap<(String, i32), String>) -> Self {
        Self { names: Mutex::new(names) }
    }
}

impl DrawingNameExtractor for DeterministicNameExtractor {
    fn extract(&self, storage_ref: &str, page_index: i32, _page_image: &[u8]) -> Option<String> {
        self.names.lock().unwrap().get(&(storage_ref.to_string(), page_index)).cloned()
    }
}

/// Deterministic aligner for tests: two identical page images are
/// "unchanged"; anything else is reported as a single detected change.
pub struct DeterministicAligner;

impl PageAligner for DeterministicAligner {
    fn align(&self, old_image: &[u8], new_image: &[u8]) -> Result<AlignmentOutcome, TaskErrorKind> {
        let change_detected = old_image != new_image;
        Ok(AlignmentOutcome {
            overlay_bytes: [old_image, new_image].concat(),
            alignment_score: 0.95,
            change_detected,
            change_count: Some(if change_detected { 1 } else { 0 }),
        })
    }
}

/// Deterministic summarizer for tests: a fixed-shape summary describing
/// whether a change was detected, with no real LLM call.
pub struct DeterministicSummarizer;

impl ChangeSummarizer for DeterministicSummarizer {
    fn summarize(
        &self,
        drawing_name: &str,
        change_detected: bool,
        change_count: Option<i64>,
        alignment_score: f64,
    ) -> Result<SummaryDraft, TaskErrorKind> {
        if change_detected {
            Ok(SummaryDraft {
                overall_summary: format!("{drawing_name}: {} change(s) detected.", change_count.unwrap_or(0)),
                changes: vec![ChangeDraft {
                    title: format!("{drawing_name} revised"),
                    description: "Automated comparison detected a difference between versions.".into(),
                    change_type: crate::models::ChangeType::Modified,
                    location: None,
                    impact: None,
                    trade: None,
                }],
                critical_change: None,
                recommendations: None,
                free_text: format!("{drawing_name}: {} change(s) detected.", change_count.unwrap_or(0)),
                model_tag: "deterministic-fake".into(),
            })
        } else {
            Ok(SummaryDraft {
                overall_summary: format!("{drawing_name}: no changes detected (alignment {alignment_score:.2})."),
                changes: vec![],
                critical_change: None,
                recommendations: None,
                free_text: format!("{drawing_name}: no changes detected."),
                model_tag: "deterministic-fake".into(),
            })
        }
    }
}
