//! Closed error taxonomy reported on completion events and persisted on PageTask rows.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A closed set of error kinds a worker may report on a completion event.
///
/// This is deliberately not a generic `anyhow`/`thiserror` error chain: the
/// orchestrator and the downstream API need to reason about error *kind*
/// (retryable vs. terminal), not about an arbitrary message string.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// PDF page could not be decoded. Retryable up to the attempt cap.
    #[error("rasterization_error")]
    RasterizationError,
    /// OCR provider timeout or 5xx. Retryable with backoff.
    #[error("extractor_unavailable")]
    ExtractorUnavailable,
    /// Too few features or a degenerate transform. Terminal for that page.
    #[error("alignment_failed")]
    AlignmentFailed,
    /// Object storage write failure. Retryable.
    #[error("overlay_io_error")]
    OverlayIoError,
    /// External LLM throttling. Retryable with backoff; does not count against the attempt cap.
    #[error("llm_rate_limited")]
    LlmRateLimited,
    /// Content-policy or safety refusal. Terminal.
    #[error("llm_refused")]
    LlmRefused,
    /// LLM response failed schema validation after a re-prompt. Terminal.
    #[error("schema_parse_error")]
    SchemaParseError,
    /// Required upstream output absent. Terminal; indicates an orchestrator bug.
    #[error("precondition_missing")]
    PreconditionMissing,
    /// The job was cancelled before this task could run.
    #[error("cancelled")]
    Cancelled,
}

impl TaskErrorKind {
    /// Whether a failure of this kind should be retried (subject to the
    /// attempt cap, except `LlmRateLimited` which retries without counting
    /// against it, per spec §7).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskErrorKind::RasterizationError
                | TaskErrorKind::ExtractorUnavailable
                | TaskErrorKind::OverlayIoError
                | TaskErrorKind::LlmRateLimited
        )
    }

    /// Whether this error kind counts against the bounded attempt cap.
    /// `LlmRateLimited` is retryable but exempt from the cap (§7).
    pub fn counts_against_attempt_cap(&self) -> bool {
        self.is_retryable() && !matches!(self, TaskErrorKind::LlmRateLimited)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskErrorKind::RasterizationError => "rasterization_error",
            TaskErrorKind::ExtractorUnavailable => "extractor_unavailable",
            TaskErrorKind::AlignmentFailed => "alignment_failed",
            TaskErrorKind::OverlayIoError => "overlay_io_error",
            TaskErrorKind::LlmRateLimited => "llm_rate_limited",
            TaskErrorKind::LlmRefused => "llm_refused",
            TaskErrorKind::SchemaParseError => "schema_parse_error",
            TaskErrorKind::PreconditionMissing => "precondition_missing",
            TaskErrorKind::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "rasterization_error" => Some(TaskErrorKind::RasterizationError),
            "extractor_unavailable" => Some(TaskErrorKind::ExtractorUnavailable),
            "alignment_failed" => Some(TaskErrorKind::AlignmentFailed),
            "overlay_io_error" => Some(TaskErrorKind::OverlayIoError),
            "llm_rate_limited" => Some(TaskErrorKind::LlmRateLimited),
            "llm_refused" => Some(TaskErrorKind::LlmRefused),
            "schema_parse_error" => Some(TaskErrorKind::SchemaParseError),
            "precondition_missing" => Some(TaskErrorKind::PreconditionMissing),
            "cancelled" => Some(TaskErrorKind::Cancelled),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_match_spec() {
        assert!(TaskErrorKind::RasterizationError.is_retryable());
        assert!(TaskErrorKind::ExtractorUnavailable.is_retryable());
        assert!(TaskErrorKind::OverlayIoError.is_retryable());
        assert!(TaskErrorKind::LlmRateLimited.is_retryable());
        assert!(!TaskErrorKind::AlignmentFailed.is_retryable());
        assert!(!TaskErrorKind::LlmRefused.is_retryable());
        assert!(!TaskErrorKind::SchemaParseError.is_retryable());
        assert!(!TaskErrorKind::PreconditionMissing.is_retryable());
        assert!(!TaskErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn rate_limited_is_exempt_from_attempt_cap() {
        assert!(!TaskErrorKind::LlmRateLimited.counts_against_attempt_cap());
        assert!(TaskErrorKind::RasterizationError.counts_against_attempt_cap());
    }

    #[test]
    fn round_trips_through_str() {
        for kind in [
            TaskErrorKind::RasterizationError,
            TaskErrorKind::ExtractorUnavailable,
            TaskErrorKind::AlignmentFailed,
            TaskErrorKind::OverlayIoError,
            TaskErrorKind::LlmRateLimited,
            TaskErrorKind::LlmRefused,
            TaskErrorKind::SchemaParseError,
            TaskErrorKind::PreconditionMissing,
            TaskErrorKind::Cancelled,
        ] {
            assert_eq!(TaskErrorKind::from_str(kind.as_str()), Some(kind));
        }
    }
}
