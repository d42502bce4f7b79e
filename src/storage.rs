//! Object storage path helpers (§6).
//!
//! Paths are deterministic: derived from IDs already known to the caller, not
//! content hashes, so retries of the same (drawing_version_id, page_index) or
//! (job_id, drawing_name) write to the same key. Overlay and summary writes
//! overwrite on retry; page rasters are write-once.

use std::path::{Path, PathBuf};

/// `drawings/{drawing_version_id}/raw.pdf`
pub fn raw_pdf_path(root: &Path, drawing_version_id: &str) -> PathBuf {
    root.join("drawings").join(drawing_version_id).join("raw.pdf")
}

/// `drawings/{drawing_version_id}/pages/{page_index}.png`
pub fn page_raster_path(root: &Path, drawing_version_id: &str, page_index: i32) -> PathBuf {
    root.join("drawings")
        .join(drawing_version_id)
        .join("pages")
        .join(format!("{page_index}.png"))
}

/// `jobs/{job_id}/overlays/{drawing_name}.png`
pub fn overlay_path(root: &Path, job_id: &str, drawing_name: &str) -> PathBuf {
    root.join("jobs")
        .join(job_id)
        .join("overlays")
        .join(format!("{}.png", sanitize_drawing_name(drawing_name)))
}

/// `jobs/{job_id}/summaries/{drawing_name}.json`
pub fn summary_path(root: &Path, job_id: &str, drawing_name: &str) -> PathBuf {
    root.join("jobs")
        .join(job_id)
        .join("summaries")
        .join(format!("{}.json", sanitize_drawing_name(drawing_name)))
}

/// Path a cancelled job's late-arriving worker output is discarded under,
/// instead of the live overlay/summary path (§4.1 `cancel_job`).
pub fn discarded_path(root: &Path, job_id: &str, page_task_id: &str) -> PathBuf {
    root.join("jobs")
        .join(job_id)
        .join("discarded")
        .join(page_task_id)
}

/// Drawing names come from OCR extraction, not a trusted filename — strip
/// path separators so a crafted title-block string can't escape the job's
/// storage prefix.
fn sanitize_drawing_name(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c == '\\' || c == '\0' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_pdf_path_is_deterministic() {
        let root = Path::new("/storage");
        assert_eq!(
            raw_pdf_path(root, "old-1"),
            PathBuf::from("/storage/drawings/old-1/raw.pdf")
        );
    }

    #[test]
    fn page_raster_path_keys_on_version_and_index() {
        let root = Path::new("/storage");
        assert_eq!(
            page_raster_path(root, "old-1", 3),
            PathBuf::from("/storage/drawings/old-1/pages/3.png")
        );
    }

    #[test]
    fn overlay_and_summary_paths_key_on_job_and_drawing_name() {
        let root = Path::new("/storage");
        assert_eq!(
            overlay_path(root, "job-1", "A-101"),
            PathBuf::from("/storage/jobs/job-1/overlays/A-101.png")
        );
        assert_eq!(
            summary_path(root, "job-1", "A-101"),
            PathBuf::from("/storage/jobs/job-1/summaries/A-101.json")
        );
    }

    #[test]
    fn sanitizes_path_separators_in_drawing_name() {
        let root = Path::new("/storage");
        assert_eq!(
            overlay_path(root, "job-1", "../../etc/passwd"),
            PathBuf::from("/storage/jobs/job-1/overlays/.._.._etc_passwd.png")
        );
    }
}
