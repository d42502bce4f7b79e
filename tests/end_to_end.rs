//! End-to-end pipeline tests (spec §8): drives a Job through OCR → pairing →
//! Diff → Summary over a `LocalBus`, pumping each stage's tasks through the
//! real worker implementations rather than hand-constructing result rows.

use std::collections::HashMap;
use std::sync::Arc;

use buildtrace_core::bus::messages::{CompletionMessage, TaskMessage};
use buildtrace_core::bus::LocalBus;
use buildtrace_core::config::Settings;
use buildtrace_core::models::{DrawingVersion, Job, JobStatus, PageTask, Project, StageKind, StageStatus, TaskErrorKind};
use buildtrace_core::orchestrator::Orchestrator;
use buildtrace_core::repository::DieselDbContext;
use buildtrace_core::workers::{
    AlignmentOutcome, ChangeSummarizer, DeterministicNameExtractor, DeterministicRasterizer, DeterministicSummarizer,
    DiffWorker, OcrWorker, PageAligner, Result as WorkerResult, SummaryDraft, SummaryWorker,
};
use uuid::Uuid;

struct Harness {
    db: DieselDbContext,
    bus: Arc<LocalBus>,
    orchestrator: Orchestrator<LocalBus>,
    _dir: tempfile::TempDir,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = DieselDbContext::new(&dir.path().join("test.db"), &dir.path().join("storage"));
        db.init_schema().await.unwrap();
        let bus = Arc::new(LocalBus::default());
        let orchestrator = Orchestrator::new(db.clone(), bus.clone(), Settings::default());
        Self { db, bus, orchestrator, _dir: dir }
    }

    /// Seed a Project + two DrawingVersions and a queued Job comparing them.
    async fn seed_job(&self, old_page_count: i32, new_page_count: i32) -> Job {
        let project = Project::new(Uuid::new_v4().to_string(), "user-1".into(), "Tower A".into());
        self.db.projects().create(&project).await.unwrap();

        let old = DrawingVersion::new(Uuid::new_v4().to_string(), project.id.clone(), "drawings/old/raw.pdf".into(), old_page_count);
        let new = DrawingVersion::new(Uuid::new_v4().to_string(), project.id.clone(), "drawings/new/raw.pdf".into(), new_page_count);
        self.db.drawing_versions().create(&old).await.unwrap();
        self.db.drawing_versions().create(&new).await.unwrap();

        let job = Job::new(Uuid::new_v4().to_string(), project.id.clone(), old.id.clone(), new.id.clone(), "user-1".into());
        self.db.jobs().create(&job).await.unwrap();
        job
    }

    fn ocr_worker(&self, names: HashMap<(String, i32), String>) -> OcrWorker<LocalBus> {
        OcrWorker::new(
            self.db.clone(),
            self.bus.clone(),
            Settings::default(),
            Arc::new(DeterministicRasterizer),
            Arc::new(DeterministicNameExtractor::new(names)),
        )
    }

    fn diff_worker(&self, aligner: Arc<dyn PageAligner>) -> DiffWorker<LocalBus> {
        DiffWorker::new(self.db.clone(), self.bus.clone(), Settings::default(), aligner)
    }

    fn summary_worker(&self) -> SummaryWorker<LocalBus> {
        SummaryWorker::new(self.db.clone(), self.bus.clone(), Settings::default(), Arc::new(DeterministicSummarizer))
    }

    /// Drain every currently-queued OCR task through `worker`, feeding each
    /// resulting completion back into the Orchestrator.
    async fn pump_ocr(&self, worker: &OcrWorker<LocalBus>) {
        let mut tasks = self.bus.subscribe("tasks.ocr").await.unwrap();
        let mut completions = self.bus.subscribe(CompletionMessage::TOPIC).await.unwrap();

        while let Ok(delivery) = tokio::time::timeout(std::time::Duration::from_millis(20), tasks.recv()).await {
            let Some(delivery) = delivery else { break };
            let task: TaskMessage = serde_json::from_slice(&delivery.payload).unwrap();
            worker.process_one(&task).await.unwrap();
            delivery.ack.ack().await.unwrap();

            let completion_delivery = completions.recv().await.unwrap();
            let completion: CompletionMessage = serde_json::from_slice(&completion_delivery.payload).unwrap();
            self.orchestrator.on_completion(&completion).await.unwrap();
            completion_delivery.ack.ack().await.unwrap();
        }

        drop(tasks);
        drop(completions);
    }

    async fn pump_diff(&self, worker: &DiffWorker<LocalBus>) {
        let mut tasks = self.bus.subscribe("tasks.diff").await.unwrap();
        let mut completions = self.bus.subscribe(CompletionMessage::TOPIC).await.unwrap();

        while let Ok(delivery) = tokio::time::timeout(std::time::Duration::from_millis(20), tasks.recv()).await {
            let Some(delivery) = delivery else { break };
            let task: TaskMessage = serde_json::from_slice(&delivery.payload).unwrap();
            worker.process_one(&task).await.unwrap();
            delivery.ack.ack().await.unwrap();

            let completion_delivery = completions.recv().await.unwrap();
            let completion: CompletionMessage = serde_json::from_slice(&completion_delivery.payload).unwrap();
            self.orchestrator.on_completion(&completion).await.unwrap();
            completion_delivery.ack.ack().await.unwrap();
        }

        drop(tasks);
        drop(completions);
    }

    async fn pump_summary(&self, worker: &SummaryWorker<LocalBus>) {
        let mut tasks = self.bus.subscribe("tasks.summary").await.unwrap();
        let mut completions = self.bus.subscribe(CompletionMessage::TOPIC).await.unwrap();

        while let Ok(delivery) = tokio::time::timeout(std::time::Duration::from_millis(20), tasks.recv()).await {
            let Some(delivery) = delivery else { break };
            let task: TaskMessage = serde_json::from_slice(&delivery.payload).unwrap();
            worker.process_one(&task).await.unwrap();
            delivery.ack.ack().await.unwrap();

            let completion_delivery = completions.recv().await.unwrap();
            let completion: CompletionMessage = serde_json::from_slice(&completion_delivery.payload).unwrap();
            self.orchestrator.on_completion(&completion).await.unwrap();
            completion_delivery.ack.ack().await.unwrap();
        }

        drop(tasks);
        drop(completions);
    }
}

/// An aligner that always fails for a given drawing name, succeeds otherwise.
struct FailingAligner {
    fails_for: &'static str,
}

impl PageAligner for FailingAligner {
    fn align(&self, old_image: &[u8], new_image: &[u8]) -> WorkerResult<AlignmentOutcome, TaskErrorKind> {
        let old_str = String::from_utf8_lossy(old_image);
        if old_str.contains(self.fails_for) {
            return Err(TaskErrorKind::AlignmentFailed);
        }
        Ok(AlignmentOutcome {
            overlay_bytes: [old_image, new_image].concat(),
            alignment_score: 0.9,
            change_detected: old_image != new_image,
            change_count: Some(if old_image != new_image { 1 } else { 0 }),
        })
    }
}

/// A summarizer that errors for a given drawing name, to exercise the
/// backend-error → passthrough `TaskErrorKind` path.
struct RefusingSummarizer;

impl ChangeSummarizer for RefusingSummarizer {
    fn summarize(
        &self,
        _drawing_name: &str,
        _change_detected: bool,
        _change_count: Option<i64>,
        _alignment_score: f64,
    ) -> WorkerResult<SummaryDraft, TaskErrorKind> {
        Err(TaskErrorKind::LlmRefused)
    }
}

#[tokio::test]
async fn full_pipeline_completes_a_two_page_job() {
    let harness = Harness::new().await;
    let job = harness.seed_job(2, 2).await;

    let mut names = HashMap::new();
    names.insert(("drawings/old/raw.pdf".to_string(), 0), "A-101".to_string());
    names.insert(("drawings/old/raw.pdf".to_string(), 1), "A-102".to_string());
    names.insert(("drawings/new/raw.pdf".to_string(), 0), "A-101".to_string());
    names.insert(("drawings/new/raw.pdf".to_string(), 1), "A-102".to_string());

    harness.orchestrator.start_job(&job.id).await.unwrap();
    let ocr_worker = harness.ocr_worker(names);
    harness.pump_ocr(&ocr_worker).await;

    let diff_worker = harness.diff_worker(Arc::new(buildtrace_core::workers::DeterministicAligner));
    harness.pump_diff(&diff_worker).await;

    let summary_worker = harness.summary_worker();
    harness.pump_summary(&summary_worker).await;

    let job = harness.db.jobs().require(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    // P1: stage counters sum to expected_count at every terminal stage.
    let stages = harness.db.job_stages().list_for_job(&job.id).await.unwrap();
    for stage in &stages {
        assert_eq!(stage.status.is_terminal(), true);
        assert_eq!(stage.completed_count + stage.failed_count + stage.skipped_count, stage.expected_count);
    }

    // P2: two pages matched, two diffs, two summaries.
    let diffs = harness.db.diff_results().list_for_job(&job.id).await.unwrap();
    assert_eq!(diffs.len(), 2);
    for diff in &diffs {
        let summary = harness.db.change_summaries().get_latest_for_diff_result(&diff.id).await.unwrap();
        assert!(summary.is_some());
    }
}

#[tokio::test]
async fn diff_failure_on_one_page_still_completes_the_other_and_job_is_partially_failed() {
    let harness = Harness::new().await;
    let job = harness.seed_job(2, 2).await;

    let mut names = HashMap::new();
    names.insert(("drawings/old/raw.pdf".to_string(), 0), "BAD-SHEET".to_string());
    names.insert(("drawings/old/raw.pdf".to_string(), 1), "GOOD-SHEET".to_string());
    names.insert(("drawings/new/raw.pdf".to_string(), 0), "BAD-SHEET".to_string());
    names.insert(("drawings/new/raw.pdf".to_string(), 1), "GOOD-SHEET".to_string());

    harness.orchestrator.start_job(&job.id).await.unwrap();
    let ocr_worker = harness.ocr_worker(names);
    harness.pump_ocr(&ocr_worker).await;

    let diff_worker = harness.diff_worker(Arc::new(FailingAligner { fails_for: "BAD-SHEET" }));
    harness.pump_diff(&diff_worker).await;

    let summary_worker = harness.summary_worker();
    harness.pump_summary(&summary_worker).await;

    // P4: AlignmentFailed is terminal (not retryable), so the bad page never
    // reaches Summary while the good one completes normally.
    let job = harness.db.jobs().require(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::PartiallyFailed);

    let diffs = harness.db.diff_results().list_for_job(&job.id).await.unwrap();
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].drawing_name, "GOOD-SHEET");

    let diff_stage = harness.db.job_stages().require(&job.id, StageKind::Diff).await.unwrap();
    assert_eq!(diff_stage.failed_count, 1);
    assert_eq!(diff_stage.completed_count, 1);
}

#[tokio::test]
async fn duplicate_completion_delivery_is_idempotent() {
    let harness = Harness::new().await;
    let job = harness.seed_job(1, 1).await;

    let mut names = HashMap::new();
    names.insert(("drawings/old/raw.pdf".to_string(), 0), "A-101".to_string());
    names.insert(("drawings/new/raw.pdf".to_string(), 0), "A-101".to_string());

    harness.orchestrator.start_job(&job.id).await.unwrap();

    let mut tasks = harness.bus.subscribe("tasks.ocr").await.unwrap();
    let ocr_worker = harness.ocr_worker(names);

    let delivery = tasks.recv().await.unwrap();
    let task: TaskMessage = serde_json::from_slice(&delivery.payload).unwrap();
    ocr_worker.process_one(&task).await.unwrap();
    delivery.ack.ack().await.unwrap();

    let mut completions = harness.bus.subscribe(CompletionMessage::TOPIC).await.unwrap();
    let completion_delivery = completions.recv().await.unwrap();
    let completion: CompletionMessage = serde_json::from_slice(&completion_delivery.payload).unwrap();

    // P3: deliver the same completion twice.
    harness.orchestrator.on_completion(&completion).await.unwrap();
    harness.orchestrator.on_completion(&completion).await.unwrap();

    let stage = harness.db.job_stages().require(&job.id, StageKind::OcrOld).await.unwrap();
    assert_eq!(stage.completed_count, 1, "duplicate completion must not double-count");

    drop(tasks);
    drop(completions);
}

#[tokio::test]
async fn pairing_is_independent_of_ocr_completion_order() {
    let names_for = |prefix: &str| {
        let mut names = HashMap::new();
        names.insert((format!("drawings/{prefix}/raw.pdf"), 0), "A-101".to_string());
        names.insert((format!("drawings/{prefix}/raw.pdf"), 1), "A-102".to_string());
        names.insert((format!("drawings/{prefix}/raw.pdf"), 2), "A-103".to_string());
        names
    };

    // Run A: process OCR tasks in delivery order (old pages, then new pages).
    let harness_a = Harness::new().await;
    let job_a = harness_a.seed_job(3, 3).await;
    let mut names_a = names_for("old");
    names_a.extend(names_for("new"));
    harness_a.orchestrator.start_job(&job_a.id).await.unwrap();
    harness_a.pump_ocr(&harness_a.ocr_worker(names_a)).await;

    // Run B: process the exact same tasks but drain new-side pages first by
    // reading both queues and replaying new-page completions before old-page
    // ones — the resulting PageResult set is a permutation of run A's.
    let harness_b = Harness::new().await;
    let job_b = harness_b.seed_job(3, 3).await;
    let mut names_b = names_for("old");
    names_b.extend(names_for("new"));
    harness_b.orchestrator.start_job(&job_b.id).await.unwrap();

    let mut tasks = harness_b.bus.subscribe("tasks.ocr").await.unwrap();
    let mut completions = harness_b.bus.subscribe(CompletionMessage::TOPIC).await.unwrap();
    let worker = harness_b.ocr_worker(names_b);

    let mut deliveries = Vec::new();
    while let Ok(Some(delivery)) = tokio::time::timeout(std::time::Duration::from_millis(20), tasks.recv()).await {
        deliveries.push(delivery);
    }
    deliveries.reverse();
    for delivery in deliveries {
        let task: TaskMessage = serde_json::from_slice(&delivery.payload).unwrap();
        worker.process_one(&task).await.unwrap();
        delivery.ack.ack().await.unwrap();
        let completion_delivery = completions.recv().await.unwrap();
        let completion: CompletionMessage = serde_json::from_slice(&completion_delivery.payload).unwrap();
        harness_b.orchestrator.on_completion(&completion).await.unwrap();
        completion_delivery.ack.ack().await.unwrap();
    }
    drop(tasks);
    drop(completions);

    let mut diff_names_a: Vec<String> =
        harness_a.db.page_tasks().list_dispatchable(&job_a.id, StageKind::Diff).await.unwrap().into_iter()
            .filter_map(|t| t.drawing_name)
            .collect();
    let mut diff_names_b: Vec<String> =
        harness_b.db.page_tasks().list_dispatchable(&job_b.id, StageKind::Diff).await.unwrap().into_iter()
            .filter_map(|t| t.drawing_name)
            .collect();
    diff_names_a.sort();
    diff_names_b.sort();

    // P5: same matched set regardless of OCR completion order.
    assert_eq!(diff_names_a, diff_names_b);
    assert_eq!(diff_names_a, vec!["A-101", "A-102", "A-103"]);
}

#[tokio::test]
async fn regenerate_summary_appends_without_discarding_prior_history() {
    let harness = Harness::new().await;
    let job = harness.seed_job(1, 1).await;

    let mut names = HashMap::new();
    names.insert(("drawings/old/raw.pdf".to_string(), 0), "A-101".to_string());
    names.insert(("drawings/new/raw.pdf".to_string(), 0), "A-101".to_string());

    harness.orchestrator.start_job(&job.id).await.unwrap();
    harness.pump_ocr(&harness.ocr_worker(names)).await;
    harness.pump_diff(&harness.diff_worker(Arc::new(buildtrace_core::workers::DeterministicAligner))).await;
    harness.pump_summary(&harness.summary_worker()).await;

    let job_after_first_run = harness.db.jobs().require(&job.id).await.unwrap();
    assert_eq!(job_after_first_run.status, JobStatus::Completed);

    let diff = harness.db.diff_results().require_by_drawing(&job.id, "A-101").await.unwrap();
    harness.orchestrator.regenerate_summary(&diff.id).await.unwrap();
    harness.pump_summary(&harness.summary_worker()).await;

    let summaries = harness.db.change_summaries().list_for_diff_result(&diff.id).await.unwrap();
    assert_eq!(summaries.len(), 2, "regenerate must append, not overwrite, summary history");
}

#[tokio::test]
async fn cancel_job_prevents_late_completions_from_reopening_it() {
    let harness = Harness::new().await;
    let job = harness.seed_job(1, 1).await;

    harness.orchestrator.start_job(&job.id).await.unwrap();

    let mut tasks = harness.bus.subscribe("tasks.ocr").await.unwrap();
    let delivery = tasks.recv().await.unwrap();
    let task: TaskMessage = serde_json::from_slice(&delivery.payload).unwrap();

    harness.orchestrator.cancel_job(&job.id).await.unwrap();
    let job = harness.db.jobs().require(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);

    let task_row = harness.db.page_tasks().require(&task.page_task_id).await.unwrap();
    assert_eq!(task_row.status, buildtrace_core::models::TaskStatus::Cancelled);

    // A late worker completion for the cancelled task is discarded, not
    // reopening the job.
    let ocr_worker = harness.ocr_worker(HashMap::new());
    ocr_worker.process_one(&task).await.unwrap();
    delivery.ack.ack().await.unwrap();

    let mut completions = harness.bus.subscribe(CompletionMessage::TOPIC).await.unwrap();
    if let Ok(Some(completion_delivery)) =
        tokio::time::timeout(std::time::Duration::from_millis(50), completions.recv()).await
    {
        let completion: CompletionMessage = serde_json::from_slice(&completion_delivery.payload).unwrap();
        harness.orchestrator.on_completion(&completion).await.unwrap();
        completion_delivery.ack.ack().await.unwrap();
    }

    let job = harness.db.jobs().require(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);

    drop(tasks);
}

#[tokio::test]
async fn summary_backend_refusal_is_terminal_and_reported_on_the_page_task() {
    let harness = Harness::new().await;
    let job = harness.seed_job(1, 1).await;

    let mut names = HashMap::new();
    names.insert(("drawings/old/raw.pdf".to_string(), 0), "A-101".to_string());
    names.insert(("drawings/new/raw.pdf".to_string(), 0), "A-101".to_string());

    harness.orchestrator.start_job(&job.id).await.unwrap();
    harness.pump_ocr(&harness.ocr_worker(names)).await;
    harness.pump_diff(&harness.diff_worker(Arc::new(buildtrace_core::workers::DeterministicAligner))).await;

    let refusing_worker = SummaryWorker::new(
        harness.db.clone(),
        harness.bus.clone(),
        Settings::default(),
        Arc::new(RefusingSummarizer),
    );
    harness.pump_summary(&refusing_worker).await;

    let job = harness.db.jobs().require(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::PartiallyFailed);

    let summary_stage = harness.db.job_stages().require(&job.id, StageKind::Summary).await.unwrap();
    assert_eq!(summary_stage.status, StageStatus::Failed);
    assert_eq!(summary_stage.failed_count, 1);
}

#[test]
fn page_task_constructors_agree_with_stage_kind() {
    let task = PageTask::new_ocr("t-1".into(), "job-1".into(), StageKind::OcrOld, "old-1".into(), 0);
    assert_eq!(task.stage_kind, StageKind::OcrOld);
    assert_eq!(task.attempt_count, 0);
    assert!(task.can_retry(3));
}
