//! BuildTrace: asynchronous page-level comparison of two PDF drawing sets.
//!
//! Wires a Diesel-backed store, a message bus, the Orchestrator, and the
//! OCR/Diff/Summary workers into a single process. `serve` runs everything
//! in one binary (local bus, single node); the worker subcommands exist so
//! a deployment can split OCR/Diff/Summary onto separate processes sharing
//! a non-local bus.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use buildtrace_core::bus::messages::CompletionMessage;
use buildtrace_core::bus::{LocalBus, MessageBus};
use buildtrace_core::config::{BusBackend, Settings};
use buildtrace_core::orchestrator::Orchestrator;
use buildtrace_core::repository::DieselDbContext;
use buildtrace_core::workers::{
    DeterministicAligner, DeterministicNameExtractor, DeterministicRasterizer, DeterministicSummarizer,
};
use buildtrace_core::{api, bus, workers};

#[derive(Parser)]
#[command(name = "buildtrace", about = "Compare two PDF drawing versions page by page")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a Job comparing two drawing versions and dispatch its first stage.
    StartJob {
        #[arg(long)]
        project_id: String,
        #[arg(long)]
        old_version_id: String,
        #[arg(long)]
        new_version_id: String,
        #[arg(long)]
        created_by: String,
    },
    /// Print a Job's status and per-stage counters.
    Status {
        #[arg(long)]
        job_id: String,
    },
    /// Cancel a running Job.
    Cancel {
        #[arg(long)]
        job_id: String,
    },
    /// Re-run summarization for one diff result.
    RegenerateSummary {
        #[arg(long)]
        diff_result_id: String,
    },
    /// Run the Orchestrator's completion listener plus all three workers
    /// in this process, until interrupted.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let default_filter = "buildtrace_core=info";
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = Settings::load().await;
    settings.ensure_directories()?;
    let db = settings.create_db_context()?;
    db.init_schema().await?;
    settings.persist_snapshot(&db).await?;

    match settings.bus_backend {
        BusBackend::Local => {
            let bus = Arc::new(LocalBus::default());
            run(db, bus, settings, cli.command).await
        }
        #[cfg(feature = "amqp-broker")]
        BusBackend::RabbitMq => {
            let amqp_url = settings
                .bus_connection_string
                .clone()
                .ok_or_else(|| anyhow::anyhow!("bus_backend is rabbitmq but no connection string was configured"))?;
            let bus = Arc::new(bus::RabbitMqBus::connect(&amqp_url, 5).await?);
            run(db, bus, settings, cli.command).await
        }
        #[cfg(not(feature = "amqp-broker"))]
        BusBackend::RabbitMq => {
            anyhow::bail!("bus_backend is rabbitmq but this binary was built without the amqp-broker feature")
        }
    }
}

async fn run<B: MessageBus + 'static>(
    db: DieselDbContext,
    bus: Arc<B>,
    settings: Settings,
    command: Command,
) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::new(db.clone(), bus.clone(), settings.clone());

    match command {
        Command::StartJob { project_id, old_version_id, new_version_id, created_by } => {
            let job_id =
                api::start_job(&orchestrator, &db, &project_id, &old_version_id, &new_version_id, &created_by).await?;
            println!("{job_id}");
            Ok(())
        }
        Command::Status { job_id } => {
            let progress = api::get_job_progress(&db, &job_id).await?;
            println!("job {} status={:?}", progress.job.id, progress.job.status);
            for stage in progress.stages {
                println!(
                    "  {:?}: {:?} ({}/{} done, {} failed, {} skipped)",
                    stage.kind, stage.status, stage.completed_count, stage.expected_count, stage.failed_count, stage.skipped_count
                );
            }
            Ok(())
        }
        Command::Cancel { job_id } => {
            api::cancel_job(&orchestrator, &job_id).await?;
            println!("cancelled {job_id}");
            Ok(())
        }
        Command::RegenerateSummary { diff_result_id } => {
            api::regenerate_summary(&orchestrator, &diff_result_id).await?;
            println!("regenerated summary for {diff_result_id}");
            Ok(())
        }
        Command::Serve => serve(db, bus, settings, orchestrator).await,
    }
}

/// Run the completion listener and all three workers concurrently until one
/// of them exits (bus shutdown) or the process receives a shutdown signal.
async fn serve<B: MessageBus + 'static>(
    db: DieselDbContext,
    bus: Arc<B>,
    settings: Settings,
    orchestrator: Orchestrator<B>,
) -> anyhow::Result<()> {
    let ocr_worker = workers::OcrWorker::new(
        db.clone(),
        bus.clone(),
        settings.clone(),
        Arc::new(DeterministicRasterizer),
        Arc::new(DeterministicNameExtractor::new(Default::default())),
    );
    let diff_worker = workers::DiffWorker::new(db.clone(), bus.clone(), settings.clone(), Arc::new(DeterministicAligner));
    let summary_worker =
        workers::SummaryWorker::new(db.clone(), bus.clone(), settings.clone(), Arc::new(DeterministicSummarizer));

    let completions = tokio::spawn(async move {
        let mut subscription = bus.subscribe(CompletionMessage::TOPIC).await?;
        while let Some(delivery) = subscription.recv().await {
            let completion: CompletionMessage = match serde_json::from_slice(&delivery.payload) {
                Ok(completion) => completion,
                Err(err) => {
                    tracing::error!(error = %err, "failed to decode completion message; dropping");
                    delivery.ack.ack().await?;
                    continue;
                }
            };

            match orchestrator.on_completion(&completion).await {
                Ok(()) => delivery.ack.ack().await?,
                Err(err) => {
                    tracing::error!(error = %err, "orchestrator failed to process completion; nacking");
                    delivery.ack.nack().await?;
                }
            }
        }
        Ok::<_, anyhow::Error>(())
    });

    let ocr = tokio::spawn(async move { ocr_worker.run().await });
    let diff = tokio::spawn(async move { diff_worker.run().await });
    let summary = tokio::spawn(async move { summary_worker.run().await });

    tracing::info!("serve: orchestrator and all three workers running");

    tokio::select! {
        result = completions => { result??; }
        result = ocr => { result??; }
        result = diff => { result??; }
        result = summary => { result??; }
        _ = tokio::signal::ctrl_c() => { tracing::info!("shutdown signal received"); }
    }

    Ok(())
}
