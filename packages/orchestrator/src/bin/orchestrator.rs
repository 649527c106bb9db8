//! Orchestrator process entrypoint, in the spirit of `migrate_cli`/
//! `dev-cli`: a small `clap` surface over the library rather than a
//! standalone HTTP API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use orchestrator::config::Config;
use orchestrator::deps::Deps;
use orchestrator::queues::SchedulerTrigger;
use orchestrator::repository::job::JobRepository;
use orchestrator::repository::outbox::PgOutboxReader;
use orchestrator::repository::user_work::UserWorkRepository;
use orchestrator::wire::WorkItemUpdate;
use orchestrator::{failer, ingester, scheduler};
use orchestrator_core::{OutboxEntry, OutboxEvent, OutboxPublisher, Queue, ServiceId};
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(about = "Workflow orchestration core: scheduler, ingester, failer, and outbox publisher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler, ingester, failer, and outbox publisher loops until interrupted.
    Serve,
    /// Apply pending `sqlx` migrations and exit.
    Migrate,
    /// Recompute a job's `user_work` ledger rows from `work_items`.
    RebuildUserWork {
        job_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,orchestrator=debug".into()))
        .with(tracing_subscriber::fmt::layer().with_target(true).with_line_number(true))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Serve => cmd_serve(config).await,
        Commands::Migrate => cmd_migrate(config).await,
        Commands::RebuildUserWork { job_id } => cmd_rebuild_user_work(config, job_id).await,
    }
}

async fn cmd_migrate(config: Config) -> Result<()> {
    let pool = PgPool::connect(&config.database_url).await.context("failed to connect to database")?;
    sqlx::migrate!("./migrations").run(&pool).await.context("failed to apply migrations")?;
    tracing::info!("migrations applied");
    Ok(())
}

async fn cmd_rebuild_user_work(config: Config, job_id: Uuid) -> Result<()> {
    let pool = PgPool::connect(&config.database_url).await.context("failed to connect to database")?;
    let mut conn = pool.acquire().await?;
    let job = JobRepository::find(&mut conn, job_id)
        .await?
        .with_context(|| format!("no such job {job_id}"))?;

    let mut tx = pool.begin().await?;
    UserWorkRepository::rebuild_for_job(&mut tx, job.id, &job.username, job.is_async).await?;
    tx.commit().await?;

    tracing::info!(job_id = %job_id, "user_work rebuilt");
    Ok(())
}

/// Routes claimed outbox entries onto their corresponding queue by
/// `event_type`. Only `scheduler_trigger.v1` exists today; an unknown
/// type is a configuration bug, not a transient failure, so it's surfaced
/// rather than silently dropped.
struct QueuePublisher {
    queues: Arc<orchestrator::queues::Queues>,
}

#[async_trait]
impl OutboxPublisher for QueuePublisher {
    async fn publish(&self, entry: &OutboxEntry) -> orchestrator_core::outbox::Result<()> {
        if entry.event_type != <SchedulerTrigger as OutboxEvent>::event_type() {
            return Err(orchestrator_core::OutboxError::UnroutedEventType(entry.event_type.clone()));
        }
        let trigger: SchedulerTrigger = serde_json::from_value(entry.payload.clone())
            .map_err(|e| orchestrator_core::OutboxError::Read(e.into()))?;
        self.queues
            .scheduler_trigger
            .send(&trigger, &trigger.job_id.to_string())
            .await
            .map_err(|e| orchestrator_core::OutboxError::Write(anyhow::anyhow!(e)))
    }
}

async fn cmd_serve(config: Config) -> Result<()> {
    let deps = Deps::connect(config).await.context("failed to initialize dependencies")?;

    tracing::info!("orchestrator starting");

    let mut tasks = tokio::task::JoinSet::new();

    for (service, _) in deps.config.service_queue_urls.clone() {
        let deps = deps.clone();
        let service_id = ServiceId::from(service.as_str());
        tasks.spawn(async move { scheduler_loop(deps, service_id).await });
    }

    {
        let deps = deps.clone();
        tasks.spawn(async move { ingester_loop(deps, IngestQueue::Small).await });
    }
    {
        let deps = deps.clone();
        tasks.spawn(async move { ingester_loop(deps, IngestQueue::Large).await });
    }

    {
        let deps = deps.clone();
        tasks.spawn(async move { failer_loop(deps).await });
    }

    {
        let deps = deps.clone();
        tasks.spawn(async move { outbox_publisher_loop(deps).await });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        Some(result) = tasks.join_next() => {
            if let Err(err) = result {
                tracing::error!(error = %err, "a worker loop panicked");
            }
        }
    }

    tasks.shutdown().await;
    tracing::info!("orchestrator stopped");
    Ok(())
}

async fn scheduler_loop(deps: Deps, service_id: ServiceId) {
    loop {
        match scheduler::run_once(&deps, &service_id).await {
            Ok(true) => continue,
            Ok(false) => tokio::time::sleep(Duration::from_millis(500)).await,
            Err(err) => {
                tracing::warn!(service = %service_id.as_str(), error = %err, "scheduler iteration failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

enum IngestQueue {
    Small,
    Large,
}

async fn ingester_loop(deps: Deps, which: IngestQueue) {
    loop {
        let (queue, max_messages): (&dyn Queue<WorkItemUpdate>, u32) = match which {
            IngestQueue::Small => (deps.queues.small_updates.as_ref(), 10),
            IngestQueue::Large => (deps.queues.large_updates.as_ref(), deps.config.large_update_batch_cap),
        };
        match ingester::run_once(&deps, queue, max_messages).await {
            Ok(0) => tokio::time::sleep(Duration::from_millis(500)).await,
            Ok(_) => continue,
            Err(err) => {
                tracing::warn!(error = %err, "ingester iteration failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn failer_loop(deps: Deps) {
    let mut interval = tokio::time::interval(deps.config.work_failer_period);
    loop {
        interval.tick().await;
        match failer::run_once(&deps).await {
            Ok(count) if count > 0 => tracing::info!(count, "failer expired stuck work items"),
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "failer sweep failed"),
        }
    }
}

async fn outbox_publisher_loop(deps: Deps) {
    let reader = PgOutboxReader::new(deps.pool.clone());
    let publisher = QueuePublisher { queues: deps.queues.clone() };
    let cfg = orchestrator_core::OutboxPublisherConfig::default();

    let mut since_cleanup = tokio::time::Instant::now();
    loop {
        match orchestrator_core::drain_once(&reader, &publisher, cfg.batch_size).await {
            Ok(0) => tokio::time::sleep(cfg.poll_interval).await,
            Ok(_) => continue,
            Err(err) => {
                tracing::warn!(error = %err, "outbox drain failed");
                tokio::time::sleep(cfg.poll_interval).await;
            }
        }

        if since_cleanup.elapsed() >= cfg.cleanup_interval {
            since_cleanup = tokio::time::Instant::now();
            let cutoff = chrono::Utc::now() - chrono::Duration::from_std(cfg.retention).unwrap_or(chrono::Duration::zero());
            if let Err(err) = orchestrator_core::OutboxReader::cleanup_published(&reader, cutoff).await {
                tracing::warn!(error = %err, "outbox cleanup failed");
            }
        }
    }
}
