//! scopework CLI: run the background engine against synthetic workloads.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use scopework::config::Config;
use scopework::context;
use scopework::event::EventKind;
use scopework::model::{ScopeId, Session};
use scopework::session::{DefaultScopeFactory, InMemorySessionManager, SessionManager};
use scopework::telemetry::{TelemetryConfig, init_telemetry};
use scopework::{BackgroundTaskService, BackgroundWorker};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "scopework", about = "Session-aware background work engine")]
struct Cli {
    /// TOML config file (environment variables are used when absent)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the number of consumer loops
    #[arg(long, global = true)]
    consumers: Option<usize>,
    /// Override the queue capacity
    #[arg(long, global = true)]
    capacity: Option<usize>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a batch of synthetic work items, wait for them, print a summary
    Demo {
        /// Number of work items to submit
        #[arg(long, default_value_t = 10)]
        items: usize,
        /// Simulated work time per item in milliseconds
        #[arg(long, default_value_t = 20)]
        work_ms: u64,
        /// Make every Nth item fail (0 disables failures)
        #[arg(long, default_value_t = 0)]
        fail_every: usize,
        /// Run every item inside one pre-existing session
        #[arg(long)]
        shared_session: bool,
    },
    /// Run the service with a periodic heartbeat producer until Ctrl-C
    Serve {
        /// Heartbeat interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

#[derive(Serialize)]
struct DemoSummary {
    submitted: usize,
    completed: usize,
    failed: usize,
    sessions_ended: usize,
    session_end_failures: usize,
    active_sessions: Vec<scopework::session::SessionSnapshot>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(consumers) = cli.consumers {
        config.consumers = consumers;
    }
    if let Some(capacity) = cli.capacity {
        config.queue_capacity = capacity;
    }

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "scopework".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let mut service_config = config.service_config();
    if let Command::Demo { items, .. } = cli.command {
        // Room for every event of the batch, so the summary never misses one.
        service_config.event_capacity = service_config.event_capacity.max(items * 4);
    }

    let sessions = Arc::new(InMemorySessionManager::new());
    let service = BackgroundTaskService::new(
        BackgroundWorker::with_capacity(config.queue_capacity)?,
        Arc::new(DefaultScopeFactory),
        sessions.clone(),
        service_config,
    )?;

    match cli.command {
        Command::Demo {
            items,
            work_ms,
            fail_every,
            shared_session,
        } => cmd_demo(&service, &sessions, items, work_ms, fail_every, shared_session).await,
        Command::Serve { interval_ms } => cmd_serve(&service, interval_ms).await,
    }
}

async fn cmd_demo(
    service: &BackgroundTaskService,
    sessions: &Arc<InMemorySessionManager>,
    items: usize,
    work_ms: u64,
    fail_every: usize,
    shared_session: bool,
) -> anyhow::Result<()> {
    let token = CancellationToken::new();
    let mut events = service.subscribe();
    service.start(&token)?;

    // The shared session stands in for one inbound request spawning work.
    let parent: Option<Session> = if shared_session {
        Some(sessions.create_session(ScopeId::new()).await?)
    } else {
        None
    };

    let worker = service.worker();
    let mut pending = HashSet::new();
    for n in 1..=items {
        let fails = fail_every > 0 && n % fail_every == 0;
        let id = worker
            .submit(
                move |scope, token| async move {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(work_ms)) => {}
                        _ = token.cancelled() => anyhow::bail!("item {n} cancelled"),
                    }
                    let current = context::current_scope_id()
                        .context("ambient scope missing inside work item")?;
                    info!(item = n, scope_id = %scope.id, ambient = %current, "synthetic work ran");
                    if fails {
                        anyhow::bail!("synthetic failure in item {n}");
                    }
                    Ok(())
                },
                parent.clone(),
            )
            .await?;
        pending.insert(id);
    }

    let mut summary = DemoSummary {
        submitted: items,
        completed: 0,
        failed: 0,
        sessions_ended: 0,
        session_end_failures: 0,
        active_sessions: Vec::new(),
    };
    while !pending.is_empty() {
        let event = events.recv().await.context("event stream closed")?;
        match &event.kind {
            EventKind::WorkCompleted { .. } => summary.completed += 1,
            EventKind::WorkFailed { .. }
            | EventKind::WorkPanicked { .. }
            | EventKind::WorkAbandoned { .. } => summary.failed += 1,
            EventKind::SessionEnded { .. } => summary.sessions_ended += 1,
            EventKind::SessionEndFailed { .. } => summary.session_end_failures += 1,
            _ => {}
        }
        if let Some(id) = event.kind.finished_work() {
            pending.remove(&id);
        }
    }

    let deadline = CancellationToken::new();
    let stop_timer = deadline.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        stop_timer.cancel();
    });
    service.stop(&deadline).await?;

    if let Some(parent) = parent {
        sessions.end_session(parent.id).await?;
    }
    summary.active_sessions = sessions.snapshot();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn cmd_serve(service: &BackgroundTaskService, interval_ms: u64) -> anyhow::Result<()> {
    let token = CancellationToken::new();
    service.start(&token)?;

    let ctrl = token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.cancel();
    });

    let worker = service.worker().clone();
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    let mut beat: u64 = 0;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                beat += 1;
                worker
                    .submit(
                        move |scope, _token| async move {
                            info!(beat, scope_id = %scope.id, "heartbeat");
                            Ok(())
                        },
                        None,
                    )
                    .await?;
            }
        }
    }

    info!("shutting down");
    worker.close();
    let deadline = CancellationToken::new();
    let stop_timer = deadline.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        stop_timer.cancel();
    });
    service.stop(&deadline).await?;
    Ok(())
}
