//! taskrelay CLI: run workers and recovery sweeps, submit and inspect tasks,
//! check backend liveness.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use taskrelay::config::Config;
use taskrelay::db::Db;
use taskrelay::engine::{
    HealthCheck, RecoveryRequest, RecoverySweeper, TaskService, Worker, WorkerConfig,
};
use taskrelay::executor::{ExecutorRegistry, ExecutorSettings};
use taskrelay::lock::RedisLock;
use taskrelay::model::{NewTask, Priority, Status, TaskId};
use taskrelay::payload::{Params, encode_params, wrap_raw};
use taskrelay::queue::PgmqQueue;
use taskrelay::telemetry::{TelemetryConfig, init_telemetry};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "taskrelay", about = "Distributed task pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply database migrations
    Migrate,
    /// Ping every backend; exits non-zero if any is down
    Health,
    /// Consume one priority channel until interrupted
    Worker {
        /// Channel to consume: high, normal or low
        #[arg(long)]
        priority: Priority,
        /// Consumer id (suffixed with :N when running several)
        #[arg(long)]
        consumer: String,
        /// Number of consumer loops in this process
        #[arg(long, default_value_t = 1)]
        consumers: usize,
    },
    /// Republish tasks stuck in queued or failed
    Recover {
        /// queued or failed
        status: Status,
        /// Minimum seconds since the task was last updated
        stale_seconds: i64,
        /// Maximum tasks to republish per sweep
        limit: i64,
        /// Repeat the sweep every N seconds until interrupted
        #[arg(long)]
        every: Option<u64>,
    },
    /// Task operations
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Submit a new task
    Submit {
        /// Human-readable label
        name: String,
        /// Task type (selects the executor)
        task_type: String,
        #[arg(long, default_value = "normal")]
        priority: Priority,
        /// Executor parameter, repeatable
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Inner JSON object, used verbatim instead of --param
        #[arg(long, conflicts_with = "params")]
        payload: Option<String>,
    },
    /// Show a task's current status
    Status { id: TaskId },
    /// Show a task's status history
    History { id: TaskId },
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let _guard = init_telemetry(TelemetryConfig::from_config(&config))?;

    let db = Db::connect_with_retry(
        config.database_url.expose_secret(),
        config.db_max_connections,
    )
    .await?;

    match cli.command {
        Command::Migrate => {
            db.migrate().await?;
            info!("migrations applied");
            Ok(())
        }
        Command::Health => cmd_health(&config, db).await,
        Command::Worker {
            priority,
            consumer,
            consumers,
        } => cmd_worker(&config, db, priority, consumer, consumers).await,
        Command::Recover {
            status,
            stale_seconds,
            limit,
            every,
        } => {
            let request = RecoveryRequest {
                status,
                stale_after_secs: stale_seconds,
                limit,
            };
            cmd_recover(&config, db, request, every).await
        }
        Command::Task { action } => {
            let queue = PgmqQueue::connect(db.clone(), &config.channels).await?;
            let service = TaskService::new(Arc::new(db), Arc::new(queue), config.channels.clone());
            match action {
                TaskAction::Submit {
                    name,
                    task_type,
                    priority,
                    params,
                    payload,
                } => cmd_task_submit(&service, name, task_type, priority, params, payload).await,
                TaskAction::Status { id } => {
                    let status = service.status(id).await?;
                    println!("{id}: {status}");
                    Ok(())
                }
                TaskAction::History { id } => cmd_task_history(&service, id).await,
            }
        }
    }
}

async fn cmd_worker(
    config: &Config,
    db: Db,
    priority: Priority,
    consumer: String,
    consumers: usize,
) -> anyhow::Result<()> {
    let lock = RedisLock::connect_with_retry(config.redis_url.expose_secret()).await?;
    let queue = PgmqQueue::connect(db.clone(), &config.channels).await?;
    let registry = ExecutorRegistry::with_defaults(ExecutorSettings {
        delay: config.executor_delay,
        ..ExecutorSettings::default()
    });
    info!(executors = ?registry.tags(), "executors registered");

    let worker = Worker::new(
        Arc::new(db),
        Arc::new(queue),
        Arc::new(lock),
        Arc::new(registry),
        WorkerConfig::from_config(config),
    );

    let signal_worker = worker.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_worker.shutdown();
    });

    let channel = config.channels.for_priority(priority).to_string();
    let mut handles = Vec::with_capacity(consumers.max(1));
    for n in 1..=consumers.max(1) {
        let worker = worker.clone();
        let channel = channel.clone();
        let consumer_id = if consumers > 1 {
            format!("{consumer}:{n}")
        } else {
            consumer.clone()
        };
        handles.push(tokio::spawn(async move {
            worker.run(&channel, &consumer_id).await
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await? {
            error!(error = %e, "worker loop failed");
        }
    }
    Ok(())
}

async fn cmd_health(config: &Config, db: Db) -> anyhow::Result<()> {
    let lock = RedisLock::connect(config.redis_url.expose_secret()).await?;
    let queue = PgmqQueue::connect(db.clone(), &config.channels).await?;
    let health = HealthCheck::new(Arc::new(db), Arc::new(queue), Arc::new(lock));

    let report = health.check().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.healthy {
        anyhow::bail!("unhealthy: {}", report.failing().join(", "));
    }
    Ok(())
}

async fn cmd_recover(
    config: &Config,
    db: Db,
    request: RecoveryRequest,
    every: Option<u64>,
) -> anyhow::Result<()> {
    let queue = PgmqQueue::connect(db.clone(), &config.channels).await?;
    let sweeper = RecoverySweeper::new(Arc::new(db), Arc::new(queue), config.channels.clone());

    let Some(every) = every else {
        let report = sweeper.recover(request).await?;
        println!(
            "requeued {} of {} stale {} task(s), {} skipped",
            report.requeued, report.candidates, request.status, report.skipped
        );
        return Ok(());
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(every.max(1)));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("recovery loop shutting down");
                return Ok(());
            }
            _ = ticker.tick() => {
                if let Err(e) = sweeper.recover(request).await {
                    error!(error = %e, "recovery sweep failed");
                }
            }
        }
    }
}

async fn cmd_task_submit(
    service: &TaskService,
    name: String,
    task_type: String,
    priority: Priority,
    params: Vec<(String, String)>,
    payload: Option<String>,
) -> anyhow::Result<()> {
    let envelope = match payload {
        Some(raw) => wrap_raw(&raw)?,
        None => encode_params(&params.into_iter().collect::<Params>())?,
    };
    let task = service
        .submit(NewTask::new(name, task_type, envelope).priority(priority))
        .await?;
    println!(
        "Created: {} (type: {}, priority: {}, status: {})",
        task.id, task.task_type, task.priority, task.status
    );
    Ok(())
}

async fn cmd_task_history(service: &TaskService, id: TaskId) -> anyhow::Result<()> {
    let task = service.get(id).await?;
    println!("ID:         {}", task.id);
    println!("Name:       {}", task.name);
    println!("Type:       {}", task.task_type);
    println!("Priority:   {}", task.priority);
    println!("Status:     {}", task.status);
    println!("Created:    {}", task.created_at);
    println!("Updated:    {}", task.updated_at);
    println!("---");

    let history = match service.history(id).await {
        Ok(history) => history,
        Err(taskrelay::error::Error::NotFound(_)) => {
            println!("No status changes yet.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    for change in &history {
        println!(
            "{}  {:<9} -> {}",
            change.created_at.format("%Y-%m-%d %H:%M:%S"),
            change.old_status,
            change.new_status
        );
    }
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
