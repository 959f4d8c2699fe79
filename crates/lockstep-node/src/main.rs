use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use lockstep_core::config::LockstepConfig;
use lockstep_core::{Clock, NodeId, SystemClock};
use lockstep_lock::{LockManager, LockStore, SqliteLockStore};
use lockstep_scheduler::{Scheduler, SchedulerEvent};
use tracing::{info, warn};

mod jobs;

#[derive(Parser, Debug)]
#[command(name = "lockstep-node")]
#[command(version)]
#[command(about = "Cluster-safe scheduled jobs over a shared lock table")]
#[command(propagate_version = true)]
struct Args {
    /// Config file (default: $LOCKSTEP_CONFIG, then ~/.lockstep/lockstep.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the scheduler on this node
    Run {
        /// Identity written to the lock table (overrides node.id)
        #[arg(long)]
        node_id: Option<String>,
    },
    /// Print the shared lock table
    Locks {
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
    /// Validate the config and show when each job fires next
    Check,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lockstep_node=info,lockstep_scheduler=info,lockstep_lock=info".into()
            }),
        )
        .init();

    let args = Args::parse();

    // explicit path > LOCKSTEP_CONFIG env > ~/.lockstep/lockstep.toml
    let config_path = args
        .config
        .map(|p| p.to_string_lossy().into_owned())
        .or_else(|| std::env::var("LOCKSTEP_CONFIG").ok());
    let config = LockstepConfig::load(config_path.as_deref()).context("loading config")?;

    match args.command {
        Commands::Run { node_id } => run(config, node_id).await,
        Commands::Locks { output } => print_locks(&config, &output),
        Commands::Check => check(&config),
    }
}

async fn run(config: LockstepConfig, node_id: Option<String>) -> anyhow::Result<()> {
    let owner = node_id
        .or_else(|| config.node.id.clone())
        .map(NodeId::from)
        .unwrap_or_else(NodeId::generate);

    let store = open_store(&config)?;
    let locks = Arc::new(LockManager::new(store, owner.clone()));
    let registry = Arc::new(jobs::build_registry(&config)?);
    if registry.is_empty() {
        warn!("no jobs configured; the node will only tick");
    }

    // Scheduler events → log task
    let (events_tx, mut events_rx) =
        tokio::sync::mpsc::channel::<SchedulerEvent>(config.scheduler.event_buffer.max(1));
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            if let SchedulerEvent::Finished {
                job,
                outcome,
                release,
            } = event
            {
                tracing::debug!(%job, %outcome, ?release, "run recorded");
            }
        }
    });

    let scheduler = Arc::new(
        Scheduler::new(registry, locks)
            .with_events(events_tx)
            .with_tick_interval(config.scheduler.tick_interval)
            .with_shutdown_grace(config.scheduler.shutdown_grace),
    );
    info!(node = %owner, "lockstep node starting");
    let handle = scheduler.start();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");

    if !handle.stop().await {
        warn!("stopped with jobs still running");
    }
    Ok(())
}

fn print_locks(config: &LockstepConfig, output: &OutputFormat) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let now = store.now()?;
    let records = store.list()?;

    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        OutputFormat::Table => {
            if records.is_empty() {
                println!("No locks recorded.");
                return Ok(());
            }
            println!(
                "{:<32} {:<24} {:<26} {:<26} HELD",
                "NAME", "LOCKED BY", "LOCKED AT", "LOCK UNTIL"
            );
            for r in &records {
                println!(
                    "{:<32} {:<24} {:<26} {:<26} {}",
                    r.name,
                    r.locked_by,
                    r.locked_at.to_rfc3339(),
                    r.lock_until.to_rfc3339(),
                    if r.is_held(now) { "yes" } else { "no" }
                );
            }
        }
    }
    Ok(())
}

fn check(config: &LockstepConfig) -> anyhow::Result<()> {
    let registry = jobs::build_registry(config)?;
    let now = SystemClock.now();

    println!("{} job(s) OK", registry.len());
    for job in registry.jobs() {
        let next = job
            .trigger
            .next_after(now)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {:<32} {:<28} at_least={} at_most={} next={}",
            job.name,
            job.trigger.to_string(),
            lockstep_core::duration::format_duration(job.lock.at_least_for),
            lockstep_core::duration::format_duration(job.lock.at_most_for),
            next
        );
    }
    Ok(())
}

fn open_store(config: &LockstepConfig) -> anyhow::Result<Arc<dyn LockStore>> {
    let db_path = &config.database.path;
    if let Err(e) = ensure_parent_dir(db_path) {
        warn!(path = %db_path, error = %e, "could not create database directory");
    }
    info!(path = %db_path, "opening lock database");

    let busy_timeout = config
        .database
        .busy_timeout
        .to_std()
        .context("database.busy_timeout must not be negative")?;
    let store = SqliteLockStore::open(db_path, busy_timeout, Arc::new(SystemClock))
        .with_context(|| format!("opening {db_path}"))?;
    Ok(Arc::new(store))
}

fn ensure_parent_dir(path: &str) -> std::io::Result<()> {
    match std::path::Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
