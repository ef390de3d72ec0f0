//! strata engine binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::path::PathBuf;
use std::sync::Arc;
use strata_core::config::AppConfig;
use strata_core::{FileReferenceEvent, RequestKind, RetryRequests, TenantContext};
use strata_engine::handlers::handle_retry;
use strata_engine::scheduler::{recover_orphaned_jobs, schedule_all_tenants, spawn_auto_scheduler};
use strata_engine::{AppState, BroadcastPublisher, ingest_lines};
use tokio::io::BufReader;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// strata - file reference and storage request engine
///
/// Events are written to stdout as newline-delimited JSON; logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "STRATA_CONFIG",
        default_value = "config/strata.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest messages from stdin while jobs run in the background
    Run,
    /// Ingest a newline-delimited JSON message file, then exit
    Ingest {
        /// Message file
        file: PathBuf,
    },
    /// Run one scheduling pass for every tenant and wait for its jobs
    Schedule,
    /// Reset the errored requests of a group to todo
    Retry {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        group: String,
        /// storage, deletion, cache or copy
        #[arg(long)]
        kind: RequestKind,
    },
    /// Purge expired restoration cache entries of a tenant
    PurgeCache {
        #[arg(long)]
        tenant: String,
    },
    /// Print metrics in the Prometheus text format
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries events
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("strata v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    strata_engine::metrics::register_metrics();

    let locations = strata_storage::from_config(&config.locations)
        .await
        .context("failed to initialize storage locations")?;
    locations
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(locations = ?locations, "storage locations initialized");

    let metadata = strata_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let publisher = Arc::new(BroadcastPublisher::new(1024));
    let printer = spawn_event_printer(publisher.subscribe());

    let state = AppState::new(config, metadata, locations, publisher.clone())
        .context("failed to create engine state")?;
    state
        .cache
        .ensure_root()
        .await
        .context("failed to prepare restoration cache")?;

    match args.command {
        Command::Run => run(&state).await?,
        Command::Ingest { file } => {
            let input = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("failed to open {}", file.display()))?;
            ingest_lines(&state, BufReader::new(input))
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
        }
        Command::Schedule => {
            recover(&state).await?;
            let jobs = schedule_all_tenants(&state)
                .await
                .context("scheduling pass failed")?;
            tracing::info!(jobs = jobs.len(), "waiting for scheduled jobs");
            state.job_registry.wait_idle().await;
        }
        Command::Retry { tenant, group, kind } => {
            let ctx = TenantContext::for_tenant(&tenant).context("invalid tenant")?;
            let msg = RetryRequests {
                group_id: group,
                kind,
            };
            let reset = handle_retry(&state, &ctx, msg)
                .await
                .context("failed to retry requests")?;
            println!("{reset} request(s) reset to todo");
        }
        Command::PurgeCache { tenant } => {
            let ctx = TenantContext::for_tenant(&tenant).context("invalid tenant")?;
            let purged = state
                .cache
                .purge_expired(&ctx)
                .await
                .context("failed to purge cache")?;
            let used = state.cache.used_bytes(&ctx).await?;
            println!("{purged} expired entr(y/ies) purged, {used} bytes in use");
        }
        Command::Metrics => {
            print!("{}", strata_engine::metrics::render_metrics()?);
        }
    }

    // Dropping every sender ends the printer once buffered events are written
    drop(state);
    drop(publisher);
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "event printer ended abnormally");
    }
    Ok(())
}

/// Load configuration from the file (optional) and `STRATA_` env vars.
fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    // STRATA_CONFIG is only the path
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("STRATA_") && key != "STRATA_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: strata --config /path/to/strata.toml <command>\n  \
             2. Environment variables: STRATA_METADATA__PATH=/var/lib/strata/metadata.db strata <command>\n\n\
             Set STRATA_CONFIG to change the default config file path."
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("STRATA_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;
    Ok(config)
}

async fn recover(state: &AppState) -> Result<()> {
    let recovered = recover_orphaned_jobs(state)
        .await
        .context("failed to recover orphaned jobs")?;
    if recovered > 0 {
        tracing::info!(jobs = recovered, "Orphaned jobs recovered");
    }
    Ok(())
}

async fn run(state: &AppState) -> Result<()> {
    recover(state).await?;

    let _watchdog_handle = state.spawn_watchdog();
    tracing::info!("Job watchdog spawned");

    let auto_scheduler = if state.config.scheduler.auto_schedule_enabled {
        Some(spawn_auto_scheduler(state.clone()))
    } else {
        tracing::info!("Automatic scheduling disabled");
        None
    };

    ingest_lines(state, BufReader::new(tokio::io::stdin()))
        .await
        .context("failed to read stdin")?;

    if let Some(handle) = auto_scheduler {
        tracing::info!("Input closed, jobs keep running until interrupted");
        tokio::signal::ctrl_c()
            .await
            .context("failed to wait for ctrl-c")?;
        handle.abort();
    }
    state.job_registry.wait_idle().await;
    Ok(())
}

/// Write every published event to stdout as one JSON line.
fn spawn_event_printer(mut rx: broadcast::Receiver<FileReferenceEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::error!(error = %e, "failed to serialize event"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event printer lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
