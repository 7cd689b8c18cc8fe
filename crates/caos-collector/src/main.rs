//! CAOS collector binary

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use caos_collector::{
    config::CollectorConfig,
    inventory::StaticInventory,
    jobs::{run_job, JobContext, JobSpec},
    metering::CeilometerApiStore,
    scheduler::Scheduler,
    tsdb::{Credentials, InMemorySeriesStore, SeriesStore, Session, TsdbClient},
    VERSION,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Usage metric collector for the CAOS time-series store
#[derive(Parser)]
#[command(name = "caos-collector", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Write samples to an in-memory store instead of the series store
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the configured schedules until interrupted
    Run,
    /// Run one job once
    Job {
        #[command(subcommand)]
        job: JobSpec,
    },
    /// Print version information and exit
    Version,
}

fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
    Ok(())
}

fn build_context(cfg: CollectorConfig, dry_run: bool) -> Result<JobContext> {
    let series: Arc<dyn SeriesStore> = if dry_run {
        warn!("Dry run: samples are kept in memory only");
        Arc::new(InMemorySeriesStore::new())
    } else {
        let session = Arc::new(Session::new(Credentials::new(
            &cfg.tsdb.username,
            &cfg.tsdb.password,
        )));
        Arc::new(TsdbClient::new(&cfg.tsdb, session).context("building series store client")?)
    };
    let metering = Arc::new(CeilometerApiStore::new(&cfg.metering).context("building metering client")?);
    let inventory = Arc::new(StaticInventory::new(cfg.inventory.clone()));

    Ok(JobContext {
        config: Arc::new(cfg),
        series,
        metering,
        inventory,
        cancel: CancellationToken::new(),
    })
}

/// Cancel `token` on SIGINT or SIGTERM
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, finishing current window"),
                        _ = sigterm.recv() => info!("Received SIGTERM, finishing current window"),
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Cannot register SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received SIGINT, finishing current window");
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received SIGINT, finishing current window");
        }
        token.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Version = cli.command {
        println!("caos-collector {VERSION}");
        return Ok(());
    }

    init_tracing(&cli.log_level, cli.log_format)?;
    info!(version = VERSION, "Starting CAOS collector");

    let cfg = CollectorConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let ctx = build_context(cfg, cli.dry_run)?;
    spawn_signal_handler(ctx.cancel.clone());

    match cli.command {
        Command::Run => {
            let schedules = ctx.config.schedulers.clone();
            let runs = Scheduler::new(ctx, schedules).run().await;
            info!(runs, "Collector stopped");
        }
        Command::Job { job } => {
            let job = job.build();
            let report = run_job(job.as_ref(), &ctx, Utc::now())
                .await
                .with_context(|| format!("job {} failed", job.name()))?;
            info!(report = ?report, "Job completed");
        }
        Command::Version => {}
    }
    Ok(())
}
