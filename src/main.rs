use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use echerga_stats::config::Config;
use echerga_stats::ingest;
use echerga_stats::migrate::{ClickHouseMigrator, Migrator};
use echerga_stats::serve::{self, health::HealthMetrics, AppState};
use echerga_stats::snapshot::FileSource;
use echerga_stats::store::ClickHouseStore;

/// Border-crossing queue statistics service.
#[derive(Parser)]
#[command(name = "echerga-stats", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one snapshot ingestion pass. Exits non-zero on any failure
    /// so a cron scheduler can alert.
    Ingest {
        /// Snapshot file to ingest (overrides the configured path).
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Serve the dashboard API until interrupted.
    Serve,

    /// Manage the ClickHouse schema.
    Migrate {
        #[command(subcommand)]
        direction: MigrateDirection,
    },

    /// Print version information and exit.
    Version,
}

#[derive(Subcommand)]
enum MigrateDirection {
    /// Apply all pending migrations.
    Up,
    /// Roll back the last applied migration.
    Down,
    /// Show the current schema version.
    Status,
}

/// Build-time version info.
mod version {
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Version = &cli.command {
        println!("echerga-stats {}", version::full());
        return Ok(());
    }

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;

    let cfg = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(run(cli.command, cfg))
}

async fn run(command: Command, cfg: Config) -> Result<()> {
    match command {
        Command::Ingest { snapshot } => {
            let path = snapshot.unwrap_or_else(|| PathBuf::from(&cfg.ingest.snapshot_path));
            let source = FileSource::new(path);

            let store = ClickHouseStore::new(&cfg.clickhouse);
            store.connect().await?;

            let report =
                ingest::run(&source, &store, cfg.ingest.max_age, SystemTime::now()).await?;

            tracing::info!(
                checkpoints = report.checkpoints,
                measurements = report.measurements,
                measured_at = %report.measured_at,
                "ingestion completed"
            );

            Ok(())
        }

        Command::Serve => {
            let addr = cfg
                .server
                .addr
                .parse()
                .with_context(|| format!("parsing server.addr {:?}", cfg.server.addr))?;

            let store = ClickHouseStore::new(&cfg.clickhouse);
            store.connect().await?;

            let state = AppState {
                store: Arc::new(store),
                metrics: Arc::new(HealthMetrics::new()?),
            };

            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();

            tokio::spawn(async move {
                let ctrl_c = tokio::signal::ctrl_c();
                let mut sigterm =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                        .expect("failed to register SIGTERM handler");

                tokio::select! {
                    _ = ctrl_c => {
                        tracing::info!("received SIGINT, shutting down");
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("received SIGTERM, shutting down");
                    }
                }

                signal_cancel.cancel();
            });

            serve::run(addr, state, cancel).await?;

            tracing::info!("echerga-stats stopped");

            Ok(())
        }

        Command::Migrate { direction } => {
            let store = ClickHouseStore::new(&cfg.clickhouse);
            store.connect().await?;

            let migrator = ClickHouseMigrator::new(store.pool().clone());

            match direction {
                MigrateDirection::Up => migrator.up().await,
                MigrateDirection::Down => migrator.down().await,
                MigrateDirection::Status => {
                    let (current_version, dirty) = migrator.status().await?;
                    println!("version: {current_version} (dirty: {dirty})");
                    Ok(())
                }
            }
        }

        Command::Version => unreachable!("handled before runtime setup"),
    }
}
