//! ledger-sync command line entry point.

use clap::{Parser, Subcommand};
use ledger_sync_service::config::SyncConfig;
use ledger_sync_service::engine::{Approval, Reconciler, RunInput, RunMode};
use ledger_sync_service::error::SyncError;
use ledger_sync_service::models::RunReport;
use ledger_sync_service::services::metrics::{get_metrics, init_metrics};
use ledger_sync_service::services::{Database, InMemoryStore, LedgerStore};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::path::{Path, PathBuf};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "ledger-sync", version, about = "Reconcile bank statements into the ledger")]
struct Cli {
    /// Write the run's Prometheus metrics to stderr once it finishes
    #[arg(long, global = true)]
    metrics: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Simulate a run and print the plan without writing anything
    Plan {
        /// Run input (statement lines, period targets, daily sales) as JSON
        #[arg(long)]
        input: PathBuf,
        /// Plan against an empty in-memory store instead of PostgreSQL
        #[arg(long)]
        offline: bool,
    },
    /// Commit a run against PostgreSQL
    Commit {
        #[arg(long)]
        input: PathBuf,
        /// Operator confirming the commit
        #[arg(long = "approved-by")]
        approved_by: String,
    },
    /// Apply database migrations
    Migrate,
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, cancelling run");
    cancel.cancel();
}

fn read_input(path: &Path) -> Result<RunInput, AppError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

async fn connect(config: &SyncConfig) -> Result<Database, AppError> {
    let db = config.require_database()?;
    let database = Database::new(&db.url, db.max_connections, db.min_connections).await?;
    database.health_check().await?;
    Ok(database)
}

async fn run(
    config: &SyncConfig,
    input: &Path,
    mode: RunMode,
    store: &dyn LedgerStore,
    cancel: &CancellationToken,
) -> Result<RunReport, SyncError> {
    let input = read_input(input)?;
    let reconciler = Reconciler::new(config.engine.clone())?;
    reconciler.run(input, &mode, store, cancel).await
}

fn fatal(context: &str, e: impl std::fmt::Display) -> std::io::Error {
    tracing::error!(error = %e, "{}", context);
    std::io::Error::other(format!("{}: {}", context, e))
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = SyncConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    // Initialize tracing
    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        version = %config.service_version,
        "Starting ledger-sync"
    );

    // Initialize metrics
    init_metrics();

    // Log configuration (mask sensitive values)
    tracing::info!(
        service_name = %config.service_name,
        database_configured = config.database.is_some(),
        approximate_match_policy = ?config.engine.approximate_match_policy,
        reconciliation_window_days = config.engine.reconciliation_window_days,
        concept_width = config.engine.concept_width,
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let report = match cli.command {
        Command::Plan { input, offline: true } => {
            let store = InMemoryStore::new();
            run(&config, &input, RunMode::Simulate, &store, &cancel).await
        }
        Command::Plan { input, offline: false } => {
            let database = connect(&config)
                .await
                .map_err(|e| fatal("Failed to connect to database", e))?;
            run(&config, &input, RunMode::Simulate, &database, &cancel).await
        }
        Command::Commit { input, approved_by } => {
            let database = connect(&config)
                .await
                .map_err(|e| fatal("Failed to connect to database", e))?;
            let mode = RunMode::Commit(Approval::confirmed_by(approved_by));
            run(&config, &input, mode, &database, &cancel).await
        }
        Command::Migrate => {
            let database = connect(&config)
                .await
                .map_err(|e| fatal("Failed to connect to database", e))?;
            database
                .run_migrations()
                .await
                .map_err(|e| fatal("Migration failed", e))?;
            return Ok(());
        }
    }
    .map_err(|e| fatal("Sync run failed", e));

    if cli.metrics {
        eprint!("{}", get_metrics());
    }
    let report = report?;

    let json = serde_json::to_string_pretty(&report).map_err(|e| fatal("Failed to encode report", e))?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_flag_is_accepted_after_subcommand() {
        let cli = Cli::try_parse_from(["ledger-sync", "plan", "--input", "run.json", "--offline", "--metrics"])
            .unwrap();
        assert!(cli.metrics);
        assert!(matches!(cli.command, Command::Plan { offline: true, .. }));
    }

    #[test]
    fn test_metrics_are_off_by_default() {
        let cli = Cli::try_parse_from(["ledger-sync", "migrate"]).unwrap();
        assert!(!cli.metrics);
    }
}
