mod alert_index;
mod bus;
mod cache;
mod candle_fetcher;
mod config;
mod counter_store;
mod dispatch;
mod error;
mod evaluator;
mod exchange;
mod model;
mod notifier;
mod recorder;
mod retry;
mod sharedbus;
mod stats;
mod storage;
mod supervisor;
mod sync_bridge;
mod volume_cache;
mod ws_server;

use std::path::Path;

use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use storage::sqlite::SqliteStorage;
use storage::Storage;
use supervisor::Supervisor;

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("storage error")]
    Storage,
    #[display("runtime error")]
    Runtime,
}

#[derive(Parser)]
#[command(name = "alert-core", about = "Real-time crypto trading alert engine")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the full supervisor graph (ingestion, evaluation, dispatch)
    Run,
    /// Print the last known counters from the durable store
    Stats,
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    let config = config::load(Path::new(&cli.config)).change_context(AppError::Config)?;

    init_tracing(&config);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_supervisor(config).await,
        Command::Stats => run_stats(&config).await,
    }
}

async fn run_supervisor(config: AppConfig) -> Result<(), Report<AppError>> {
    let supervisor = Supervisor::new(config);
    supervisor.run().await.change_context(AppError::Runtime)
}

/// Offline operational snapshot: since there is no running instance to poll,
/// summarize the durable store's active alert count and most recent trigger,
/// the same data a live `Stats` export would derive from.
async fn run_stats(config: &AppConfig) -> Result<(), Report<AppError>> {
    let storage = SqliteStorage::open(Path::new(&config.store.sqlite_path))
        .await
        .change_context(AppError::Storage)?;

    let alerts = storage
        .list_active_alerts()
        .await
        .change_context(AppError::Storage)?;

    println!("active alerts: {}", alerts.len());
    for alert in alerts.iter().take(20) {
        println!(
            "  {} {} direction={:?} threshold={}",
            alert.alert_id, alert.symbol, alert.direction, alert.change_pct_threshold
        );
    }
    if alerts.len() > 20 {
        println!("  ... and {} more", alerts.len() - 20);
    }

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
