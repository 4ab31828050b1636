//! taxiflow CLI: trip-duration training flows and the flaky fetch task.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use taxiflow_core::{TaxiColor, TrackingBackend};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// taxiflow: NYC taxi trip-duration training with retrying tasks
#[derive(Parser, Debug)]
#[command(name = "taxiflow", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Tracking backend: mlflow, file, memory
    #[arg(long, global = true)]
    tracking: Option<TrackingBackend>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Train on one month, validate on the next, and log the run
    Train {
        #[arg(long)]
        year: i32,
        #[arg(long)]
        month: u32,
        /// Taxi color (defaults to the configured one)
        #[arg(long)]
        color: Option<TaxiColor>,
        /// Register the experiment's best run afterwards
        #[arg(long)]
        register: bool,
    },
    /// Train the location baseline on one month and register the best run
    Baseline {
        #[arg(long)]
        year: i32,
        #[arg(long)]
        month: u32,
        #[arg(long, default_value = "yellow")]
        color: TaxiColor,
        /// Registered model name (defaults to the configured one)
        #[arg(long)]
        model_name: Option<String>,
    },
    /// GET a URL through the retrying fetch task and print the body
    Fetch {
        #[arg(long)]
        url: Option<String>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Write the default configuration to the workspace
    Init,
    /// Print the effective configuration
    Show,
}

/// Options shared by every subcommand.
#[derive(Debug, Clone)]
pub(crate) struct GlobalOptions {
    pub workspace: PathBuf,
    pub config: Option<PathBuf>,
    pub tracking: Option<TrackingBackend>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "taxiflow", "taxiflow")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "taxiflow.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let options = GlobalOptions {
        workspace,
        config: cli.config,
        tracking: cli.tracking,
    };
    commands::handle_command(cli.command, &options).await
}
