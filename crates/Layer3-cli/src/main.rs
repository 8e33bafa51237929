//! Trellis CLI - 메인 엔트리 포인트

mod catalog;
mod cli;
mod host;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trellis_foundation::RuntimeConfig;

/// Trellis - plugin runtime operator tool
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Load runtime settings from this file instead of the global/project config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Plugins directory (overrides config and TRELLIS_PLUGINS_DIR)
    #[arg(long)]
    plugins_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a plugin directory's manifest
    Validate {
        /// Directory containing manifest.json
        dir: PathBuf,
    },
    /// Scan the plugins directory
    Available,
    /// List durable plugin records
    List,
    /// Install a plugin (records it and creates its tables)
    Install { plugin_id: String },
    /// Activate an installed plugin
    Activate { plugin_id: String },
    /// Deactivate an active plugin
    Deactivate {
        plugin_id: String,
        /// Also drop the plugin's tables
        #[arg(long)]
        drop_tables: bool,
    },
    /// Remove a plugin and its tables
    Uninstall { plugin_id: String },
    /// Load installed plugins and report runtime status
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 로깅 초기화
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // 설정 로드
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::load_from(path)?,
        None => RuntimeConfig::load().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config: {}", e);
            RuntimeConfig::default()
        }),
    };
    if let Some(dir) = args.plugins_dir {
        config = config.with_plugins_dir(dir);
    }
    tracing::debug!(plugins_dir = %config.plugins_dir().display(), "Configuration loaded");

    match args.command {
        Command::Validate { dir } => cli::validate(&dir).await?,
        Command::Available => cli::available(&config).await?,
        Command::List => cli::list(&config).await?,
        Command::Install { plugin_id } => cli::install(&config, &plugin_id).await?,
        Command::Activate { plugin_id } => cli::activate(&config, &plugin_id).await?,
        Command::Deactivate {
            plugin_id,
            drop_tables,
        } => cli::deactivate(&config, &plugin_id, drop_tables).await?,
        Command::Uninstall { plugin_id } => cli::uninstall(&config, &plugin_id).await?,
        Command::Status { json } => cli::status(&config, json).await?,
    }

    Ok(())
}
