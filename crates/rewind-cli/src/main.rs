//! Rewind CLI - point-in-time recovery operations

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

#[derive(Parser)]
#[command(name = "rewind")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Backup catalog base directory (overrides REWIND_BACKUP_DIR)
    #[arg(short, long)]
    backup_dir: Option<PathBuf>,

    /// Database engine data directory (overrides REWIND_DATA_DIR)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Zone the target time is given in, e.g. "Asia/Shanghai" or "UTC"
    /// (overrides REWIND_TZ)
    #[arg(short, long)]
    timezone: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore the database to a point in time
    Restore {
        /// Target time, "YYYY-MM-DD HH:MM:SS" in the configured zone
        target_time: String,

        /// Pin the full backup instead of auto-selecting, e.g. 20251126_020000
        #[arg(long)]
        full: Option<String>,

        /// Pin an incremental backup; repeatable, chain order
        #[arg(long = "incremental")]
        incrementals: Vec<String>,

        /// Extra directory to search for binary log files; repeatable
        #[arg(long = "binlog-dir")]
        binlog_dirs: Vec<PathBuf>,
    },

    /// Resolve and print the backup chain for a target time without restoring
    Resolve {
        /// Target time, "YYYY-MM-DD HH:MM:SS" in the configured zone
        target_time: String,
    },

    /// Catalog inspection commands
    #[command(subcommand)]
    Catalog(CatalogCommands),
}

#[derive(Subcommand)]
enum CatalogCommands {
    /// List all backup members visible in the catalog
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = rewind_core::RestoreConfig::from_env()?;
    if let Some(dir) = cli.backup_dir {
        config.backup_base_dir = dir;
    }
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(zone) = &cli.timezone {
        config.timezone = rewind_core::parse_zone(zone)?;
    }

    match cli.command {
        Commands::Restore {
            target_time,
            full,
            incrementals,
            binlog_dirs,
        } => {
            config.binlog_dirs.extend(binlog_dirs);
            commands::restore::execute(config, &target_time, full, incrementals).await
        }
        Commands::Resolve { target_time } => {
            commands::resolve::execute(config, &target_time).await
        }
        Commands::Catalog(CatalogCommands::List) => commands::catalog::execute(config).await,
    }
}
