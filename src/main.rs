//! # Panopto Sync CLI (`panopto-sync`)
//!
//! ## Usage
//!
//! ```bash
//! panopto-sync --config ./config/panopto-sync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `panopto-sync init` | Create the state database and its tables |
//! | `panopto-sync full-sync` | Sync the configured window into the index |
//! | `panopto-sync incremental-sync` | Sync from the last checkpoint to now |
//! | `panopto-sync status` | Show stored checkpoints and manifest size |
//!
//! Sync commands print their statistics as JSON on stdout; logs go to
//! stderr.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use panopto_sync::models::JobType;
use panopto_sync::{config, logging, migrate, status, sync};

/// Panopto Sync: index video session metadata into a search engine.
#[derive(Parser)]
#[command(
    name = "panopto-sync",
    about = "Sync Panopto session metadata into a search index",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/panopto-sync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the state database schema.
    ///
    /// Creates the checkpoint and manifest tables. Safe to run repeatedly.
    Init,

    /// Sync every session in the configured window.
    FullSync {
        /// Index into memory and do not write a checkpoint.
        #[arg(long)]
        dry_run: bool,
    },

    /// Sync sessions since the last checkpoint, merging into existing
    /// documents.
    IncrementalSync {
        /// Index into memory and do not write a checkpoint.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show stored checkpoints.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    let _log_guard = logging::init_logging(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!(
                "State database initialized at {}.",
                cfg.state.path.display()
            );
        }
        Commands::FullSync { dry_run } => {
            let stats = sync::run_job(&cfg, JobType::Full, dry_run).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::IncrementalSync { dry_run } => {
            let stats = sync::run_job(&cfg, JobType::Incremental, dry_run).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
    }

    Ok(())
}
