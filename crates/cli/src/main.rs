//! SprintPoker CLI - planning poker sessions and sprint burndown.

mod commands;
mod config;
mod simulate;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sprintpoker_core::{Card, ProjectId, SessionId, SprintId, WorkItemId};
use sprintpoker_storage::{JsonStorage, MemoryStorage};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, StorageBackend};

#[derive(Parser)]
#[command(name = "sprintpoker")]
#[command(about = "Planning poker estimation and sprint burndown", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "sprintpoker.toml")]
    config: PathBuf,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage sprints
    #[command(subcommand)]
    Sprint(SprintCommand),
    /// Manage work items
    #[command(subcommand)]
    Item(ItemCommand),
    /// Run estimation sessions
    #[command(subcommand)]
    Session(SessionCommand),
    /// Play a full concurrent round in memory and print the fanned-out events
    Simulate {
        /// Number of participants
        #[arg(long, default_value = "5")]
        participants: usize,
        /// Work item title
        #[arg(long, default_value = "Simulated story")]
        title: String,
    },
}

#[derive(Subcommand)]
enum SprintCommand {
    /// Create a sprint
    Create {
        /// Owning project
        #[arg(long)]
        project: ProjectId,
        /// Sprint name
        #[arg(long)]
        name: String,
        /// First day (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,
        /// Last day (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,
        /// Sprint goal
        #[arg(long)]
        goal: Option<String>,
        /// Mark the sprint active
        #[arg(long)]
        active: bool,
    },
    /// List the sprints of a project
    List {
        /// Owning project
        #[arg(long)]
        project: ProjectId,
    },
    /// Show sprint details
    Show {
        /// Sprint ID
        id: SprintId,
    },
    /// Show dashboard statistics
    Stats {
        /// Sprint ID
        id: SprintId,
        /// Evaluate as of this day instead of today
        #[arg(long)]
        today: Option<NaiveDate>,
    },
    /// Show the ideal and actual burndown
    Burndown {
        /// Sprint ID
        id: SprintId,
    },
    /// Rebuild daily snapshots from work item completion dates
    Rebuild {
        /// Sprint ID
        id: SprintId,
        /// Last day to rebuild (defaults to today)
        #[arg(long)]
        through: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum ItemCommand {
    /// Add a work item to a sprint
    Add {
        /// Sprint ID
        sprint: SprintId,
        /// Title
        title: String,
        /// Description
        #[arg(long, default_value = "")]
        description: String,
        /// Points, if already known
        #[arg(long)]
        points: Option<u32>,
    },
    /// List the work items of a sprint
    List {
        /// Sprint ID
        sprint: SprintId,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Start a round for a work item
    Start {
        /// Work item ID
        item: WorkItemId,
        /// Participant starting the round
        #[arg(long)]
        by: String,
    },
    /// Cast a vote ("?" for unsure)
    Vote {
        /// Session ID
        session: SessionId,
        /// Voting participant
        #[arg(long)]
        by: String,
        /// Card to play
        card: Card,
    },
    /// Reveal the votes
    Reveal {
        /// Session ID
        session: SessionId,
    },
    /// Commit the estimate
    Finalize {
        /// Session ID
        session: SessionId,
    },
    /// Discard the votes and reopen voting
    Reset {
        /// Session ID
        session: SessionId,
    },
    /// Show a session
    Show {
        /// Session ID
        session: SessionId,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_with_env(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(config = %cli.config.display(), backend = ?config.storage.backend, "configuration loaded");

    if let Commands::Simulate { participants, title } = cli.command {
        return simulate::run(&config, participants, &title).await;
    }

    let path = &config.storage.path;
    match config.storage.backend {
        StorageBackend::Memory => {
            commands::run(Arc::new(MemoryStorage::new()), &config, cli.command, cli.json).await
        }
        StorageBackend::Json => {
            let storage = JsonStorage::new(path).await?;
            commands::run(Arc::new(storage), &config, cli.command, cli.json).await
        }
        #[cfg(feature = "sqlite")]
        StorageBackend::Sqlite => {
            std::fs::create_dir_all(path)?;
            let storage = sprintpoker_storage::SqliteStorage::new(path.join("sprintpoker.db")).await?;
            commands::run(Arc::new(storage), &config, cli.command, cli.json).await
        }
        #[cfg(not(feature = "sqlite"))]
        StorageBackend::Sqlite => {
            anyhow::bail!("SQLite storage is not available in this build (enable the `sqlite` feature)")
        }
    }
}
