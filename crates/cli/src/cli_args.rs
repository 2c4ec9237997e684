use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use picoclaw_store::{PersistenceType, StoreConfig};
use std::path::PathBuf;

/// Command line arguments for the storage diagnostics CLI
#[derive(Parser, Debug)]
#[clap(
    name = "picoclaw-db",
    about = "Inspect and maintain picoclaw session and state storage"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    /// TOML file with `workspace`, `persistence` and `sessions_dir`
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Workspace directory (defaults to ~/.picoclaw/workspace)
    #[arg(short, long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Persistence backend: json or sqlite
    #[arg(short, long, global = true)]
    pub persistence: Option<PersistenceType>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Show backend, database path and row counts
    Status,
    /// List the inspectable tables
    Tables,
    /// Print the most recent rows of a table as JSON
    Rows { table: String },
    /// Delete one row by its key (`key` for global_state/sessions, `id` for messages)
    DeleteRow { table: String, id: String },
    /// Delete every row of a table
    Wipe {
        table: String,
        /// Required; wiping cannot be undone
        #[arg(long)]
        yes: bool,
    },
    /// List known session keys
    Sessions,
    /// Print a session's message history as JSON
    History { key: String },
    /// Print the global state
    State,
}

impl CliArgs {
    /// Config file first, then `--workspace` / `--persistence` on top.
    pub fn store_config(&self) -> Result<StoreConfig> {
        let mut config = match &self.config {
            Some(path) => StoreConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => StoreConfig::new(default_workspace()?, PersistenceType::default()),
        };
        if let Some(workspace) = &self.workspace {
            config.workspace = workspace.clone();
        }
        if let Some(persistence) = self.persistence {
            config.persistence = persistence;
        }
        Ok(config)
    }
}

fn default_workspace() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(".picoclaw").join("workspace"))
}
