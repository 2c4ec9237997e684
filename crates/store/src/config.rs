//! Persistence configuration
//!
//! A workspace directory plus the backend that should hold session and state
//! data. Loadable from TOML:
//!
//! ```toml
//! workspace = "/var/lib/picoclaw"
//! persistence = "sqlite"
//! ```

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File name of the embedded database inside the workspace.
pub const DATABASE_FILE: &str = "picoclaw.db";

/// Which durable backend mirrors the in-memory caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceType {
    /// One JSON snapshot file per entity
    #[default]
    Json,
    /// Rows in the workspace SQLite database
    Sqlite,
}

impl PersistenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistenceType::Json => "json",
            PersistenceType::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for PersistenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersistenceType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(PersistenceType::Json),
            "sqlite" => Ok(PersistenceType::Sqlite),
            other => Err(StoreError::Config(format!(
                "unknown persistence type '{}', expected json or sqlite",
                other
            ))),
        }
    }
}

/// Where and how session/state data is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub workspace: PathBuf,
    #[serde(default)]
    pub persistence: PersistenceType,
    /// Overrides `<workspace>/sessions` as the snapshot directory.
    #[serde(default)]
    pub sessions_dir: Option<PathBuf>,
}

impl StoreConfig {
    pub fn new(workspace: impl Into<PathBuf>, persistence: PersistenceType) -> Self {
        Self {
            workspace: workspace.into(),
            persistence,
            sessions_dir: None,
        }
    }

    pub fn from_toml_str(content: &str) -> StoreResult<Self> {
        toml::from_str(content).map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> StoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.sessions_dir
            .clone()
            .unwrap_or_else(|| self.workspace.join("sessions"))
    }

    pub fn state_file(&self) -> PathBuf {
        self.workspace.join("state").join("state.json")
    }

    /// Pre-`state/` layout, still read for one-time migration.
    pub fn legacy_state_file(&self) -> PathBuf {
        self.workspace.join("state.json")
    }

    pub fn database_path(&self) -> PathBuf {
        self.workspace.join(DATABASE_FILE)
    }
}
