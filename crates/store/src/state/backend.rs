use crate::config::PersistenceType;
use crate::db::Database;
use crate::error::StoreResult;
use crate::model::GlobalState;
use crate::snapshot;
use std::path::{Path, PathBuf};

/// Where the global state singleton is kept.
pub trait StateBackend: Send + Sync {
    fn persistence(&self) -> PersistenceType;

    /// Persisted state, `None` if nothing was written yet.
    fn load(&self) -> StoreResult<Option<GlobalState>>;

    fn save(&self, state: &GlobalState) -> StoreResult<()>;

    fn database(&self) -> Option<&Database> {
        None
    }

    fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// `state/state.json`, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonStateBackend {
    path: PathBuf,
}

impl JsonStateBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateBackend for JsonStateBackend {
    fn persistence(&self) -> PersistenceType {
        PersistenceType::Json
    }

    fn load(&self) -> StoreResult<Option<GlobalState>> {
        snapshot::read_snapshot(&self.path)
    }

    fn save(&self, state: &GlobalState) -> StoreResult<()> {
        snapshot::write_atomic(&self.path, state)
    }
}

/// The `state` row of `global_state`.
#[derive(Debug, Clone)]
pub struct SqliteStateBackend {
    db: Database,
}

impl SqliteStateBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl StateBackend for SqliteStateBackend {
    fn persistence(&self) -> PersistenceType {
        PersistenceType::Sqlite
    }

    fn load(&self) -> StoreResult<Option<GlobalState>> {
        self.db.load_state()
    }

    fn save(&self, state: &GlobalState) -> StoreResult<()> {
        self.db.upsert_state(state)
    }

    fn database(&self) -> Option<&Database> {
        Some(&self.db)
    }

    fn close(&self) -> StoreResult<()> {
        self.db.close()
    }
}
