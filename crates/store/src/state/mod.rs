//! State Store: the workspace-wide [`GlobalState`] singleton.
//!
//! Unlike sessions, every setter persists before returning in both modes.

pub mod backend;

pub use backend::{JsonStateBackend, SqliteStateBackend, StateBackend};

use crate::config::{PersistenceType, StoreConfig};
use crate::db::{Database, TableInspector};
use crate::error::StoreResult;
use crate::model::GlobalState;
use crate::snapshot;
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

pub struct StateStore {
    state: RwLock<GlobalState>,
    persist: Mutex<()>,
    backend: Box<dyn StateBackend>,
    database_path: PathBuf,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("persistence", &self.persistence())
            .field("state", &*self.state.read())
            .finish()
    }
}

impl StateStore {
    /// Build the store for `config` and resolve the initial state.
    ///
    /// SQLite mode imports `state/state.json` (or the legacy `state.json`)
    /// into the database and archives it. JSON mode reads the current file,
    /// or copies the legacy file to the current path. Anything unreadable
    /// starts from the zero state; construction never fails.
    pub fn open(config: &StoreConfig) -> Self {
        let state_file = config.state_file();
        if let Some(dir) = state_file.parent() {
            if let Err(e) = fs::create_dir_all(dir) {
                log::warn!("state: cannot create {}: {}", dir.display(), e);
            }
        }

        let database_path = config.database_path();
        let backend: Box<dyn StateBackend> = match config.persistence {
            PersistenceType::Json => Box::new(JsonStateBackend::new(&state_file)),
            PersistenceType::Sqlite => match Database::open(&database_path) {
                Ok(db) => Box::new(SqliteStateBackend::new(db)),
                Err(e) => {
                    log::error!(
                        "state: failed to open database {}, falling back to json: {}",
                        database_path.display(),
                        e
                    );
                    Box::new(JsonStateBackend::new(&state_file))
                }
            },
        };

        let initial = match backend.persistence() {
            PersistenceType::Sqlite => {
                resolve_sqlite(backend.as_ref(), &state_file, &config.legacy_state_file())
            }
            PersistenceType::Json => {
                resolve_json(backend.as_ref(), &state_file, &config.legacy_state_file())
            }
        };

        Self::with_backend(backend, initial, database_path)
    }

    /// Build a store over an explicit backend, starting from `initial`.
    pub fn with_backend(
        backend: Box<dyn StateBackend>,
        initial: GlobalState,
        database_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            state: RwLock::new(initial),
            persist: Mutex::new(()),
            backend,
            database_path: database_path.into(),
        }
    }

    /// Effective persistence mode, after any fallback at construction.
    pub fn persistence(&self) -> PersistenceType {
        self.backend.persistence()
    }

    pub fn set_last_channel(&self, channel: impl Into<String>) -> StoreResult<()> {
        let channel = channel.into();
        self.update(|state| state.last_channel = channel)
    }

    pub fn set_last_chat_id(&self, chat_id: impl Into<String>) -> StoreResult<()> {
        let chat_id = chat_id.into();
        self.update(|state| state.last_chat_id = chat_id)
    }

    pub fn get_last_channel(&self) -> String {
        self.state.read().last_channel.clone()
    }

    pub fn get_last_chat_id(&self) -> String {
        self.state.read().last_chat_id.clone()
    }

    /// Time of the last setter call, `None` until something was set.
    pub fn get_timestamp(&self) -> Option<OffsetDateTime> {
        self.state.read().timestamp
    }

    pub fn snapshot(&self) -> GlobalState {
        self.state.read().clone()
    }

    /// Path of the workspace database, whether or not it is in use.
    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn database(&self) -> Option<&Database> {
        self.backend.database()
    }

    /// Rows in `messages`; zero when not running on SQLite.
    pub fn message_count(&self) -> StoreResult<u64> {
        match self.backend.database() {
            Some(db) => db.message_count(),
            None => Ok(0),
        }
    }

    /// Rows in `sessions`; zero when not running on SQLite.
    pub fn session_count(&self) -> StoreResult<u64> {
        match self.backend.database() {
            Some(db) => db.session_count(),
            None => Ok(0),
        }
    }

    /// Raw table access, available only on SQLite.
    pub fn inspector(&self) -> Option<TableInspector> {
        self.backend.database().cloned().map(TableInspector::new)
    }

    /// Release the database connection, if any. Idempotent.
    pub fn close(&self) -> StoreResult<()> {
        self.backend.close()
    }

    fn update<F>(&self, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut GlobalState),
    {
        let _persist = self.persist.lock();
        let snapshot = {
            let mut state = self.state.write();
            f(&mut state);
            state.timestamp = Some(OffsetDateTime::now_utc());
            state.clone()
        };
        self.backend.save(&snapshot)
    }
}

/// Import a flat state file into the database, then read the database.
fn resolve_sqlite(backend: &dyn StateBackend, current: &Path, legacy: &Path) -> GlobalState {
    let mut state = GlobalState::default();

    let source = [current, legacy].into_iter().find(|p| p.exists());
    if let Some(path) = source {
        match snapshot::read_snapshot::<GlobalState>(path) {
            Ok(Some(from_file)) => {
                match backend.save(&from_file) {
                    Ok(()) => {
                        log::info!("state: migrated state from {} to sqlite", path.display());
                        // A legacy file shadowed by the current one is stale; archive it too.
                        for file in [current, legacy].into_iter().filter(|p| p.exists()) {
                            if let Err(e) = snapshot::archive(file) {
                                log::warn!("state: failed to archive {}: {}", file.display(), e);
                            }
                        }
                    }
                    Err(e) => log::warn!(
                        "state: failed to migrate {} to sqlite: {}",
                        path.display(),
                        e
                    ),
                }
                state = from_file;
            }
            Ok(None) => {}
            Err(e) => log::warn!("state: ignoring unreadable {}: {}", path.display(), e),
        }
    }

    match backend.load() {
        Ok(Some(stored)) => stored,
        Ok(None) => state,
        Err(e) => {
            log::warn!("state: failed to load state from database: {}", e);
            state
        }
    }
}

/// Read the current state file, moving a legacy file into place if needed.
fn resolve_json(backend: &dyn StateBackend, current: &Path, legacy: &Path) -> GlobalState {
    if current.exists() {
        return match backend.load() {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                log::warn!("state: ignoring unreadable {}: {}", current.display(), e);
                GlobalState::default()
            }
        };
    }

    match snapshot::read_snapshot::<GlobalState>(legacy) {
        Ok(Some(state)) => {
            match backend.save(&state) {
                Ok(()) => log::info!(
                    "state: migrated state from {} to {}",
                    legacy.display(),
                    current.display()
                ),
                Err(e) => log::warn!("state: failed to rewrite {}: {}", current.display(), e),
            }
            state
        }
        Ok(None) => GlobalState::default(),
        Err(e) => {
            log::warn!("state: ignoring unreadable {}: {}", legacy.display(), e);
            GlobalState::default()
        }
    }
}
