//! Session Store: per-conversation history and summaries.
//!
//! The cache is the source of truth while the process runs. Each mutation
//! updates it under the write lock, releases the lock, then hands a copy of
//! the affected session to the [`SessionBackend`] chosen at construction.
//!
//! Persistence calls are ordered by a separate `persist` mutex that is taken
//! before the write lock and held until the backend returns. Backend writes
//! therefore land in the same order as the cache mutations that caused them,
//! while readers only ever wait for in-memory work.
//!
//! The `persist` mutex also guards the set of keys whose backend copy is
//! behind the cache: a session whose migration or last write failed. The next
//! mutation of such a key rewrites the whole session instead of a delta.

pub mod backend;
pub mod migrate;

#[cfg(test)]
mod store_tests;

pub use backend::{JsonSessionBackend, SessionBackend, SqliteSessionBackend, session_file_name};
pub use migrate::{LoadedSnapshot, MigrationReport};

use crate::config::{PersistenceType, StoreConfig};
use crate::db::Database;
use crate::error::StoreResult;
use crate::model::{Message, Role, Session};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    persist: Mutex<HashSet<String>>,
    backend: Box<dyn SessionBackend>,
    storage: PathBuf,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("storage", &self.storage)
            .field("persistence", &self.persistence())
            .field("sessions", &self.sessions.read().len())
            .finish()
    }
}

impl SessionStore {
    /// Build the store for `config`, loading whatever is already persisted.
    ///
    /// In SQLite mode flat session files are migrated into the database and
    /// archived. If the database cannot be opened the store falls back to JSON
    /// files for the rest of its life; construction itself never fails.
    pub fn open(config: &StoreConfig) -> Self {
        let storage = config.sessions_dir();
        if let Err(e) = fs::create_dir_all(&storage) {
            log::warn!(
                "session: cannot create storage directory {}: {}",
                storage.display(),
                e
            );
        }

        let backend: Box<dyn SessionBackend> = match config.persistence {
            PersistenceType::Json => Box::new(JsonSessionBackend::new(&storage)),
            PersistenceType::Sqlite => match Database::open(config.database_path()) {
                Ok(db) => Box::new(SqliteSessionBackend::new(db)),
                Err(e) => {
                    log::error!(
                        "session: failed to open database {}, falling back to json: {}",
                        config.database_path().display(),
                        e
                    );
                    Box::new(JsonSessionBackend::new(&storage))
                }
            },
        };

        Self::with_backend(storage, backend)
    }

    /// Build a store over an explicit backend. Snapshot files under `storage`
    /// are loaded, and migrated when the backend has a database.
    pub fn with_backend(storage: impl Into<PathBuf>, backend: Box<dyn SessionBackend>) -> Self {
        let storage = storage.into();
        let snapshots = migrate::load_snapshot_dir(&storage);

        let mut sessions: HashMap<String, Session> = HashMap::with_capacity(snapshots.len());
        let stale = match backend.database() {
            Some(db) => load_from_database(db, &snapshots, &mut sessions),
            None => {
                for snap in snapshots {
                    sessions.insert(snap.session.key.clone(), snap.session);
                }
                HashSet::new()
            }
        };

        log::debug!(
            "session: loaded {} sessions ({} backend)",
            sessions.len(),
            backend.persistence()
        );

        Self {
            sessions: RwLock::new(sessions),
            persist: Mutex::new(stale),
            backend,
            storage,
        }
    }

    /// Effective persistence mode, after any fallback at construction.
    pub fn persistence(&self) -> PersistenceType {
        self.backend.persistence()
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage
    }

    /// Handle to the database when running in SQLite mode.
    pub fn database(&self) -> Option<&Database> {
        self.backend.database()
    }

    /// Copy of the session for `key`, created empty if it does not exist yet.
    ///
    /// A failure to persist the new session row is logged; the session stays
    /// in the cache and is written again by the next mutation.
    pub fn get_or_create(&self, key: &str) -> Session {
        if let Some(session) = self.sessions.read().get(key) {
            return session.clone();
        }

        let mut stale = self.persist.lock();
        let created = {
            let mut sessions = self.sessions.write();
            if let Some(session) = sessions.get(key) {
                return session.clone();
            }
            let session = Session::new(key);
            sessions.insert(key.to_string(), session.clone());
            session
        };

        if let Err(e) = self.backend.created(&created) {
            log::warn!("session: failed to persist new session {}: {}", key, e);
            stale.insert(key.to_string());
        }
        created
    }

    pub fn add_message(
        &self,
        key: &str,
        role: Role,
        content: impl Into<String>,
    ) -> StoreResult<()> {
        self.add_full_message(key, Message::new(role, content))
    }

    /// Append `message`, creating the session if needed.
    ///
    /// The cache is always updated. In SQLite mode the message row is written
    /// before returning and its error, if any, is returned. If the database
    /// copy of the session is known to be behind, the whole session is written.
    pub fn add_full_message(&self, key: &str, message: Message) -> StoreResult<()> {
        let mut stale = self.persist.lock();
        let resync = stale.contains(key);
        let snapshot = {
            let mut sessions = self.sessions.write();
            let session = sessions
                .entry(key.to_string())
                .or_insert_with(|| Session::new(key));
            session.messages.push(message.clone());
            session.touch();
            if resync {
                session.clone()
            } else {
                session.metadata()
            }
        };

        let result = if resync {
            self.backend.history_replaced(&snapshot)
        } else {
            self.backend.message_added(&snapshot, &message)
        };
        track(&mut stale, key, &result);
        result
    }

    /// Copy of the history; empty for an unknown key.
    pub fn get_history(&self, key: &str) -> Vec<Message> {
        self.sessions
            .read()
            .get(key)
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }

    pub fn get_summary(&self, key: &str) -> Option<String> {
        self.sessions.read().get(key).and_then(|s| s.summary.clone())
    }

    /// Replace the summary. An empty string clears it. Unknown keys are ignored.
    pub fn set_summary(&self, key: &str, summary: impl Into<String>) -> StoreResult<()> {
        let summary = Some(summary.into()).filter(|s| !s.is_empty());
        self.mutate(key, |session| {
            session.summary = summary;
            session.touch();
            Some(Change::Metadata)
        })
    }

    /// Keep only the last `keep_last` messages; `0` clears the history.
    ///
    /// Nothing is written when the history already fits.
    pub fn truncate_history(&self, key: &str, keep_last: usize) -> StoreResult<()> {
        self.mutate(key, |session| {
            let len = session.messages.len();
            if len <= keep_last {
                return None;
            }
            session.messages.drain(..len - keep_last);
            session.touch();
            Some(Change::History)
        })
    }

    /// Replace the whole history, e.g. after compaction. Unknown keys are ignored.
    pub fn set_history(&self, key: &str, history: Vec<Message>) -> StoreResult<()> {
        self.mutate(key, |session| {
            session.messages = history;
            session.touch();
            Some(Change::History)
        })
    }

    /// Make the session for `key` durable.
    ///
    /// JSON mode writes the whole snapshot atomically; SQLite mode refreshes
    /// the metadata row, or the whole session if an earlier write failed. An
    /// unsafe key is rejected before the cache is consulted, and an unknown key
    /// is a successful no-op.
    pub fn save(&self, key: &str) -> StoreResult<()> {
        self.backend.check_key(key)?;

        let mut stale = self.persist.lock();
        let snapshot = match self.sessions.read().get(key) {
            Some(session) => session.clone(),
            None => return Ok(()),
        };
        let result = if stale.contains(key) {
            self.backend
                .history_replaced(&snapshot)
                .and_then(|()| self.backend.save(&snapshot))
        } else {
            self.backend.save(&snapshot)
        };
        track(&mut stale, key, &result);
        result
    }

    /// Cached session keys, sorted.
    pub fn session_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sessions.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Release the database connection, if any. Idempotent.
    pub fn close(&self) -> StoreResult<()> {
        self.backend.close()
    }

    /// Apply `f` to a cached session and forward the resulting change to the
    /// backend. `f` returns `None` when it left the session untouched.
    fn mutate<F>(&self, key: &str, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Session) -> Option<Change>,
    {
        let mut stale = self.persist.lock();
        let (whole, snapshot) = {
            let mut sessions = self.sessions.write();
            let Some(session) = sessions.get_mut(key) else {
                return Ok(());
            };
            let Some(change) = f(session) else {
                return Ok(());
            };
            let whole = matches!(change, Change::History) || stale.contains(key);
            let snapshot = if whole {
                session.clone()
            } else {
                session.metadata()
            };
            (whole, snapshot)
        };

        let result = if whole {
            self.backend.history_replaced(&snapshot)
        } else {
            self.backend.metadata_changed(&snapshot)
        };
        track(&mut stale, key, &result);
        result
    }
}

/// Record whether the backend copy of `key` caught up with the cache.
fn track(stale: &mut HashSet<String>, key: &str, result: &StoreResult<()>) {
    if result.is_ok() {
        stale.remove(key);
    } else {
        stale.insert(key.to_string());
    }
}

#[derive(Debug, Clone, Copy)]
enum Change {
    Metadata,
    History,
}

/// Fill the cache from flat files and the database, migrating the files.
/// Rows already in the database win over files with the same key.
///
/// Returns the keys whose files could not be written to the database.
fn load_from_database(
    db: &Database,
    snapshots: &[LoadedSnapshot],
    sessions: &mut HashMap<String, Session>,
) -> HashSet<String> {
    let existing = match db.load_sessions() {
        Ok(rows) => rows,
        Err(e) => {
            log::warn!("session: failed to load sessions from database: {}", e);
            Vec::new()
        }
    };
    let existing_keys: HashSet<String> = existing.iter().map(|s| s.key.clone()).collect();

    for snap in snapshots {
        sessions.insert(snap.session.key.clone(), snap.session.clone());
    }
    for session in existing {
        sessions.insert(session.key.clone(), session);
    }

    if snapshots.is_empty() {
        return HashSet::new();
    }

    log::info!(
        "session: migrating {} session files to sqlite",
        snapshots.len()
    );
    let report = migrate::migrate_to_database(db, snapshots, &existing_keys);
    log::info!(
        "session: migration done: {} migrated, {} already present, {} archived, {} failed",
        report.migrated,
        report.already_present,
        report.archived,
        report.failed
    );
    report.unwritten.into_iter().collect()
}
