//! Durable mirrors of the session cache.
//!
//! The store decides once, at construction, which backend it talks to. The
//! JSON backend only writes on an explicit save; the SQLite backend persists
//! every mutation as it happens.

use crate::config::PersistenceType;
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::model::{Message, Session};
use crate::snapshot;
use std::path::{Component, Path, PathBuf};

/// Persistence hooks invoked by [`super::SessionStore`] after the in-memory
/// cache has been updated and its lock released.
///
/// Metadata-only hooks receive a session whose `messages` may be empty.
pub trait SessionBackend: Send + Sync {
    fn persistence(&self) -> PersistenceType;

    /// A session was created in the cache.
    fn created(&self, session: &Session) -> StoreResult<()>;

    /// `message` was appended to `session`'s history.
    fn message_added(&self, session: &Session, message: &Message) -> StoreResult<()>;

    /// Summary or timestamps changed.
    fn metadata_changed(&self, session: &Session) -> StoreResult<()>;

    /// The history was truncated or replaced; `session.messages` is complete.
    fn history_replaced(&self, session: &Session) -> StoreResult<()>;

    /// Reject keys this backend cannot address, before any lookup happens.
    fn check_key(&self, key: &str) -> StoreResult<()>;

    /// Explicit durability point; `session.messages` is complete.
    fn save(&self, session: &Session) -> StoreResult<()>;

    fn database(&self) -> Option<&Database> {
        None
    }

    fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Map a session key to its snapshot file stem.
///
/// `:` becomes `_`; the result must be exactly one normal path component.
/// Keys that would escape the storage directory are rejected rather than
/// sanitized further, so two keys never silently share a file.
pub fn session_file_name(key: &str) -> StoreResult<String> {
    let name = key.replace(':', "_");
    let mut components = Path::new(&name).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if name.is_empty() || name == "." || !single_normal || name.contains(['/', '\\', '\0']) {
        return Err(StoreError::InvalidSessionKey(key.to_string()));
    }
    Ok(name)
}

/// One pretty-printed JSON file per session under the storage directory.
#[derive(Debug, Clone)]
pub struct JsonSessionBackend {
    storage: PathBuf,
}

impl JsonSessionBackend {
    pub fn new(storage: impl Into<PathBuf>) -> Self {
        Self {
            storage: storage.into(),
        }
    }

    pub fn session_path(&self, key: &str) -> StoreResult<PathBuf> {
        let name = session_file_name(key)?;
        Ok(self.storage.join(format!("{}.json", name)))
    }
}

impl SessionBackend for JsonSessionBackend {
    fn persistence(&self) -> PersistenceType {
        PersistenceType::Json
    }

    fn created(&self, _session: &Session) -> StoreResult<()> {
        Ok(())
    }

    fn message_added(&self, _session: &Session, _message: &Message) -> StoreResult<()> {
        Ok(())
    }

    fn metadata_changed(&self, _session: &Session) -> StoreResult<()> {
        Ok(())
    }

    fn history_replaced(&self, _session: &Session) -> StoreResult<()> {
        Ok(())
    }

    fn check_key(&self, key: &str) -> StoreResult<()> {
        session_file_name(key).map(|_| ())
    }

    fn save(&self, session: &Session) -> StoreResult<()> {
        let path = self.session_path(&session.key)?;
        snapshot::write_atomic(&path, session)
    }
}

/// Rows in the workspace database; every hook writes through immediately.
#[derive(Debug, Clone)]
pub struct SqliteSessionBackend {
    db: Database,
}

impl SqliteSessionBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl SessionBackend for SqliteSessionBackend {
    fn persistence(&self) -> PersistenceType {
        PersistenceType::Sqlite
    }

    fn created(&self, session: &Session) -> StoreResult<()> {
        self.db.upsert_session(session)
    }

    fn message_added(&self, session: &Session, message: &Message) -> StoreResult<()> {
        self.db.append_message(session, message)
    }

    fn metadata_changed(&self, session: &Session) -> StoreResult<()> {
        self.db.upsert_session(session)
    }

    fn history_replaced(&self, session: &Session) -> StoreResult<()> {
        self.db.write_session(session)
    }

    fn check_key(&self, _key: &str) -> StoreResult<()> {
        Ok(())
    }

    /// Messages are already durable, only the metadata row is refreshed.
    fn save(&self, session: &Session) -> StoreResult<()> {
        self.db.upsert_session(session)
    }

    fn database(&self) -> Option<&Database> {
        Some(&self.db)
    }

    fn close(&self) -> StoreResult<()> {
        self.db.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_replaces_delimiter() {
        assert_eq!(session_file_name("telegram:12345").unwrap(), "telegram_12345");
        assert_eq!(session_file_name("a:b:c").unwrap(), "a_b_c");
        assert_eq!(session_file_name("..x").unwrap(), "..x");
    }

    #[test]
    fn file_name_rejects_traversal() {
        for key in ["", ".", "..", "../etc", "a/b", "a\\b", "/abs", "x\0y"] {
            let err = session_file_name(key).unwrap_err();
            assert!(err.is_validation(), "key {:?} should be rejected", key);
        }
    }

    #[test]
    fn json_backend_checks_key_and_sqlite_does_not() {
        let json = JsonSessionBackend::new("/tmp/unused");
        assert!(json.check_key("../escape").is_err());

        let sqlite = SqliteSessionBackend::new(Database::open_in_memory().unwrap());
        assert!(sqlite.check_key("../escape").is_ok());
    }
}
