//! Embedded SQLite backend shared by the session and state stores.
//!
//! A [`Database`] wraps exactly one connection behind a mutex, so every
//! statement issued through a handle is serialized: there is never more than
//! one writer per handle. Handles are cheap to clone.

pub mod inspector;
pub mod schema;

pub use inspector::{CellValue, Table, TableInspector, TableRow};

use crate::error::{StoreError, StoreResult};
use crate::model::{GlobalState, Message, Role, Session};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Row key of the serialized [`GlobalState`] in `global_state`.
pub const STATE_KEY: &str = "state";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Option<Connection>>>,
    path: PathBuf,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Database {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // journal_mode answers with the mode now in effect
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        schema::init_schema(&conn)?;

        Ok(Self::from_connection(conn, path.to_path_buf()))
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;
        Ok(Self::from_connection(conn, PathBuf::from(":memory:")))
    }

    fn from_connection(conn: Connection, path: PathBuf) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Release the connection. Calling this more than once is a no-op.
    pub fn close(&self) -> StoreResult<()> {
        let conn = self.conn.lock().take();
        match conn {
            Some(conn) => conn.close().map_err(|(_, e)| StoreError::from(e)),
            None => Ok(()),
        }
    }

    /// Run `f` against the connection while holding the writer lock.
    pub(crate) fn with_conn<R, F>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut Connection) -> Result<R, rusqlite::Error>,
    {
        let mut guard = self.conn.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| StoreError::BackendUnavailable("database is closed".to_string()))?;
        f(conn).map_err(StoreError::from)
    }

    // ------------------------------------------------------------------
    // sessions / messages
    // ------------------------------------------------------------------

    /// Insert the session row, or update summary and `updated_at` if it exists.
    pub fn upsert_session(&self, session: &Session) -> StoreResult<()> {
        let row = SessionRow::encode(session)?;
        self.with_conn(|conn| row.upsert(conn))
    }

    /// Upsert the session row and append one message, in one transaction.
    pub fn append_message(&self, session: &Session, message: &Message) -> StoreResult<()> {
        let row = SessionRow::encode(session)?;
        let encoded = MessageRow::encode(message)?;
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            row.upsert(&tx)?;
            encoded.insert(&tx, &row.key)?;
            tx.commit()
        })
    }

    /// Upsert the session row and replace its whole history, in one
    /// transaction. Rows of other sessions are untouched.
    pub fn write_session(&self, session: &Session) -> StoreResult<()> {
        let row = SessionRow::encode(session)?;
        let encoded = encode_messages(&session.messages)?;
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            row.upsert(&tx)?;
            replace_message_rows(&tx, &row.key, &encoded)?;
            tx.commit()
        })
    }

    /// Load every session with its history, messages in insertion order.
    pub fn load_sessions(&self) -> StoreResult<Vec<Session>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT key, summary, created_at, updated_at FROM sessions")?;
            let mut sessions = stmt
                .query_map([], |row| {
                    Ok(Session {
                        key: row.get(0)?,
                        messages: Vec::new(),
                        summary: row
                            .get::<_, Option<String>>(1)?
                            .filter(|s| !s.is_empty()),
                        created: parse_timestamp(row.get(2)?),
                        updated: parse_timestamp(row.get(3)?),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut index: HashMap<String, usize> = HashMap::with_capacity(sessions.len());
            for (i, session) in sessions.iter().enumerate() {
                index.insert(session.key.clone(), i);
            }

            let mut msg_stmt =
                conn.prepare("SELECT session_key, role, content FROM messages ORDER BY id ASC")?;
            let rows = msg_stmt.query_map([], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?;
            for row in rows {
                let (key, role, content) = row?;
                let Some(&i) = key.as_ref().and_then(|k| index.get(k)) else {
                    continue;
                };
                sessions[i]
                    .messages
                    .push(decode_message(role.as_deref(), content.unwrap_or_default()));
            }

            Ok(sessions)
        })
    }

    // ------------------------------------------------------------------
    // global state
    // ------------------------------------------------------------------

    pub fn upsert_state(&self, state: &GlobalState) -> StoreResult<()> {
        let value = serde_json::to_string(state)?;
        let now = format_timestamp(OffsetDateTime::now_utc())?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO global_state (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![STATE_KEY, value, now],
            )?;
            Ok(())
        })
    }

    /// Stored state, `None` if nothing has been written yet.
    pub fn load_state(&self) -> StoreResult<Option<GlobalState>> {
        let value: Option<Option<String>> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM global_state WHERE key = ?1",
                params![STATE_KEY],
                |row| row.get(0),
            )
            .optional()
        })?;
        match value.flatten() {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // counters
    // ------------------------------------------------------------------

    pub fn message_count(&self) -> StoreResult<u64> {
        self.count_rows(schema::MESSAGES_TABLE)
    }

    pub fn session_count(&self) -> StoreResult<u64> {
        self.count_rows(schema::SESSIONS_TABLE)
    }

    fn count_rows(&self, table: &'static str) -> StoreResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let count: i64 = self.with_conn(|conn| conn.query_row(&sql, [], |row| row.get(0)))?;
        Ok(count.max(0) as u64)
    }
}

/// Pre-encoded `sessions` row, built outside the writer lock.
struct SessionRow {
    key: String,
    summary: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    fn encode(session: &Session) -> StoreResult<Self> {
        Ok(Self {
            key: session.key.clone(),
            summary: session.summary.clone(),
            created_at: format_timestamp(session.created)?,
            updated_at: format_timestamp(session.updated)?,
        })
    }

    fn upsert(&self, conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO sessions (key, summary, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET summary = excluded.summary, updated_at = excluded.updated_at",
            params![self.key, self.summary, self.created_at, self.updated_at],
        )?;
        Ok(())
    }
}

struct MessageRow {
    role: &'static str,
    content: String,
    created_at: String,
}

impl MessageRow {
    fn encode(message: &Message) -> StoreResult<Self> {
        Ok(Self {
            role: message.role.as_str(),
            content: serde_json::to_string(message)?,
            created_at: format_timestamp(OffsetDateTime::now_utc())?,
        })
    }

    fn insert(&self, conn: &Connection, session_key: &str) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO messages (session_key, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![session_key, self.role, self.content, self.created_at],
        )?;
        Ok(())
    }
}

fn encode_messages(messages: &[Message]) -> StoreResult<Vec<MessageRow>> {
    messages.iter().map(MessageRow::encode).collect()
}

fn replace_message_rows(
    tx: &Transaction<'_>,
    key: &str,
    rows: &[MessageRow],
) -> Result<(), rusqlite::Error> {
    tx.execute("DELETE FROM messages WHERE session_key = ?1", params![key])?;
    for row in rows {
        row.insert(tx, key)?;
    }
    Ok(())
}

/// Rows written by this crate hold a JSON message; anything else is kept as
/// plain text under the row's role.
fn decode_message(role: Option<&str>, content: String) -> Message {
    match serde_json::from_str::<Message>(&content) {
        Ok(message) => message,
        Err(_) => Message::new(role.and_then(Role::parse).unwrap_or(Role::User), content),
    }
}

pub(crate) fn format_timestamp(ts: OffsetDateTime) -> StoreResult<String> {
    ts.format(&Rfc3339)
        .map_err(|e| StoreError::Serialization(format!("timestamp {}: {}", ts, e)))
}

/// Reads the timestamp layouts found in picoclaw databases; NULL or anything
/// unrecognised reads as now.
pub(crate) fn parse_timestamp(raw: Option<String>) -> OffsetDateTime {
    let Some(raw) = raw else {
        return OffsetDateTime::now_utc();
    };
    match parse_known_timestamp(raw.trim()) {
        Some(ts) => ts,
        None => {
            log::debug!("db: unrecognised timestamp {:?}, using now", raw);
            OffsetDateTime::now_utc()
        }
    }
}

/// RFC 3339, then `YYYY-MM-DD HH:MM:SS[.fff][ ][±HH[:]MM][ ZONE]` as written
/// by SQLite's `CURRENT_TIMESTAMP` and by Go drivers. No offset means UTC.
fn parse_known_timestamp(raw: &str) -> Option<OffsetDateTime> {
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(ts);
    }

    // Go's time.Time String() ends with a zone abbreviation after the offset.
    let raw = match raw.rsplit_once(' ') {
        Some((head, zone)) if !zone.is_empty() && zone.chars().all(|c| c.is_ascii_alphabetic()) => {
            head
        }
        _ => raw,
    };

    let with_offset = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]][optional [ ]][offset_hour sign:mandatory][optional [:]][offset_minute]"
    );
    if let Ok(ts) = OffsetDateTime::parse(raw, &with_offset) {
        return Some(ts);
    }

    let naive = format_description!("[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]");
    PrimitiveDateTime::parse(raw, &naive)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}
