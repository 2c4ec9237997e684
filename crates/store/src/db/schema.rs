//! Database schema initialization
//!
//! Safe to run on every open: every statement is `IF NOT EXISTS`.

use rusqlite::Connection;

pub const GLOBAL_STATE_TABLE: &str = "global_state";
pub const SESSIONS_TABLE: &str = "sessions";
pub const MESSAGES_TABLE: &str = "messages";

/// Create the `global_state`, `sessions` and `messages` tables.
pub fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        -- Generic key/value rows; the global state lives under key 'state'
        CREATE TABLE IF NOT EXISTS global_state (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS sessions (
            key TEXT PRIMARY KEY,
            summary TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        -- content holds the JSON-encoded message
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_key TEXT,
            role TEXT,
            content TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY(session_key) REFERENCES sessions(key)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_session_key ON messages(session_key, id);
        "#,
    )
}
