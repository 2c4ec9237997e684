//! Persistent state for a long-running picoclaw assistant.
//!
//! Two kinds of records are kept per workspace:
//!
//! - conversation [`Session`]s, managed by [`SessionStore`]
//! - the single [`GlobalState`], managed by [`StateStore`]
//!
//! Both stores cache everything in memory and mirror it either to JSON
//! snapshot files or to the SQLite database at `<workspace>/picoclaw.db`,
//! depending on [`PersistenceType`]. Selecting SQLite migrates any existing
//! JSON files into the database on construction.
//!
//! ```no_run
//! use picoclaw_store::{PersistenceType, Role, SessionStore, StateStore, StoreConfig};
//!
//! # fn main() -> picoclaw_store::StoreResult<()> {
//! let config = StoreConfig::new("/var/lib/picoclaw", PersistenceType::Sqlite);
//! let sessions = SessionStore::open(&config);
//! let state = StateStore::open(&config);
//!
//! sessions.add_message("telegram:42", Role::User, "hello")?;
//! state.set_last_channel("telegram")?;
//! state.set_last_chat_id("42")?;
//!
//! sessions.close()?;
//! state.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod session;
pub mod snapshot;
pub mod state;

pub use config::{DATABASE_FILE, PersistenceType, StoreConfig};
pub use db::{CellValue, Database, Table, TableInspector, TableRow};
pub use error::{StoreError, StoreResult};
pub use model::{GlobalState, Message, Role, Session};
pub use session::{MigrationReport, SessionStore};
pub use state::StateStore;
