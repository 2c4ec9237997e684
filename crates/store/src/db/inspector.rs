//! Raw, allow-listed access to the three tables for diagnostics.
//!
//! Table and column identifiers only ever come from [`Table`]; caller input is
//! parsed into a `Table` before any SQL is built and is otherwise only bound as
//! a parameter value.

use super::Database;
use super::schema::{GLOBAL_STATE_TABLE, MESSAGES_TABLE, SESSIONS_TABLE};
use crate::error::{StoreError, StoreResult};
use indexmap::IndexMap;
use rusqlite::params;
use rusqlite::types::ValueRef;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Maximum number of rows returned by [`TableInspector::rows`].
pub const ROW_LIMIT: usize = 100;

/// The inspectable tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    GlobalState,
    Sessions,
    Messages,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::GlobalState, Table::Sessions, Table::Messages];

    pub fn name(&self) -> &'static str {
        match self {
            Table::GlobalState => GLOBAL_STATE_TABLE,
            Table::Sessions => SESSIONS_TABLE,
            Table::Messages => MESSAGES_TABLE,
        }
    }

    /// Column used to address a single row.
    pub fn key_column(&self) -> &'static str {
        match self {
            Table::GlobalState | Table::Sessions => "key",
            Table::Messages => "id",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Table {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| StoreError::UnknownTable(s.to_string()))
    }
}

/// A single cell as read from SQLite.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    /// TEXT cells, and BLOB cells decoded as lossy UTF-8
    Text(String),
}

impl From<ValueRef<'_>> for CellValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(i) => CellValue::Integer(i),
            ValueRef::Real(f) => CellValue::Real(f),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                CellValue::Text(String::from_utf8_lossy(bytes).into_owned())
            }
        }
    }
}

/// Column name → value, in table column order.
pub type TableRow = IndexMap<String, CellValue>;

#[derive(Debug, Clone)]
pub struct TableInspector {
    db: Database,
}

impl TableInspector {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn list_tables(&self) -> Vec<&'static str> {
        Table::ALL.iter().map(Table::name).collect()
    }

    /// Up to [`ROW_LIMIT`] rows, most recently inserted first.
    pub fn rows(&self, table: &str) -> StoreResult<Vec<TableRow>> {
        let table: Table = table.parse()?;
        let sql = format!(
            "SELECT * FROM {} ORDER BY rowid DESC LIMIT {}",
            table.name(),
            ROW_LIMIT
        );
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let rows = stmt.query_map([], |row| {
                let mut out = TableRow::with_capacity(columns.len());
                for (i, name) in columns.iter().enumerate() {
                    out.insert(name.clone(), CellValue::from(row.get_ref(i)?));
                }
                Ok(out)
            })?;
            rows.collect()
        })
    }

    /// Delete the row whose key column equals `id`. Returns rows removed.
    pub fn delete_row(&self, table: &str, id: &str) -> StoreResult<usize> {
        let table: Table = table.parse()?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            table.name(),
            table.key_column()
        );
        match table {
            Table::Messages => {
                let id: i64 = id.trim().parse().map_err(|_| StoreError::InvalidRowId {
                    table: table.name().to_string(),
                    id: id.to_string(),
                })?;
                self.db.with_conn(|conn| conn.execute(&sql, params![id]))
            }
            Table::GlobalState | Table::Sessions => {
                self.db.with_conn(|conn| conn.execute(&sql, params![id]))
            }
        }
    }

    /// Delete every row of `table`. Returns rows removed.
    pub fn wipe_table(&self, table: &str) -> StoreResult<usize> {
        let table: Table = table.parse()?;
        let sql = format!("DELETE FROM {}", table.name());
        self.db.with_conn(|conn| conn.execute(&sql, []))
    }
}
