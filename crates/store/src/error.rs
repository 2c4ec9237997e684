//! Error types for session and state persistence

use thiserror::Error;

/// Errors that can occur while reading or writing persisted state
#[derive(Debug, Error)]
pub enum StoreError {
    /// Session key does not map to a single local filename
    #[error("Invalid session key: {0}")]
    InvalidSessionKey(String),

    /// Table name is not one of the inspectable tables
    #[error("Invalid table name: {0}")]
    UnknownTable(String),

    /// Row identifier has the wrong shape for the table's key column
    #[error("Invalid row id '{id}' for table {table}")]
    InvalidRowId { table: String, id: String },

    /// Relational backend is not open
    #[error("Database not available: {0}")]
    BackendUnavailable(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience type alias for Result with StoreError
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Validation failures are caller mistakes and must not be retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidSessionKey(_)
                | StoreError::UnknownTable(_)
                | StoreError::InvalidRowId { .. }
        )
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<tempfile::PersistError> for StoreError {
    fn from(err: tempfile::PersistError) -> Self {
        StoreError::Io(err.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_flagged() {
        assert!(StoreError::UnknownTable("x".into()).is_validation());
        assert!(StoreError::InvalidSessionKey("a/b".into()).is_validation());
        assert!(
            StoreError::InvalidRowId {
                table: "messages".into(),
                id: "abc".into()
            }
            .is_validation()
        );
        assert!(!StoreError::Database("locked".into()).is_validation());
        assert!(!StoreError::BackendUnavailable("closed".into()).is_validation());
    }

    #[test]
    fn io_errors_convert() {
        let err: StoreError = std::io::Error::other("disk full").into();
        assert!(matches!(err, StoreError::Io(_)));
        assert_eq!(err.to_string(), "I/O error: disk full");
    }
}
