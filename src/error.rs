//! Error types for datastore handles and their managers.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Fatal-class errors (see [`DbError::is_fatal`]) are returned like any other error;
//! deciding whether to end the process is left to the startup code that owns the
//! managers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration section '{section}' not found")]
    ConfigurationNotFound { section: String },

    #[error("Cannot read entry '{entry}' of configuration section '{section}' as an object")]
    MalformedConfigurationEntry { section: String, entry: String },

    #[error("Mandatory {field} for '{handle}' not found")]
    MandatoryFieldMissing { handle: String, field: String },

    #[error("Configuration of '{handle}' is unusable: {reason}")]
    ConfigurationUnusable { handle: String, reason: String },

    #[error("Cannot connect to '{handle}': {message}")]
    Connection {
        handle: String,
        message: String,
        suggestion: String,
        /// Set when the handle was configured with `must_connected`
        mandatory: bool,
    },

    #[error("Cannot encode or decode value of '{handle}' key '{key}': {message}")]
    Serialization {
        handle: String,
        key: String,
        message: String,
    },

    #[error("Key '{key}' not found in '{handle}'")]
    KeyNotFound { handle: String, key: String },

    #[error("Operation on '{handle}' key '{key}' failed: {message}")]
    Operation {
        handle: String,
        key: String,
        message: String,
    },

    #[error("'{handle}' is not connected")]
    NotConnected { handle: String },

    #[error("Handle not found: {name}")]
    HandleNotFound { name: String },

    #[error("Database error on '{handle}': {message}")]
    Database {
        handle: String,
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Timeout on '{handle}': {operation} exceeded {elapsed_secs}s")]
    Timeout {
        handle: String,
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl DbError {
    /// Create a configuration-not-found error.
    pub fn configuration_not_found(section: impl Into<String>) -> Self {
        Self::ConfigurationNotFound {
            section: section.into(),
        }
    }

    /// Create a malformed configuration entry error.
    pub fn malformed_entry(section: impl Into<String>, entry: impl Into<String>) -> Self {
        Self::MalformedConfigurationEntry {
            section: section.into(),
            entry: entry.into(),
        }
    }

    /// Create a mandatory-field-missing error.
    pub fn mandatory_field_missing(handle: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MandatoryFieldMissing {
            handle: handle.into(),
            field: field.into(),
        }
    }

    /// Create a configuration-unusable error.
    pub fn configuration_unusable(handle: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigurationUnusable {
            handle: handle.into(),
            reason: reason.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(
        handle: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
        mandatory: bool,
    ) -> Self {
        Self::Connection {
            handle: handle.into(),
            message: message.into(),
            suggestion: suggestion.into(),
            mandatory,
        }
    }

    /// Create a serialization error.
    pub fn serialization(
        handle: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Serialization {
            handle: handle.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a key-not-found error.
    pub fn key_not_found(handle: impl Into<String>, key: impl Into<String>) -> Self {
        Self::KeyNotFound {
            handle: handle.into(),
            key: key.into(),
        }
    }

    /// Create an operation error.
    pub fn operation(
        handle: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Operation {
            handle: handle.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a not-connected error.
    pub fn not_connected(handle: impl Into<String>) -> Self {
        Self::NotConnected {
            handle: handle.into(),
        }
    }

    /// Create a handle-not-found error.
    pub fn handle_not_found(name: impl Into<String>) -> Self {
        Self::HandleNotFound { name: name.into() }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        handle: impl Into<String>,
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            handle: handle.into(),
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(
        handle: impl Into<String>,
        operation: impl Into<String>,
        elapsed_secs: u32,
    ) -> Self {
        Self::Timeout {
            handle: handle.into(),
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a configuration document error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error must stop process startup.
    ///
    /// True for missing mandatory configuration and for connection failures of
    /// handles configured with `must_connected`.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::MandatoryFieldMissing { .. } => true,
            Self::Connection { mandatory, .. } => *mandatory,
            _ => false,
        }
    }

    /// Map a driver error raised while `handle` ran a statement.
    pub fn from_sqlx(handle: &str, err: sqlx::Error) -> Self {
        let (message, sql_state, suggestion) = match err {
            sqlx::Error::Database(db_err) => (
                db_err.message().to_string(),
                db_err.code().map(|c| c.to_string()),
                "Check the SQL syntax and referenced objects",
            ),
            sqlx::Error::RowNotFound => (
                "No rows returned".to_string(),
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => (
                "Timed out waiting for a pooled connection".to_string(),
                None,
                "Raise max_connections or acquire_timeout_secs",
            ),
            sqlx::Error::PoolClosed => (
                "Connection pool is closed".to_string(),
                None,
                "Reconnect the handle before issuing queries",
            ),
            sqlx::Error::Io(io_err) => (
                format!("I/O error: {}", io_err),
                None,
                "Check network connectivity and database server status",
            ),
            sqlx::Error::ColumnDecode { index, source } => (
                format!("Failed to decode column {}: {}", index, source),
                None,
                "Cast the column to a supported type",
            ),
            other => (
                other.to_string(),
                None,
                "Check the database driver configuration",
            ),
        };
        Self::database(handle, message, sql_state, suggestion)
    }
}

/// Result type alias for datastore operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("main", "refused", "Check the server", false);
        assert!(err.to_string().contains("Cannot connect to 'main'"));
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "main",
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(DbError::not_connected("cache").suggestion(), None);
    }

    #[test]
    fn test_mandatory_errors_are_fatal() {
        assert!(DbError::mandatory_field_missing("main", "address").is_fatal());
        assert!(DbError::connection("main", "refused", "retry", true).is_fatal());
    }

    #[test]
    fn test_recoverable_errors_are_not_fatal() {
        assert!(!DbError::configuration_unusable("main", "no address").is_fatal());
        assert!(!DbError::connection("main", "refused", "retry", false).is_fatal());
        assert!(!DbError::key_not_found("cache", "k").is_fatal());
        assert!(!DbError::configuration_not_found("redis").is_fatal());
    }

    #[test]
    fn test_errors_carry_handle_and_key() {
        let err = DbError::operation("cache", "session:1", "broken pipe");
        let msg = err.to_string();
        assert!(msg.contains("cache"));
        assert!(msg.contains("session:1"));

        let err = DbError::serialization("cache", "session:1", "expected value");
        assert!(err.to_string().contains("session:1"));
    }

    #[test]
    fn test_sqlx_errors_name_the_handle() {
        let err = DbError::from_sqlx("reports", sqlx::Error::RowNotFound);
        assert!(matches!(err, DbError::Database { ref handle, .. } if handle == "reports"));
        assert!(err.to_string().contains("'reports'"));

        let err = DbError::from_sqlx("reports", sqlx::Error::PoolTimedOut);
        assert!(err.suggestion().unwrap().contains("max_connections"));
    }

    #[test]
    fn test_timeout_names_the_handle() {
        let err = DbError::timeout("reports", "query", 5);
        assert_eq!(
            err.to_string(),
            "Timeout on 'reports': query exceeded 5s"
        );
    }
}
