//! Error types for the migration engine.

use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur while migrating a package.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Descriptor or seed file is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The database could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Table introspection failed.
    #[error("Failed to describe table '{table}': {message}")]
    Describe {
        /// Table name.
        table: String,
        /// Underlying failure.
        message: String,
    },

    /// A backed-up row could not be re-inserted during copy-back.
    #[error("Failed to copy row back into '{table}': {message}")]
    RowCopy {
        /// Table name.
        table: String,
        /// Underlying failure.
        message: String,
    },

    /// Unique constraint introspection or drop failed.
    #[error("Constraint error on '{table}': {message}")]
    Constraint {
        /// Table name.
        table: String,
        /// Underlying failure.
        message: String,
    },

    /// Database operation error.
    #[error("Database error: {0}")]
    Database(String),

    /// Invalid table descriptor.
    #[error("Descriptor error: {0}")]
    Descriptor(String),

    /// Invalid seed data.
    #[error("Seed error: {0}")]
    Seed(String),

    /// Transaction could not be committed or rolled back.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// General migration error.
    #[error("Migration error: {0}")]
    Other(String),
}

impl MigrationError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a describe error.
    pub fn describe(table: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Describe {
            table: table.into(),
            message: msg.into(),
        }
    }

    /// Create a row copy error.
    pub fn row_copy(table: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::RowCopy {
            table: table.into(),
            message: msg.into(),
        }
    }

    /// Create a constraint error.
    pub fn constraint(table: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Constraint {
            table: table.into(),
            message: msg.into(),
        }
    }

    /// Create a descriptor error.
    pub fn descriptor(msg: impl Into<String>) -> Self {
        Self::Descriptor(msg.into())
    }

    /// Create a seed error.
    pub fn seed(msg: impl Into<String>) -> Self {
        Self::Seed(msg.into())
    }

    /// Create a transaction error.
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Create an other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Check if the engine recovers from this error locally instead of
    /// aborting the package transaction.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Describe { .. } | Self::RowCopy { .. } | Self::Constraint { .. }
        )
    }

    /// Check if this error happened before any transaction was opened.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrationError::describe("roles", "relation does not exist");
        let msg = err.to_string();
        assert!(msg.contains("roles"));
        assert!(msg.contains("relation does not exist"));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(MigrationError::row_copy("roles", "null value").is_recoverable());
        assert!(MigrationError::constraint("roles", "no such constraint").is_recoverable());
        assert!(!MigrationError::database("syntax error").is_recoverable());
        assert!(!MigrationError::transaction("commit failed").is_recoverable());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(MigrationError::connection("refused").is_connection_error());
        assert!(!MigrationError::seed("duplicate id").is_connection_error());
    }
}
