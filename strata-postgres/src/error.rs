//! Error types for PostgreSQL operations.

use strata_migrate::MigrationError;
use thiserror::Error;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur during PostgreSQL operations.
#[derive(Error, Debug)]
pub enum PgError {
    /// Connection pool error.
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Query execution error.
    #[error("query error: {0}")]
    Query(String),

    /// Row deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl PgError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }

    /// Create a deserialization error.
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Pool(_) | Self::Connection(_) => true,
            Self::Postgres(e) => e.is_closed(),
            _ => false,
        }
    }

    /// The SQLSTATE code of a database error, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Postgres(e) => e.code().map(|c| c.code()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PgError {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}

impl From<PgError> for MigrationError {
    fn from(err: PgError) -> Self {
        if err.is_connection_error() {
            return MigrationError::Connection(err.to_string());
        }
        match err {
            PgError::Postgres(e) => {
                let message = match e.as_db_error() {
                    Some(db) => match db.detail() {
                        Some(detail) => format!("{} ({})", db.message(), detail),
                        None => db.message().to_string(),
                    },
                    None => e.to_string(),
                };
                MigrationError::Database(message)
            }
            PgError::Config(msg) => MigrationError::Connection(msg),
            PgError::Query(msg) => MigrationError::Database(msg),
            PgError::Deserialization(msg) => MigrationError::Database(msg),
            other => MigrationError::Other(other.to_string()),
        }
    }
}
