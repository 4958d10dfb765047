//! CLI error types and result alias.

use miette::Diagnostic;
use thiserror::Error;

use strata_migrate::MigrationError;
use strata_postgres::PgError;

/// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// IO error
    #[error("IO error: {0}")]
    #[diagnostic(code(strata::io))]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    #[diagnostic(code(strata::config), help("check strata.toml and DATABASE_URL"))]
    Config(String),

    /// Descriptor or seed files could not be loaded
    #[error("Manifest error: {0}")]
    #[diagnostic(code(strata::manifest))]
    Manifest(String),

    /// Migration error
    #[error("Migration error: {0}")]
    #[diagnostic(code(strata::migration))]
    Migration(String),

    /// Database error
    #[error("Database error: {0}")]
    #[diagnostic(code(strata::database))]
    Database(String),

    /// Command error
    #[error("Command error: {0}")]
    #[diagnostic(code(strata::command))]
    Command(String),

    /// A chained package process failed
    #[error("package '{package}' failed with exit code {code}")]
    #[diagnostic(code(strata::chain))]
    Chain {
        /// Package run by the child process.
        package: String,
        /// Child exit code, or -1 when it was killed by a signal.
        code: i32,
    },
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Config(format!("Failed to parse TOML: {}", err))
    }
}

impl From<MigrationError> for CliError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::Connection(msg) => CliError::Database(msg),
            MigrationError::Descriptor(msg) | MigrationError::Seed(msg) => CliError::Manifest(msg),
            other => CliError::Migration(other.to_string()),
        }
    }
}

impl From<PgError> for CliError {
    fn from(err: PgError) -> Self {
        match err {
            PgError::Config(msg) => CliError::Config(msg),
            other => CliError::Database(other.to_string()),
        }
    }
}
