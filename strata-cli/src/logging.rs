//! Tracing subscriber setup.

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

use crate::error::{CliError, CliResult};

/// Default filter when neither `--log-level` nor `RUST_LOG` is set.
pub const DEFAULT_FILTER: &str = "info";

/// Log output format.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// The flag value, for passing to a child process.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        }
    }
}

fn filter(level: Option<&str>) -> CliResult<EnvFilter> {
    match level {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|e| CliError::Config(format!("invalid log level '{}': {}", directives, e))),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
    }
}

/// Install the global subscriber. Events go to stderr.
pub fn init(level: Option<&str>, format: LogFormat) -> CliResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(level)?)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| CliError::Config(format!("failed to install logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_directives() {
        assert!(filter(Some("strata_migrate=debug")).is_ok());
        assert!(filter(Some("warn")).is_ok());
    }

    #[test]
    fn test_format_flag_values() {
        assert_eq!(LogFormat::Json.as_str(), "json");
        assert_eq!(LogFormat::default().as_str(), "pretty");
    }
}
