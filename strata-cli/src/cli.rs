//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// Strata - schema migration and seed reconciliation
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version)]
#[command(about = "Strata - schema migration and seed reconciliation", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to strata.toml
    #[arg(short, long, global = true, env = "STRATA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Package to run (defaults to the first package in the config)
    #[arg(short, long, global = true)]
    pub package: Option<String>,

    /// Log filter, e.g. `debug` or `strata_migrate=debug` (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Subcommand to execute (defaults to `migrate`)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Migrate tables and reconcile seeds, then run the next package
    Migrate(MigrateArgs),

    /// Run the pipeline for one package and roll it back
    Check,

    /// Drop the configured database
    DropDatabase(DropDatabaseArgs),
}

/// Arguments for the `migrate` command
#[derive(Args, Debug, Default)]
pub struct MigrateArgs {
    /// Do not start the next package after this one succeeds
    #[arg(long)]
    pub no_chain: bool,
}

/// Arguments for the `drop-database` command
#[derive(Args, Debug)]
pub struct DropDatabaseArgs {
    /// Confirm that the database and all its data should be dropped
    #[arg(long)]
    pub yes: bool,
}
