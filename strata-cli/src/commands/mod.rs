//! CLI command implementations.

pub mod check;
pub mod drop;
pub mod migrate;

use std::ffi::OsString;

use strata_migrate::{Coordinator, RunReport};
use strata_postgres::{PgPool, PgSession, ensure_database};
use tracing::info;

use crate::cli::Cli;
use crate::config::Config;
use crate::error::{CliError, CliResult};
use crate::logging::LogFormat;
use crate::manifest;

/// Everything a command needs from the command line and `strata.toml`.
#[derive(Debug, Clone)]
pub struct Context {
    /// Loaded configuration.
    pub config: Config,
    /// Package this process runs.
    pub package: String,
    /// Log filter passed on the command line.
    pub log_level: Option<String>,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Context {
    /// Load the configuration and pick the package.
    pub fn from_cli(cli: &Cli) -> CliResult<Self> {
        let cwd = std::env::current_dir()?;
        let path = Config::locate(cli.config.as_deref(), &cwd)?;
        let config = Config::load(&path)?;
        Self::new(config, cli.package.clone(), cli.log_level.clone(), cli.log_format)
    }

    /// Build a context from an already loaded configuration.
    pub fn new(
        config: Config,
        package: Option<String>,
        log_level: Option<String>,
        log_format: LogFormat,
    ) -> CliResult<Self> {
        let package = match package {
            Some(name) => {
                config.package_index(&name)?;
                name
            }
            None => config.first_package()?.name.clone(),
        };
        Ok(Self {
            config,
            package,
            log_level,
            log_format,
        })
    }

    /// Arguments for a child process that migrates `next`.
    pub fn child_args(&self, next: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--config".into(),
            self.config.source.clone().into_os_string(),
            "--package".into(),
            next.into(),
            "--log-format".into(),
            self.log_format.as_str().into(),
        ];
        if let Some(level) = &self.log_level {
            args.push("--log-level".into());
            args.push(level.into());
        }
        args.push("migrate".into());
        args
    }
}

/// Run the pipeline for the context's package in one transaction.
pub(crate) async fn run_package(ctx: &Context, dry_run: bool) -> CliResult<RunReport> {
    let package = manifest::build(&ctx.config, &ctx.package)?;
    let pg = ctx.config.database.connection_from_env()?;

    if ctx.config.database.ensure_database && !dry_run && ensure_database(&pg).await? {
        info!(database = %pg.database, "Database created");
    }

    let pool = PgPool::new(pg)?;
    let coordinator = Coordinator::new(ctx.config.migration_config().dry_run(dry_run));

    let result = async {
        let mut conn = pool.get().await?;
        let txn = conn.transaction().await?;
        let report = coordinator.execute(&package, PgSession::new(txn)).await?;
        Ok::<_, CliError>(report)
    }
    .await;

    pool.close();
    result
}
