//! Strata CLI - schema migration and seed reconciliation.

use clap::Parser;

use strata_cli::cli::{Cli, Command, MigrateArgs};
use strata_cli::commands::{self, Context};
use strata_cli::error::CliResult;
use strata_cli::{logging, output};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::newline();
        output::error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref(), cli.log_format)?;

    let ctx = Context::from_cli(&cli)?;
    match cli.command {
        None => commands::migrate::run(&ctx, MigrateArgs::default()).await,
        Some(Command::Migrate(args)) => commands::migrate::run(&ctx, args).await,
        Some(Command::Check) => commands::check::run(&ctx).await,
        Some(Command::DropDatabase(args)) => commands::drop::run(&ctx, args).await,
    }
}
