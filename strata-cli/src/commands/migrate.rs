//! `strata migrate` - migrate one package, then hand over to the next.

use tokio::process::Command;
use tracing::{error, info};

use super::{Context, run_package};
use crate::cli::MigrateArgs;
use crate::error::{CliError, CliResult};
use crate::output;

/// Run the migrate command
pub async fn run(ctx: &Context, args: MigrateArgs) -> CliResult<()> {
    output::header(&format!("Migrate {}", ctx.package));

    let report = run_package(ctx, false).await?;
    output::report(&report, false);
    output::success(&report.summary());

    if args.no_chain {
        return Ok(());
    }
    match ctx.config.next_package(&ctx.package)? {
        Some(next) => chain(ctx, &next.name).await,
        None => Ok(()),
    }
}

/// Start a fresh process for the next package and wait for it. The current
/// package has already committed, so a failure here leaves it in place.
async fn chain(ctx: &Context, next: &str) -> CliResult<()> {
    let exe = std::env::current_exe()?;
    output::info(&format!("Starting package '{}'", next));
    info!(package = %next, "Spawning next package");

    let status = Command::new(exe).args(ctx.child_args(next)).status().await?;
    if status.success() {
        return Ok(());
    }

    let code = status.code().unwrap_or(-1);
    error!(package = %next, code, "Chained package failed");
    Err(CliError::Chain {
        package: next.to_string(),
        code,
    })
}
