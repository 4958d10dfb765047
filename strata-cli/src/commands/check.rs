//! `strata check` - run the pipeline and roll it back.

use super::{Context, run_package};
use crate::error::CliResult;
use crate::output;

/// Run the check command
pub async fn run(ctx: &Context) -> CliResult<()> {
    output::header(&format!("Check {}", ctx.package));

    let report = run_package(ctx, true).await?;
    output::report(&report, true);

    if report.has_changes() {
        output::warn("Changes pending; the transaction was rolled back");
    } else {
        output::success("Database matches the declared schema and seeds");
    }
    output::dim(&report.summary());
    Ok(())
}
