//! `strata drop-database` - drop the configured database.

use strata_postgres::drop_database;

use super::Context;
use crate::cli::DropDatabaseArgs;
use crate::error::{CliError, CliResult};
use crate::output;

/// Run the drop-database command
pub async fn run(ctx: &Context, args: DropDatabaseArgs) -> CliResult<()> {
    if !args.yes {
        return Err(CliError::Command(
            "refusing to drop the database without --yes".to_string(),
        ));
    }

    let pg = ctx.config.database.connection_from_env()?;
    output::header("Drop Database");
    output::kv("Database", &pg.display_url());

    drop_database(&pg).await?;
    output::success(&format!("Dropped database '{}'", pg.database));
    Ok(())
}
