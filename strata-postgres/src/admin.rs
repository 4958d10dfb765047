//! Database-level administration run against the maintenance database.

use tracing::{info, warn};

use crate::config::PgConfig;
use crate::ddl::quote_ident;
use crate::error::{PgError, PgResult};
use crate::pool::{PgPool, PoolConfig};

const DATABASE_EXISTS_SQL: &str = "SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)";

const TERMINATE_BACKENDS_SQL: &str = "SELECT COUNT(pg_terminate_backend(pid)) \
     FROM pg_stat_activity WHERE datname = $1 AND pid <> pg_backend_pid()";

fn maintenance_pool(config: &PgConfig) -> PgResult<PgPool> {
    PgPool::with_pool_config(
        config.maintenance(),
        PoolConfig {
            max_connections: 1,
            ..PoolConfig::default()
        },
    )
}

fn check_name(database: &str) -> PgResult<()> {
    if database.is_empty() || database.len() > 63 {
        return Err(PgError::config(format!(
            "invalid database name '{}': must be 1 to 63 bytes",
            database
        )));
    }
    Ok(())
}

/// Create the configured database when it does not exist.
///
/// Returns `true` when the database was created.
pub async fn ensure_database(config: &PgConfig) -> PgResult<bool> {
    check_name(&config.database)?;
    let pool = maintenance_pool(config)?;
    let conn = pool.get().await?;

    let rows = conn.query(DATABASE_EXISTS_SQL, &[&config.database]).await?;
    let exists = match rows.first() {
        Some(row) => row.try_get::<_, bool>(0)?,
        None => false,
    };

    let created = if exists {
        false
    } else {
        conn.batch_execute(&format!("CREATE DATABASE {}", quote_ident(&config.database)))
            .await?;
        info!(database = %config.database, "Created database");
        true
    };

    pool.close();
    Ok(created)
}

/// Drop the configured database, terminating other sessions connected to it.
pub async fn drop_database(config: &PgConfig) -> PgResult<()> {
    check_name(&config.database)?;
    let pool = maintenance_pool(config)?;
    let conn = pool.get().await?;

    let rows = conn.query(TERMINATE_BACKENDS_SQL, &[&config.database]).await?;
    let terminated = match rows.first() {
        Some(row) => row.try_get::<_, i64>(0)?,
        None => 0,
    };
    if terminated > 0 {
        warn!(database = %config.database, sessions = terminated, "Terminated open sessions");
    }

    conn.batch_execute(&format!(
        "DROP DATABASE IF EXISTS {}",
        quote_ident(&config.database)
    ))
    .await?;
    info!(database = %config.database, "Dropped database");

    pool.close();
    Ok(())
}
