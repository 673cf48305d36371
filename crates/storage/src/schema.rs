//! Schema installation.
//!
//! Every statement is `CREATE ... IF NOT EXISTS`, so installing over an
//! existing database is a no-op.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::{StorageResult, store_err};

const INIT_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Create any missing tables and indexes.
pub async fn install(pool: &SqlitePool) -> StorageResult<()> {
    sqlx::raw_sql(INIT_SQL)
        .execute(pool)
        .await
        .map_err(store_err("install_schema"))?;
    info!("jobvault schema installed");
    Ok(())
}
