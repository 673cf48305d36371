//! Worker-process liveness.

use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, instrument};

use jobvault_core::time::{millis_before, to_millis};
use jobvault_core::{ServerContext, ServerData, ServerRecord};

use crate::error::{StorageError, StorageResult, require_non_empty, store_err};
use crate::rows::ServerRow;

#[instrument(skip(pool, context), fields(workers = context.worker_count), err)]
pub(super) async fn announce_server(
    pool: &SqlitePool,
    server_id: &str,
    context: &ServerContext,
) -> StorageResult<()> {
    require_non_empty("server id", server_id)?;

    let now = Utc::now();
    let data = serde_json::to_string(&ServerData::from_context(context, now))
        .map_err(|e| StorageError::Serialization(format!("server data: {e}")))?;

    sqlx::query(
        "INSERT INTO server (id, data, last_heartbeat) VALUES (?1, ?2, ?3) \
         ON CONFLICT (id) DO UPDATE \
         SET data = excluded.data, last_heartbeat = excluded.last_heartbeat",
    )
    .bind(server_id)
    .bind(data)
    .bind(to_millis(now))
    .execute(pool)
    .await
    .map_err(store_err("announce_server"))?;

    info!(server_id, queues = ?context.queues, "server announced");
    Ok(())
}

pub(super) async fn heartbeat(pool: &SqlitePool, server_id: &str) -> StorageResult<()> {
    require_non_empty("server id", server_id)?;
    sqlx::query("UPDATE server SET last_heartbeat = ?1 WHERE id = ?2")
        .bind(to_millis(Utc::now()))
        .bind(server_id)
        .execute(pool)
        .await
        .map_err(store_err("heartbeat"))?;
    Ok(())
}

#[instrument(skip(pool), err)]
pub(super) async fn remove_server(pool: &SqlitePool, server_id: &str) -> StorageResult<()> {
    require_non_empty("server id", server_id)?;
    sqlx::query("DELETE FROM server WHERE id = ?1")
        .bind(server_id)
        .execute(pool)
        .await
        .map_err(store_err("remove_server"))?;
    Ok(())
}

#[instrument(skip(pool), err)]
pub(super) async fn remove_timed_out_servers(
    pool: &SqlitePool,
    timeout: Duration,
) -> StorageResult<u64> {
    if timeout.is_zero() {
        return Err(StorageError::argument("server timeout must be positive"));
    }

    let cutoff = millis_before(Utc::now(), timeout);
    let removed = sqlx::query("DELETE FROM server WHERE last_heartbeat < ?1")
        .bind(cutoff)
        .execute(pool)
        .await
        .map_err(store_err("remove_timed_out_servers"))?
        .rows_affected();

    if removed > 0 {
        info!(removed, "timed out servers removed");
    }
    Ok(removed)
}

pub(super) async fn get_servers(pool: &SqlitePool) -> StorageResult<Vec<ServerRecord>> {
    let rows: Vec<ServerRow> =
        sqlx::query_as("SELECT id, data, last_heartbeat FROM server ORDER BY id")
            .fetch_all(pool)
            .await
            .map_err(store_err("get_servers"))?;

    rows.into_iter().map(ServerRecord::try_from).collect()
}
