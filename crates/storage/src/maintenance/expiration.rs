//! Deletes rows whose `expire_at` has passed.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info, instrument};

use jobvault_core::time::to_millis;

use crate::config::StorageOptions;
use crate::error::{StorageResult, store_err};
use crate::lock::DistributedLock;

use super::LOCK_WAIT;

const LOCK_RESOURCE: &str = "jobvault:expiration-manager";

/// Tables with an `expire_at` column, in deletion order.
///
/// Deleting a job cascades to its parameters, states and queue entries.
const TABLES: [&str; 6] = [
    "aggregated_counter",
    "job",
    "list_entry",
    "set_entry",
    "hash_entry",
    "counter",
];

/// Reaps expired rows in bounded batches.
#[derive(Debug, Clone)]
pub struct ExpirationManager {
    pool: SqlitePool,
    locks: DistributedLock,
    batch_size: u32,
}

impl ExpirationManager {
    pub fn new(pool: SqlitePool, options: &StorageOptions) -> Self {
        Self {
            locks: DistributedLock::new(pool.clone(), options.distributed_lock_ttl),
            pool,
            batch_size: options.delete_batch_size,
        }
    }

    /// Delete everything expired as of now; returns the number of rows removed.
    #[instrument(skip(self), err)]
    pub async fn run_once(&self) -> StorageResult<u64> {
        let mut guard = self.locks.acquire(LOCK_RESOURCE, LOCK_WAIT).await?;
        let now = to_millis(Utc::now());

        let mut total = 0;
        for table in TABLES {
            let removed = self.purge(table, now).await;
            match removed {
                Ok(n) => total += n,
                Err(e) => {
                    guard.release().await?;
                    return Err(e);
                }
            }
        }
        guard.release().await?;

        if total > 0 {
            info!(removed = total, "expired rows removed");
        }
        Ok(total)
    }

    async fn purge(&self, table: &'static str, now: i64) -> StorageResult<u64> {
        let sql = format!(
            "DELETE FROM {table} WHERE id IN \
             (SELECT id FROM {table} WHERE expire_at < ?1 LIMIT ?2)"
        );

        let mut removed = 0;
        loop {
            let affected = sqlx::query(&sql)
                .bind(now)
                .bind(i64::from(self.batch_size))
                .execute(&self.pool)
                .await
                .map_err(store_err("expire_rows"))?
                .rows_affected();
            removed += affected;
            debug!(table, affected, "expiration batch");

            if affected < u64::from(self.batch_size) {
                return Ok(removed);
            }
        }
    }
}
