//! Folds raw counter deltas into `aggregated_counter`.

use std::collections::BTreeMap;

use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, instrument};

use jobvault_core::time::to_millis;
use jobvault_core::{AggregatedCounter, Counter};

use crate::config::StorageOptions;
use crate::error::{StorageResult, store_err};
use crate::lock::DistributedLock;
use crate::rows::{AggregatedCounterRow, CounterRow};

use super::LOCK_WAIT;

const LOCK_RESOURCE: &str = "jobvault:counters-aggregator";

/// Compacts the append-only `counter` table.
///
/// Each batch moves rows out of `counter` and adds their sums into the
/// rollups in one transaction, so `get_counter` never sees a delta twice or
/// not at all.
#[derive(Debug, Clone)]
pub struct CountersAggregator {
    pool: SqlitePool,
    locks: DistributedLock,
    batch_size: u32,
}

/// Per-key sum of one batch; the latest expiry wins.
#[derive(Debug, Default, PartialEq, Eq)]
struct Delta {
    value: i64,
    expire_at: Option<i64>,
}

fn fold(counters: Vec<Counter>) -> BTreeMap<String, Delta> {
    let mut deltas: BTreeMap<String, Delta> = BTreeMap::new();
    for counter in counters {
        let delta = deltas.entry(counter.key).or_default();
        delta.value += counter.value;
        let expire_at = counter.expire_at.map(to_millis);
        delta.expire_at = delta.expire_at.max(expire_at);
    }
    deltas
}

impl CountersAggregator {
    pub fn new(pool: SqlitePool, options: &StorageOptions) -> Self {
        Self {
            locks: DistributedLock::new(pool.clone(), options.distributed_lock_ttl),
            pool,
            batch_size: options.delete_batch_size,
        }
    }

    /// Aggregate every pending delta; returns the rollups that changed.
    #[instrument(skip(self), err)]
    pub async fn aggregate_once(&self) -> StorageResult<Vec<AggregatedCounter>> {
        let mut guard = self.locks.acquire(LOCK_RESOURCE, LOCK_WAIT).await?;

        let mut updated: BTreeMap<String, AggregatedCounter> = BTreeMap::new();
        let outcome = loop {
            match self.aggregate_batch().await {
                Ok((moved, rollups)) => {
                    for rollup in rollups {
                        updated.insert(rollup.key.clone(), rollup);
                    }
                    if moved < u64::from(self.batch_size) {
                        break Ok(());
                    }
                }
                Err(e) => break Err(e),
            }
        };
        guard.release().await?;
        outcome?;

        if !updated.is_empty() {
            info!(keys = updated.len(), "counters aggregated");
        }
        Ok(updated.into_values().collect())
    }

    /// Move one batch of deltas; returns how many rows moved and the new rollups.
    async fn aggregate_batch(&self) -> StorageResult<(u64, Vec<AggregatedCounter>)> {
        let mut tx = self.pool.begin().await.map_err(store_err("aggregate_counters"))?;

        let rows: Vec<CounterRow> = sqlx::query_as(
            "DELETE FROM counter WHERE id IN \
             (SELECT id FROM counter ORDER BY id LIMIT ?1) \
             RETURNING id, key, value, expire_at",
        )
        .bind(i64::from(self.batch_size))
        .fetch_all(&mut *tx)
        .await
        .map_err(store_err("aggregate_counters"))?;

        let moved = rows.len() as u64;
        let deltas = fold(rows.into_iter().map(Counter::from).collect());

        let mut rollups = Vec::with_capacity(deltas.len());
        for (key, delta) in deltas {
            rollups.push(upsert_rollup(&mut tx, &key, &delta).await?);
        }

        tx.commit().await.map_err(store_err("aggregate_counters"))?;
        Ok((moved, rollups))
    }
}

async fn upsert_rollup(
    conn: &mut SqliteConnection,
    key: &str,
    delta: &Delta,
) -> StorageResult<AggregatedCounter> {
    let row: AggregatedCounterRow = sqlx::query_as(
        "INSERT INTO aggregated_counter (key, value, expire_at) VALUES (?1, ?2, ?3) \
         ON CONFLICT (key) DO UPDATE SET \
             value = aggregated_counter.value + excluded.value, \
             expire_at = max( \
                 COALESCE(aggregated_counter.expire_at, excluded.expire_at), \
                 COALESCE(excluded.expire_at, aggregated_counter.expire_at)) \
         RETURNING key, value, expire_at",
    )
    .bind(key)
    .bind(delta.value)
    .bind(delta.expire_at)
    .fetch_one(&mut *conn)
    .await
    .map_err(store_err("aggregate_counters"))?;
    Ok(AggregatedCounter::from(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn counter(key: &str, value: i64, expire_secs: Option<i64>) -> Counter {
        Counter {
            id: 0,
            key: key.to_string(),
            value,
            expire_at: expire_secs.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
        }
    }

    #[test]
    fn fold_sums_per_key_and_keeps_latest_expiry() {
        let deltas = fold(vec![
            counter("stats:succeeded", 1, Some(100)),
            counter("stats:succeeded", 1, Some(300)),
            counter("stats:failed", -1, None),
            counter("stats:succeeded", 1, None),
        ]);

        assert_eq!(
            deltas["stats:succeeded"],
            Delta {
                value: 3,
                expire_at: Some(300_000)
            }
        );
        assert_eq!(
            deltas["stats:failed"],
            Delta {
                value: -1,
                expire_at: None
            }
        );
    }
}
