//! Batched writes committed as one unit.
//!
//! Mutations are validated when added and buffered in memory. Nothing touches
//! the store until `commit`, which applies the whole batch inside a single
//! `sqlx` transaction: either every mutation lands or none does.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, instrument};

use jobvault_core::time::{millis_after, to_millis};
use jobvault_core::{JobId, NewState};

use crate::error::{StorageError, StorageResult, require_non_empty, store_err};
use crate::queue::QueueRegistry;

/// A group of mutations applied all-or-nothing.
///
/// Adding a mutation only validates and records it; `commit` applies the
/// batch in insertion order.
#[async_trait]
pub trait WriteTransaction: Send {
    fn expire_job(&mut self, job_id: JobId, expire_in: Duration) -> StorageResult<()>;

    fn persist_job(&mut self, job_id: JobId) -> StorageResult<()>;

    /// Append a state and make it the job's current state.
    fn set_job_state(&mut self, job_id: JobId, state: NewState) -> StorageResult<()>;

    /// Append a state to the history without moving the current state.
    fn add_job_state(&mut self, job_id: JobId, state: NewState) -> StorageResult<()>;

    /// Enqueue through the backend registered for `queue`.
    fn add_to_queue(&mut self, queue: &str, job_id: JobId) -> StorageResult<()>;

    fn increment_counter(&mut self, key: &str, expire_in: Option<Duration>) -> StorageResult<()>;

    fn decrement_counter(&mut self, key: &str, expire_in: Option<Duration>) -> StorageResult<()>;

    /// Add `value` to the set, or update its score if already present.
    fn add_to_set(&mut self, key: &str, value: &str, score: f64) -> StorageResult<()>;

    /// Add every value with a zero score; existing members are left alone.
    fn add_range_to_set(&mut self, key: &str, values: Vec<String>) -> StorageResult<()>;

    fn remove_from_set(&mut self, key: &str, value: &str) -> StorageResult<()>;

    fn remove_set(&mut self, key: &str) -> StorageResult<()>;

    fn insert_to_list(&mut self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove every occurrence of `value`.
    fn remove_from_list(&mut self, key: &str, value: &str) -> StorageResult<()>;

    /// Keep only newest-first positions `keep_start..=keep_end`.
    fn trim_list(&mut self, key: &str, keep_start: usize, keep_end: usize) -> StorageResult<()>;

    fn set_range_in_hash(&mut self, key: &str, pairs: Vec<(String, String)>)
    -> StorageResult<()>;

    fn remove_hash(&mut self, key: &str) -> StorageResult<()>;

    fn expire_set(&mut self, key: &str, expire_in: Duration) -> StorageResult<()>;

    fn expire_list(&mut self, key: &str, expire_in: Duration) -> StorageResult<()>;

    fn expire_hash(&mut self, key: &str, expire_in: Duration) -> StorageResult<()>;

    fn persist_set(&mut self, key: &str) -> StorageResult<()>;

    fn persist_list(&mut self, key: &str) -> StorageResult<()>;

    fn persist_hash(&mut self, key: &str) -> StorageResult<()>;

    /// Number of buffered mutations.
    fn pending(&self) -> usize;

    /// Apply every buffered mutation atomically.
    async fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Drop the batch without touching the store.
    fn discard(self: Box<Self>);
}

/// Tables holding keyed collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Collection {
    Set,
    List,
    Hash,
}

impl Collection {
    pub(crate) fn table(self) -> &'static str {
        match self {
            Self::Set => "set_entry",
            Self::List => "list_entry",
            Self::Hash => "hash_entry",
        }
    }
}

#[derive(Debug, Clone)]
enum Mutation {
    ExpireJob { job_id: JobId, expire_in: Duration },
    PersistJob { job_id: JobId },
    AddState { job_id: JobId, state: NewState, data: String, make_current: bool },
    AddToQueue { queue: String, job_id: JobId },
    Counter { key: String, delta: i64, expire_in: Option<Duration> },
    AddToSet { key: String, value: String, score: f64 },
    AddRangeToSet { key: String, values: Vec<String> },
    RemoveFromSet { key: String, value: String },
    RemoveSet { key: String },
    InsertToList { key: String, value: String },
    RemoveFromList { key: String, value: String },
    TrimList { key: String, keep_start: usize, keep_end: usize },
    SetRangeInHash { key: String, pairs: Vec<(String, String)> },
    RemoveHash { key: String },
    Expire { collection: Collection, key: String, expire_in: Duration },
    Persist { collection: Collection, key: String },
}

/// `WriteTransaction` over a SQLite pool.
pub struct SqlWriteTransaction {
    pool: SqlitePool,
    registry: Arc<QueueRegistry>,
    mutations: Vec<Mutation>,
}

impl SqlWriteTransaction {
    pub fn new(pool: SqlitePool, registry: Arc<QueueRegistry>) -> Self {
        Self {
            pool,
            registry,
            mutations: Vec::new(),
        }
    }

    fn push_state(
        &mut self,
        job_id: JobId,
        state: NewState,
        make_current: bool,
    ) -> StorageResult<()> {
        require_non_empty("state name", &state.name)?;
        let data = serde_json::to_string(&state.data)
            .map_err(|e| StorageError::Serialization(format!("state data: {e}")))?;
        self.mutations.push(Mutation::AddState {
            job_id,
            state,
            data,
            make_current,
        });
        Ok(())
    }

    fn push_keyed(&mut self, key: &str, mutation: Mutation) -> StorageResult<()> {
        require_non_empty("key", key)?;
        self.mutations.push(mutation);
        Ok(())
    }
}

impl std::fmt::Debug for SqlWriteTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlWriteTransaction")
            .field("mutations", &self.mutations)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl WriteTransaction for SqlWriteTransaction {
    fn expire_job(&mut self, job_id: JobId, expire_in: Duration) -> StorageResult<()> {
        self.mutations.push(Mutation::ExpireJob { job_id, expire_in });
        Ok(())
    }

    fn persist_job(&mut self, job_id: JobId) -> StorageResult<()> {
        self.mutations.push(Mutation::PersistJob { job_id });
        Ok(())
    }

    fn set_job_state(&mut self, job_id: JobId, state: NewState) -> StorageResult<()> {
        self.push_state(job_id, state, true)
    }

    fn add_job_state(&mut self, job_id: JobId, state: NewState) -> StorageResult<()> {
        self.push_state(job_id, state, false)
    }

    fn add_to_queue(&mut self, queue: &str, job_id: JobId) -> StorageResult<()> {
        require_non_empty("queue", queue)?;
        self.mutations.push(Mutation::AddToQueue {
            queue: queue.to_string(),
            job_id,
        });
        Ok(())
    }

    fn increment_counter(&mut self, key: &str, expire_in: Option<Duration>) -> StorageResult<()> {
        self.push_keyed(
            key,
            Mutation::Counter {
                key: key.to_string(),
                delta: 1,
                expire_in,
            },
        )
    }

    fn decrement_counter(&mut self, key: &str, expire_in: Option<Duration>) -> StorageResult<()> {
        self.push_keyed(
            key,
            Mutation::Counter {
                key: key.to_string(),
                delta: -1,
                expire_in,
            },
        )
    }

    fn add_to_set(&mut self, key: &str, value: &str, score: f64) -> StorageResult<()> {
        if !score.is_finite() {
            return Err(StorageError::argument(format!("set score must be finite, got {score}")));
        }
        self.push_keyed(
            key,
            Mutation::AddToSet {
                key: key.to_string(),
                value: value.to_string(),
                score,
            },
        )
    }

    fn add_range_to_set(&mut self, key: &str, values: Vec<String>) -> StorageResult<()> {
        self.push_keyed(
            key,
            Mutation::AddRangeToSet {
                key: key.to_string(),
                values,
            },
        )
    }

    fn remove_from_set(&mut self, key: &str, value: &str) -> StorageResult<()> {
        self.push_keyed(
            key,
            Mutation::RemoveFromSet {
                key: key.to_string(),
                value: value.to_string(),
            },
        )
    }

    fn remove_set(&mut self, key: &str) -> StorageResult<()> {
        self.push_keyed(key, Mutation::RemoveSet { key: key.to_string() })
    }

    fn insert_to_list(&mut self, key: &str, value: &str) -> StorageResult<()> {
        self.push_keyed(
            key,
            Mutation::InsertToList {
                key: key.to_string(),
                value: value.to_string(),
            },
        )
    }

    fn remove_from_list(&mut self, key: &str, value: &str) -> StorageResult<()> {
        self.push_keyed(
            key,
            Mutation::RemoveFromList {
                key: key.to_string(),
                value: value.to_string(),
            },
        )
    }

    fn trim_list(&mut self, key: &str, keep_start: usize, keep_end: usize) -> StorageResult<()> {
        if keep_end < keep_start {
            return Err(StorageError::argument(format!(
                "trim range end {keep_end} is before start {keep_start}"
            )));
        }
        self.push_keyed(
            key,
            Mutation::TrimList {
                key: key.to_string(),
                keep_start,
                keep_end,
            },
        )
    }

    fn set_range_in_hash(
        &mut self,
        key: &str,
        pairs: Vec<(String, String)>,
    ) -> StorageResult<()> {
        for (field, _) in &pairs {
            require_non_empty("hash field", field)?;
        }
        self.push_keyed(
            key,
            Mutation::SetRangeInHash {
                key: key.to_string(),
                pairs,
            },
        )
    }

    fn remove_hash(&mut self, key: &str) -> StorageResult<()> {
        self.push_keyed(key, Mutation::RemoveHash { key: key.to_string() })
    }

    fn expire_set(&mut self, key: &str, expire_in: Duration) -> StorageResult<()> {
        self.push_keyed(key, expire(Collection::Set, key, expire_in))
    }

    fn expire_list(&mut self, key: &str, expire_in: Duration) -> StorageResult<()> {
        self.push_keyed(key, expire(Collection::List, key, expire_in))
    }

    fn expire_hash(&mut self, key: &str, expire_in: Duration) -> StorageResult<()> {
        self.push_keyed(key, expire(Collection::Hash, key, expire_in))
    }

    fn persist_set(&mut self, key: &str) -> StorageResult<()> {
        self.push_keyed(key, persist(Collection::Set, key))
    }

    fn persist_list(&mut self, key: &str) -> StorageResult<()> {
        self.push_keyed(key, persist(Collection::List, key))
    }

    fn persist_hash(&mut self, key: &str) -> StorageResult<()> {
        self.push_keyed(key, persist(Collection::Hash, key))
    }

    fn pending(&self) -> usize {
        self.mutations.len()
    }

    #[instrument(skip_all, err)]
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        if self.mutations.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(store_err("begin_write_transaction"))?;
        for mutation in &self.mutations {
            apply(&mut tx, &self.registry, mutation, now).await?;
        }
        tx.commit().await.map_err(store_err("commit_write_transaction"))?;

        debug!(count = self.mutations.len(), "write transaction committed");
        Ok(())
    }

    fn discard(self: Box<Self>) {
        debug!(count = self.mutations.len(), "write transaction discarded");
    }
}

fn expire(collection: Collection, key: &str, expire_in: Duration) -> Mutation {
    Mutation::Expire {
        collection,
        key: key.to_string(),
        expire_in,
    }
}

fn persist(collection: Collection, key: &str) -> Mutation {
    Mutation::Persist {
        collection,
        key: key.to_string(),
    }
}

fn saturating_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

async fn apply(
    conn: &mut SqliteConnection,
    registry: &QueueRegistry,
    mutation: &Mutation,
    now: DateTime<Utc>,
) -> StorageResult<()> {
    match mutation {
        Mutation::ExpireJob { job_id, expire_in } => {
            sqlx::query("UPDATE job SET expire_at = ?1 WHERE id = ?2")
                .bind(millis_after(now, *expire_in))
                .bind(job_id.as_i64())
                .execute(&mut *conn)
                .await
                .map_err(store_err("expire_job"))?;
        }
        Mutation::PersistJob { job_id } => {
            sqlx::query("UPDATE job SET expire_at = NULL WHERE id = ?1")
                .bind(job_id.as_i64())
                .execute(&mut *conn)
                .await
                .map_err(store_err("persist_job"))?;
        }
        Mutation::AddState {
            job_id,
            state,
            data,
            make_current,
        } => {
            let row = sqlx::query(
                "INSERT INTO state (job_id, name, reason, created_at, data) \
                 VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id",
            )
            .bind(job_id.as_i64())
            .bind(&state.name)
            .bind(state.reason.as_deref())
            .bind(to_millis(state.created_at))
            .bind(data)
            .fetch_one(&mut *conn)
            .await
            .map_err(store_err("add_job_state"))?;

            if *make_current {
                let state_id: i64 = row.try_get("id").map_err(store_err("set_job_state"))?;
                sqlx::query("UPDATE job SET state_id = ?1, state_name = ?2 WHERE id = ?3")
                    .bind(state_id)
                    .bind(&state.name)
                    .bind(job_id.as_i64())
                    .execute(&mut *conn)
                    .await
                    .map_err(store_err("set_job_state"))?;
            }
        }
        Mutation::AddToQueue { queue, job_id } => {
            registry.resolve(queue).enqueue(conn, queue, *job_id).await?;
        }
        Mutation::Counter {
            key,
            delta,
            expire_in,
        } => {
            sqlx::query("INSERT INTO counter (key, value, expire_at) VALUES (?1, ?2, ?3)")
                .bind(key)
                .bind(delta)
                .bind(expire_in.map(|span| millis_after(now, span)))
                .execute(&mut *conn)
                .await
                .map_err(store_err("increment_counter"))?;
        }
        Mutation::AddToSet { key, value, score } => {
            sqlx::query(
                "INSERT INTO set_entry (key, value, score) VALUES (?1, ?2, ?3) \
                 ON CONFLICT (key, value) DO UPDATE SET score = excluded.score",
            )
            .bind(key)
            .bind(value)
            .bind(score)
            .execute(&mut *conn)
            .await
            .map_err(store_err("add_to_set"))?;
        }
        Mutation::AddRangeToSet { key, values } => {
            for value in values {
                sqlx::query(
                    "INSERT INTO set_entry (key, value, score) VALUES (?1, ?2, 0) \
                     ON CONFLICT (key, value) DO NOTHING",
                )
                .bind(key)
                .bind(value)
                .execute(&mut *conn)
                .await
                .map_err(store_err("add_range_to_set"))?;
            }
        }
        Mutation::RemoveFromSet { key, value } => {
            sqlx::query("DELETE FROM set_entry WHERE key = ?1 AND value = ?2")
                .bind(key)
                .bind(value)
                .execute(&mut *conn)
                .await
                .map_err(store_err("remove_from_set"))?;
        }
        Mutation::RemoveSet { key } => {
            sqlx::query("DELETE FROM set_entry WHERE key = ?1")
                .bind(key)
                .execute(&mut *conn)
                .await
                .map_err(store_err("remove_set"))?;
        }
        Mutation::InsertToList { key, value } => {
            sqlx::query("INSERT INTO list_entry (key, value) VALUES (?1, ?2)")
                .bind(key)
                .bind(value)
                .execute(&mut *conn)
                .await
                .map_err(store_err("insert_to_list"))?;
        }
        Mutation::RemoveFromList { key, value } => {
            sqlx::query("DELETE FROM list_entry WHERE key = ?1 AND value = ?2")
                .bind(key)
                .bind(value)
                .execute(&mut *conn)
                .await
                .map_err(store_err("remove_from_list"))?;
        }
        Mutation::TrimList {
            key,
            keep_start,
            keep_end,
        } => {
            sqlx::query(
                "DELETE FROM list_entry WHERE key = ?1 AND id NOT IN ( \
                     SELECT id FROM list_entry WHERE key = ?1 \
                     ORDER BY id DESC LIMIT ?2 OFFSET ?3)",
            )
            .bind(key)
            .bind(saturating_i64(keep_end - keep_start).saturating_add(1))
            .bind(saturating_i64(*keep_start))
            .execute(&mut *conn)
            .await
            .map_err(store_err("trim_list"))?;
        }
        Mutation::SetRangeInHash { key, pairs } => {
            upsert_hash_fields(conn, key, pairs).await?;
        }
        Mutation::RemoveHash { key } => {
            sqlx::query("DELETE FROM hash_entry WHERE key = ?1")
                .bind(key)
                .execute(&mut *conn)
                .await
                .map_err(store_err("remove_hash"))?;
        }
        Mutation::Expire {
            collection,
            key,
            expire_in,
        } => {
            let sql = format!("UPDATE {} SET expire_at = ?1 WHERE key = ?2", collection.table());
            sqlx::query(&sql)
                .bind(millis_after(now, *expire_in))
                .bind(key)
                .execute(&mut *conn)
                .await
                .map_err(store_err("expire_collection"))?;
        }
        Mutation::Persist { collection, key } => {
            let sql = format!("UPDATE {} SET expire_at = NULL WHERE key = ?1", collection.table());
            sqlx::query(&sql)
                .bind(key)
                .execute(&mut *conn)
                .await
                .map_err(store_err("persist_collection"))?;
        }
    }
    Ok(())
}

/// Upsert each field of a hash on an already open transaction.
pub(crate) async fn upsert_hash_fields(
    conn: &mut SqliteConnection,
    key: &str,
    pairs: &[(String, String)],
) -> StorageResult<()> {
    for (field, value) in pairs {
        sqlx::query(
            "INSERT INTO hash_entry (key, field, value) VALUES (?1, ?2, ?3) \
             ON CONFLICT (key, field) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(field)
        .bind(value)
        .execute(&mut *conn)
        .await
        .map_err(store_err("set_range_in_hash"))?;
    }
    Ok(())
}
