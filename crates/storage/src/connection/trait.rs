use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use jobvault_core::{
    Invocation, JobData, JobId, JobParameter, JobState, ServerContext, ServerRecord, StateData,
    Ttl,
};

use crate::error::StorageResult;
use crate::lock::LockGuard;
use crate::queue::FetchedJob;
use crate::transaction::WriteTransaction;

/// Storage operations exposed to the job framework.
///
/// Every operation runs against its own pooled session. Input is validated
/// before any statement is issued, so an `Argument` error never leaves a
/// partial write behind. Store failures surface as `StorageError::Store` and
/// are not retried here.
///
/// ## Ranges
///
/// `start`/`end` indexes are zero-based and inclusive. Sets are indexed in
/// insertion order, lists newest-first.
///
/// ## Expiration
///
/// Rows past their `expire_at` stay visible to every read until the
/// expiration manager deletes them.
#[async_trait]
pub trait StorageConnection: Send + Sync {
    // ---- jobs ----

    /// Store a job and its initial parameters in one transaction.
    ///
    /// `expire_at` is `created_at + expire_in`; the job has no state until a
    /// write transaction sets one.
    async fn create_job(
        &self,
        invocation: &Invocation,
        parameters: &BTreeMap<String, String>,
        created_at: DateTime<Utc>,
        expire_in: Duration,
    ) -> StorageResult<JobId>;

    /// Load a job. A payload that fails to decode is reported through
    /// `JobData::load_error`, not as an error.
    async fn get_job_data(&self, job_id: JobId) -> StorageResult<Option<JobData>>;

    /// The job's current state, `None` if it has none yet or does not exist.
    async fn get_state_data(&self, job_id: JobId) -> StorageResult<Option<StateData>>;

    /// Insert or overwrite one parameter.
    async fn set_job_parameter(
        &self,
        job_id: JobId,
        name: &str,
        value: Option<&str>,
    ) -> StorageResult<()>;

    async fn get_job_parameter(&self, job_id: JobId, name: &str) -> StorageResult<Option<String>>;

    async fn get_job_parameters(&self, job_id: JobId) -> StorageResult<Vec<JobParameter>>;

    /// Every state the job went through, oldest first.
    async fn get_state_history(&self, job_id: JobId) -> StorageResult<Vec<JobState>>;

    // ---- sets ----

    async fn get_all_items_from_set(&self, key: &str) -> StorageResult<Vec<String>>;

    async fn get_range_from_set(
        &self,
        key: &str,
        start: usize,
        end: usize,
    ) -> StorageResult<Vec<String>>;

    /// Lowest-scored member with `from <= score <= to`.
    async fn get_first_by_lowest_score_from_set(
        &self,
        key: &str,
        from: f64,
        to: f64,
    ) -> StorageResult<Option<String>>;

    /// Up to `count` members with `from <= score <= to`, lowest score first.
    async fn get_lowest_scored_from_set(
        &self,
        key: &str,
        from: f64,
        to: f64,
        count: usize,
    ) -> StorageResult<Vec<String>>;

    async fn get_set_contains(&self, key: &str, value: &str) -> StorageResult<bool>;

    async fn get_set_count(&self, key: &str) -> StorageResult<u64>;

    async fn get_set_ttl(&self, key: &str) -> StorageResult<Ttl>;

    // ---- hashes ----

    /// All fields of a hash, `None` when the hash has no fields.
    async fn get_all_entries_from_hash(
        &self,
        key: &str,
    ) -> StorageResult<Option<BTreeMap<String, String>>>;

    async fn get_value_from_hash(&self, key: &str, field: &str) -> StorageResult<Option<String>>;

    async fn get_hash_count(&self, key: &str) -> StorageResult<u64>;

    async fn get_hash_ttl(&self, key: &str) -> StorageResult<Ttl>;

    /// Upsert every field; all land or none do.
    async fn set_range_in_hash(&self, key: &str, pairs: &[(String, String)]) -> StorageResult<()>;

    // ---- lists ----

    async fn get_all_items_from_list(&self, key: &str) -> StorageResult<Vec<String>>;

    async fn get_range_from_list(
        &self,
        key: &str,
        start: usize,
        end: usize,
    ) -> StorageResult<Vec<String>>;

    async fn get_list_count(&self, key: &str) -> StorageResult<u64>;

    async fn get_list_ttl(&self, key: &str) -> StorageResult<Ttl>;

    // ---- counters ----

    /// Sum of raw deltas plus the aggregated rollup; 0 for an unknown key.
    async fn get_counter(&self, key: &str) -> StorageResult<i64>;

    // ---- servers ----

    /// Register or refresh a worker process.
    async fn announce_server(&self, server_id: &str, context: &ServerContext)
    -> StorageResult<()>;

    /// Refresh `last_heartbeat`; unknown ids are ignored.
    async fn heartbeat(&self, server_id: &str) -> StorageResult<()>;

    async fn remove_server(&self, server_id: &str) -> StorageResult<()>;

    /// Delete servers silent for longer than `timeout`; returns how many.
    async fn remove_timed_out_servers(&self, timeout: Duration) -> StorageResult<u64>;

    async fn get_servers(&self) -> StorageResult<Vec<ServerRecord>>;

    // ---- queues, transactions, locks ----

    /// Wait for the next job from `queues` through their single backend.
    async fn fetch_next_job(
        &self,
        queues: &[String],
        cancel: &CancellationToken,
    ) -> StorageResult<Box<dyn FetchedJob>>;

    fn create_write_transaction(&self) -> Box<dyn WriteTransaction>;

    async fn acquire_distributed_lock(
        &self,
        resource: &str,
        timeout: Duration,
    ) -> StorageResult<LockGuard>;
}
