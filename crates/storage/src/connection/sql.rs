//! SQLite-backed storage connection.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use jobvault_core::{
    Invocation, JobData, JobId, JobParameter, JobState, ServerContext, ServerRecord, StateData,
    Ttl,
};

use crate::config::StorageOptions;
use crate::error::StorageResult;
use crate::lock::{DistributedLock, LockGuard};
use crate::queue::{FetchedJob, QueueRegistry};
use crate::transaction::{Collection, SqlWriteTransaction, WriteTransaction};

use super::r#trait::StorageConnection;
use super::{collections, jobs, servers};

/// `StorageConnection` over a shared SQLite pool.
///
/// Cheap to clone; every clone shares the pool and the queue registry.
#[derive(Debug, Clone)]
pub struct SqlStorageConnection {
    pool: SqlitePool,
    registry: Arc<QueueRegistry>,
    locks: DistributedLock,
}

impl SqlStorageConnection {
    pub fn new(pool: SqlitePool, options: &StorageOptions, registry: Arc<QueueRegistry>) -> Self {
        let locks = DistributedLock::new(pool.clone(), options.distributed_lock_ttl);
        Self {
            pool,
            registry,
            locks,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl StorageConnection for SqlStorageConnection {
    async fn create_job(
        &self,
        invocation: &Invocation,
        parameters: &BTreeMap<String, String>,
        created_at: DateTime<Utc>,
        expire_in: Duration,
    ) -> StorageResult<JobId> {
        jobs::create_job(&self.pool, invocation, parameters, created_at, expire_in).await
    }

    async fn get_job_data(&self, job_id: JobId) -> StorageResult<Option<JobData>> {
        jobs::get_job_data(&self.pool, job_id).await
    }

    async fn get_state_data(&self, job_id: JobId) -> StorageResult<Option<StateData>> {
        jobs::get_state_data(&self.pool, job_id).await
    }

    async fn set_job_parameter(
        &self,
        job_id: JobId,
        name: &str,
        value: Option<&str>,
    ) -> StorageResult<()> {
        jobs::set_job_parameter(&self.pool, job_id, name, value).await
    }

    async fn get_job_parameter(&self, job_id: JobId, name: &str) -> StorageResult<Option<String>> {
        jobs::get_job_parameter(&self.pool, job_id, name).await
    }

    async fn get_job_parameters(&self, job_id: JobId) -> StorageResult<Vec<JobParameter>> {
        jobs::get_job_parameters(&self.pool, job_id).await
    }

    async fn get_state_history(&self, job_id: JobId) -> StorageResult<Vec<JobState>> {
        jobs::get_state_history(&self.pool, job_id).await
    }

    async fn get_all_items_from_set(&self, key: &str) -> StorageResult<Vec<String>> {
        collections::get_all_items_from_set(&self.pool, key).await
    }

    async fn get_range_from_set(
        &self,
        key: &str,
        start: usize,
        end: usize,
    ) -> StorageResult<Vec<String>> {
        collections::get_range_from_set(&self.pool, key, start, end).await
    }

    async fn get_first_by_lowest_score_from_set(
        &self,
        key: &str,
        from: f64,
        to: f64,
    ) -> StorageResult<Option<String>> {
        let lowest = collections::get_lowest_scored_from_set(&self.pool, key, from, to, 1).await?;
        Ok(lowest.into_iter().next())
    }

    async fn get_lowest_scored_from_set(
        &self,
        key: &str,
        from: f64,
        to: f64,
        count: usize,
    ) -> StorageResult<Vec<String>> {
        collections::get_lowest_scored_from_set(&self.pool, key, from, to, count).await
    }

    async fn get_set_contains(&self, key: &str, value: &str) -> StorageResult<bool> {
        collections::get_set_contains(&self.pool, key, value).await
    }

    async fn get_set_count(&self, key: &str) -> StorageResult<u64> {
        collections::count(&self.pool, Collection::Set, key).await
    }

    async fn get_set_ttl(&self, key: &str) -> StorageResult<Ttl> {
        collections::ttl(&self.pool, Collection::Set, key).await
    }

    async fn get_all_entries_from_hash(
        &self,
        key: &str,
    ) -> StorageResult<Option<BTreeMap<String, String>>> {
        collections::get_all_entries_from_hash(&self.pool, key).await
    }

    async fn get_value_from_hash(&self, key: &str, field: &str) -> StorageResult<Option<String>> {
        collections::get_value_from_hash(&self.pool, key, field).await
    }

    async fn get_hash_count(&self, key: &str) -> StorageResult<u64> {
        collections::count(&self.pool, Collection::Hash, key).await
    }

    async fn get_hash_ttl(&self, key: &str) -> StorageResult<Ttl> {
        collections::ttl(&self.pool, Collection::Hash, key).await
    }

    async fn set_range_in_hash(&self, key: &str, pairs: &[(String, String)]) -> StorageResult<()> {
        collections::set_range_in_hash(&self.pool, key, pairs).await
    }

    async fn get_all_items_from_list(&self, key: &str) -> StorageResult<Vec<String>> {
        collections::get_all_items_from_list(&self.pool, key).await
    }

    async fn get_range_from_list(
        &self,
        key: &str,
        start: usize,
        end: usize,
    ) -> StorageResult<Vec<String>> {
        collections::get_range_from_list(&self.pool, key, start, end).await
    }

    async fn get_list_count(&self, key: &str) -> StorageResult<u64> {
        collections::count(&self.pool, Collection::List, key).await
    }

    async fn get_list_ttl(&self, key: &str) -> StorageResult<Ttl> {
        collections::ttl(&self.pool, Collection::List, key).await
    }

    async fn get_counter(&self, key: &str) -> StorageResult<i64> {
        collections::get_counter(&self.pool, key).await
    }

    async fn announce_server(
        &self,
        server_id: &str,
        context: &ServerContext,
    ) -> StorageResult<()> {
        servers::announce_server(&self.pool, server_id, context).await
    }

    async fn heartbeat(&self, server_id: &str) -> StorageResult<()> {
        servers::heartbeat(&self.pool, server_id).await
    }

    async fn remove_server(&self, server_id: &str) -> StorageResult<()> {
        servers::remove_server(&self.pool, server_id).await
    }

    async fn remove_timed_out_servers(&self, timeout: Duration) -> StorageResult<u64> {
        servers::remove_timed_out_servers(&self.pool, timeout).await
    }

    async fn get_servers(&self) -> StorageResult<Vec<ServerRecord>> {
        servers::get_servers(&self.pool).await
    }

    #[instrument(skip(self, cancel), err)]
    async fn fetch_next_job(
        &self,
        queues: &[String],
        cancel: &CancellationToken,
    ) -> StorageResult<Box<dyn FetchedJob>> {
        let backend = self.registry.resolve_single(queues)?;
        backend.dequeue(queues, cancel).await
    }

    fn create_write_transaction(&self) -> Box<dyn WriteTransaction> {
        Box::new(SqlWriteTransaction::new(self.pool.clone(), self.registry.clone()))
    }

    async fn acquire_distributed_lock(
        &self,
        resource: &str,
        timeout: Duration,
    ) -> StorageResult<LockGuard> {
        self.locks.acquire(resource, timeout).await
    }
}
