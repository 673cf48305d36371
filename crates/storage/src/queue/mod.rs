//! Queue dispatch: pluggable dequeue backends selected per queue name.
//!
//! ## Components
//!
//! - `JobQueue`: a backend that stores queue entries and hands them out
//! - `FetchedJob`: the handle a worker holds while it processes one entry
//! - `QueueRegistry`: queue name -> backend, with the single-backend rule for dequeues
//! - `SqlJobQueue`: the default backend, a polling table in the same database

pub mod registry;
pub mod sql;

pub use registry::QueueRegistry;
pub use sql::{SqlFetchedJob, SqlJobQueue};

use async_trait::async_trait;
use sqlx::SqliteConnection;
use tokio_util::sync::CancellationToken;

use jobvault_core::JobId;

use crate::error::StorageResult;

/// A queue backend.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Short backend name used in logs and configuration errors.
    fn name(&self) -> &str;

    /// Add a job to `queue` as part of the caller's open transaction.
    async fn enqueue(
        &self,
        conn: &mut SqliteConnection,
        queue: &str,
        job_id: JobId,
    ) -> StorageResult<()>;

    /// Wait for the next job in any of `queues`.
    ///
    /// Resolves with `StorageError::Cancelled` once `cancel` fires; must not
    /// hold a session or lock while waiting.
    async fn dequeue(
        &self,
        queues: &[String],
        cancel: &CancellationToken,
    ) -> StorageResult<Box<dyn FetchedJob>>;
}

/// A dequeued entry, owned by the worker processing it.
///
/// Exactly one of `remove_from_queue` / `requeue` should be called; both are
/// no-ops once the entry has been finalized.
#[async_trait]
pub trait FetchedJob: Send {
    fn job_id(&self) -> JobId;

    fn queue(&self) -> &str;

    /// The job is done with; drop the entry for good.
    async fn remove_from_queue(&mut self) -> StorageResult<()>;

    /// Put the entry back so another worker can fetch it.
    async fn requeue(&mut self) -> StorageResult<()>;
}
