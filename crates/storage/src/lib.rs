//! Durable storage for background jobs on SQLite.
//!
//! The framework talks to the store only through [`StorageConnection`]:
//! job creation and reads, job parameters, state lookups, keyed collections
//! (sets, hashes, lists, counters) with expiry, server liveness, queue
//! dispatch, batched writes and distributed locks.
//!
//! [`SqlStorage`] opens the pool from [`StorageOptions`], installs the schema
//! and hands out connections.

pub mod config;
pub mod connection;
pub mod error;
pub mod lock;
pub mod maintenance;
pub mod queue;
pub mod schema;
pub mod storage;
pub mod transaction;

mod rows;

pub use config::{JournalMode, StorageOptions};
pub use connection::{SqlStorageConnection, StorageConnection};
pub use error::{StorageError, StorageResult};
pub use lock::{DistributedLock, LockGuard};
pub use maintenance::{CountersAggregator, ExpirationManager, MaintenanceHandle};
pub use queue::{FetchedJob, JobQueue, QueueRegistry, SqlFetchedJob, SqlJobQueue};
pub use storage::SqlStorage;
pub use transaction::{SqlWriteTransaction, WriteTransaction};
