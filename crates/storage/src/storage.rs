//! Storage entry point: pool, schema, queue registry and maintenance.

use std::str::FromStr;
use std::sync::Arc;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{JournalMode, StorageOptions};
use crate::connection::SqlStorageConnection;
use crate::error::{StorageError, StorageResult, store_err};
use crate::maintenance::worker::spawn_periodic;
use crate::maintenance::{CountersAggregator, ExpirationManager, MaintenanceHandle};
use crate::queue::{JobQueue, QueueRegistry, SqlJobQueue};
use crate::schema;

/// A configured job store.
///
/// ```no_run
/// # async fn demo() -> jobvault_storage::StorageResult<()> {
/// use jobvault_storage::{SqlStorage, StorageConnection, StorageOptions};
///
/// let storage = SqlStorage::connect(StorageOptions::new("sqlite://jobs.db")).await?;
/// let connection = storage.connection();
/// let servers = connection.get_servers().await?;
/// # let _ = servers;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SqlStorage {
    pool: SqlitePool,
    options: StorageOptions,
    registry: Arc<QueueRegistry>,
}

impl SqlStorage {
    /// Open the pool, install the schema if configured, and route every queue
    /// to the SQL queue backend.
    pub async fn connect(options: StorageOptions) -> StorageResult<Self> {
        options.validate()?;

        let connect_options = SqliteConnectOptions::from_str(&options.database_url)
            .map_err(|e| {
                StorageError::configuration(format!(
                    "invalid database url '{}': {e}",
                    options.database_url
                ))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(options.busy_timeout)
            .journal_mode(match options.journal_mode {
                JournalMode::Wal => SqliteJournalMode::Wal,
                JournalMode::Delete => SqliteJournalMode::Delete,
            });

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect_options)
            .await
            .map_err(store_err("connect"))?;

        if options.prepare_schema {
            schema::install(&pool).await?;
        }

        info!(
            url = %options.database_url,
            max_connections = options.max_connections,
            journal_mode = ?options.journal_mode,
            "storage connected"
        );
        Ok(Self::with_pool(pool, options))
    }

    /// Wrap an existing pool. The schema must already be installed.
    pub fn with_pool(pool: SqlitePool, options: StorageOptions) -> Self {
        let default_queue: Arc<dyn JobQueue> = Arc::new(SqlJobQueue::new(pool.clone(), &options));
        Self {
            registry: Arc::new(QueueRegistry::new(default_queue)),
            pool,
            options,
        }
    }

    /// Serve `queues` from `backend` instead of the SQL queue.
    ///
    /// Connections created earlier keep the registry they were created with.
    pub fn with_queue_backend<I, S>(mut self, queues: I, backend: Arc<dyn JobQueue>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::make_mut(&mut self.registry).register(queues, backend);
        self
    }

    pub fn connection(&self) -> SqlStorageConnection {
        SqlStorageConnection::new(self.pool.clone(), &self.options, self.registry.clone())
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    pub fn queue_registry(&self) -> &QueueRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn expiration_manager(&self) -> ExpirationManager {
        ExpirationManager::new(self.pool.clone(), &self.options)
    }

    pub fn counters_aggregator(&self) -> CountersAggregator {
        CountersAggregator::new(self.pool.clone(), &self.options)
    }

    /// Start the expiration manager and counters aggregator on their configured intervals.
    pub fn start_maintenance(&self) -> MaintenanceHandle {
        let cancel = CancellationToken::new();

        let expiration = self.expiration_manager();
        let expiration_task = spawn_periodic(
            "expiration-manager",
            self.options.job_expiration_check_interval,
            cancel.clone(),
            move || {
                let expiration = expiration.clone();
                async move {
                    let removed = expiration.run_once().await?;
                    Ok(usize::try_from(removed).unwrap_or(usize::MAX))
                }
            },
        );

        let aggregator = self.counters_aggregator();
        let aggregator_task = spawn_periodic(
            "counters-aggregator",
            self.options.counters_aggregate_interval,
            cancel.clone(),
            move || {
                let aggregator = aggregator.clone();
                async move { Ok(aggregator.aggregate_once().await?.len()) }
            },
        );

        MaintenanceHandle::new(cancel, vec![expiration_task, aggregator_task])
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
