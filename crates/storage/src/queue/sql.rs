//! Polling queue backend on the `job_queue` table.
//!
//! A fetch claims the oldest visible entry by stamping it with `fetched_at`
//! and a fresh fetch token in a single `UPDATE ... RETURNING`. The token is
//! the lease: removing or requeueing an entry only succeeds while the token
//! still matches, so an entry re-claimed after the invisibility timeout can
//! not be finalized by its previous holder.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use jobvault_core::JobId;
use jobvault_core::time::{millis_before, to_millis};

use crate::config::StorageOptions;
use crate::error::{StorageError, StorageResult, store_err};

use super::{FetchedJob, JobQueue};

const CLAIM_SQL: &str = r#"
UPDATE job_queue
SET fetched_at = ?1, fetch_token = ?2
WHERE id = (
    SELECT id FROM job_queue
    WHERE queue IN (SELECT value FROM json_each(?3))
      AND (fetched_at IS NULL OR fetched_at < ?4)
    ORDER BY id
    LIMIT 1
)
RETURNING id, job_id, queue
"#;

const REQUEUE_SQL: &str =
    "UPDATE job_queue SET fetched_at = NULL, fetch_token = NULL WHERE id = ?1 AND fetch_token = ?2";

/// Default queue backend.
#[derive(Debug, Clone)]
pub struct SqlJobQueue {
    pool: SqlitePool,
    poll_interval: Duration,
    invisibility_timeout: Duration,
}

impl SqlJobQueue {
    pub fn new(pool: SqlitePool, options: &StorageOptions) -> Self {
        Self {
            pool,
            poll_interval: options.queue_poll_interval,
            invisibility_timeout: options.invisibility_timeout,
        }
    }

    /// One claim attempt; `None` when no entry is visible.
    async fn try_claim(&self, queues_json: &str) -> StorageResult<Option<SqlFetchedJob>> {
        let now = Utc::now();
        let token = Uuid::now_v7().to_string();

        let row = sqlx::query(CLAIM_SQL)
            .bind(to_millis(now))
            .bind(&token)
            .bind(queues_json)
            .bind(millis_before(now, self.invisibility_timeout))
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err("fetch_next_job"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.try_get("id").map_err(store_err("fetch_next_job"))?;
        let job_id: i64 = row.try_get("job_id").map_err(store_err("fetch_next_job"))?;
        let queue: String = row.try_get("queue").map_err(store_err("fetch_next_job"))?;

        Ok(Some(SqlFetchedJob {
            pool: self.pool.clone(),
            entry_id: id,
            job_id: JobId::from_i64(job_id),
            queue,
            token,
            finished: false,
        }))
    }
}

#[async_trait]
impl JobQueue for SqlJobQueue {
    fn name(&self) -> &str {
        "sql"
    }

    async fn enqueue(
        &self,
        conn: &mut SqliteConnection,
        queue: &str,
        job_id: JobId,
    ) -> StorageResult<()> {
        sqlx::query("INSERT INTO job_queue (job_id, queue) VALUES (?1, ?2)")
            .bind(job_id.as_i64())
            .bind(queue)
            .execute(conn)
            .await
            .map_err(store_err("enqueue"))?;
        Ok(())
    }

    #[instrument(skip(self, cancel), err)]
    async fn dequeue(
        &self,
        queues: &[String],
        cancel: &CancellationToken,
    ) -> StorageResult<Box<dyn FetchedJob>> {
        let queues_json = serde_json::to_string(queues)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        loop {
            if cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }

            if let Some(fetched) = self.try_claim(&queues_json).await? {
                debug!(job_id = %fetched.job_id, queue = %fetched.queue, "job fetched");
                return Ok(Box::new(fetched));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(StorageError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

/// A claimed `job_queue` entry.
///
/// Dropping it without finalizing requeues the entry in the background.
#[derive(Debug)]
pub struct SqlFetchedJob {
    pool: SqlitePool,
    entry_id: i64,
    job_id: JobId,
    queue: String,
    token: String,
    finished: bool,
}

impl SqlFetchedJob {
    async fn release(&self) -> StorageResult<u64> {
        let result = sqlx::query(REQUEUE_SQL)
            .bind(self.entry_id)
            .bind(&self.token)
            .execute(&self.pool)
            .await
            .map_err(store_err("requeue"))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl FetchedJob for SqlFetchedJob {
    fn job_id(&self) -> JobId {
        self.job_id
    }

    fn queue(&self) -> &str {
        &self.queue
    }

    async fn remove_from_queue(&mut self) -> StorageResult<()> {
        if self.finished {
            return Ok(());
        }
        let result = sqlx::query("DELETE FROM job_queue WHERE id = ?1 AND fetch_token = ?2")
            .bind(self.entry_id)
            .bind(&self.token)
            .execute(&self.pool)
            .await
            .map_err(store_err("remove_from_queue"))?;
        self.finished = true;

        if result.rows_affected() == 0 {
            return Err(StorageError::LostLease(format!(
                "queue entry for job {} was re-fetched by another worker",
                self.job_id
            )));
        }
        Ok(())
    }

    async fn requeue(&mut self) -> StorageResult<()> {
        if self.finished {
            return Ok(());
        }
        let affected = self.release().await?;
        self.finished = true;

        if affected == 0 {
            return Err(StorageError::LostLease(format!(
                "queue entry for job {} was re-fetched by another worker",
                self.job_id
            )));
        }
        Ok(())
    }
}

impl Drop for SqlFetchedJob {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                job_id = %self.job_id,
                "fetched job dropped outside a runtime; entry stays invisible until timeout"
            );
            return;
        };

        let pool = self.pool.clone();
        let entry_id = self.entry_id;
        let job_id = self.job_id;
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            let result = sqlx::query(REQUEUE_SQL)
                .bind(entry_id)
                .bind(token)
                .execute(&pool)
                .await;
            if let Err(e) = result {
                warn!(job_id = %job_id, error = %e, "failed to requeue dropped job");
            }
        });
    }
}
