//! Cross-process mutual exclusion on the `distributed_lock` table.
//!
//! ## Features
//!
//! - **Leased ownership**: a lock is a row with an owner and an expiry; an
//!   expired row can be taken over by anyone
//! - **Atomic acquire**: one conditional upsert, so two processes can never
//!   both observe success for the same resource
//! - **Bounded wait**: retries with capped exponential backoff until the
//!   caller's timeout, then `StorageError::LockTimeout`
//! - **Renewal**: a held guard extends its lease every third of the TTL
//! - **Scoped release**: `release()` is idempotent and `Drop` releases in the
//!   background when the guard goes out of scope without it

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use jobvault_core::time::{millis_after, to_millis};

use crate::error::{StorageError, StorageResult, require_non_empty, store_err};

const BACKOFF_BASE: Duration = Duration::from_millis(20);
const BACKOFF_MAX: Duration = Duration::from_millis(1000);

const ACQUIRE_SQL: &str = r#"
INSERT INTO distributed_lock (resource, owner, acquired_at, expire_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT (resource) DO UPDATE
SET owner = excluded.owner,
    acquired_at = excluded.acquired_at,
    expire_at = excluded.expire_at
WHERE distributed_lock.expire_at <= ?3
"#;

/// Lock factory bound to a pool and a lease length.
#[derive(Debug, Clone)]
pub struct DistributedLock {
    pool: SqlitePool,
    ttl: Duration,
}

impl DistributedLock {
    pub fn new(pool: SqlitePool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    /// Acquire `resource`, waiting at most `timeout`.
    ///
    /// A zero timeout makes exactly one attempt. A timeout too large to
    /// represent as a deadline waits without bound.
    #[instrument(skip(self), err)]
    pub async fn acquire(&self, resource: &str, timeout: Duration) -> StorageResult<LockGuard> {
        require_non_empty("lock resource", resource)?;

        let owner = Uuid::now_v7().to_string();
        let deadline = Instant::now().checked_add(timeout);
        let mut backoff = BACKOFF_BASE;

        loop {
            if self.try_acquire(resource, &owner).await? {
                debug!(resource, owner = %owner, "lock acquired");
                return Ok(LockGuard::start(
                    self.pool.clone(),
                    resource.to_string(),
                    owner,
                    self.ttl,
                ));
            }

            let mut delay = next_delay(backoff);
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(StorageError::LockTimeout {
                        resource: resource.to_string(),
                        timeout,
                    });
                }
                delay = delay.min(remaining);
            }

            tokio::time::sleep(delay).await;
            backoff = backoff.saturating_mul(2);
        }
    }

    /// Whether a live (unexpired) lease exists for `resource`.
    pub async fn is_locked(&self, resource: &str) -> StorageResult<bool> {
        let held: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM distributed_lock WHERE resource = ?1 AND expire_at > ?2",
        )
        .bind(resource)
        .bind(to_millis(Utc::now()))
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("is_locked"))?;
        Ok(held.is_some())
    }

    async fn try_acquire(&self, resource: &str, owner: &str) -> StorageResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(ACQUIRE_SQL)
            .bind(resource)
            .bind(owner)
            .bind(to_millis(now))
            .bind(millis_after(now, self.ttl))
            .execute(&self.pool)
            .await
            .map_err(store_err("acquire_lock"))?;
        Ok(result.rows_affected() == 1)
    }
}

/// A held lock.
///
/// Released on `release()` or, best-effort, when dropped.
#[derive(Debug)]
pub struct LockGuard {
    pool: SqlitePool,
    resource: String,
    owner: String,
    renewal: CancellationToken,
    renew_task: Option<JoinHandle<()>>,
    lost: Arc<AtomicBool>,
    released: bool,
}

impl LockGuard {
    fn start(pool: SqlitePool, resource: String, owner: String, ttl: Duration) -> Self {
        let renewal = CancellationToken::new();
        let lost = Arc::new(AtomicBool::new(false));
        let renew_task = tokio::spawn(renew_loop(
            pool.clone(),
            resource.clone(),
            owner.clone(),
            ttl,
            renewal.clone(),
            lost.clone(),
        ));

        Self {
            pool,
            resource,
            owner,
            renewal,
            renew_task: Some(renew_task),
            lost,
            released: false,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// True once a renewal found the lease taken over by another owner.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// Release the lock. Calling it again is a no-op.
    pub async fn release(&mut self) -> StorageResult<()> {
        if self.released {
            return Ok(());
        }
        self.renewal.cancel();
        if let Some(task) = self.renew_task.take() {
            let _ = task.await;
        }

        let result = sqlx::query("DELETE FROM distributed_lock WHERE resource = ?1 AND owner = ?2")
            .bind(&self.resource)
            .bind(&self.owner)
            .execute(&self.pool)
            .await
            .map_err(store_err("release_lock"))?;
        self.released = true;

        if result.rows_affected() == 0 {
            warn!(resource = %self.resource, "lock lease had already been taken over at release");
        } else {
            debug!(resource = %self.resource, "lock released");
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.renewal.cancel();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                resource = %self.resource,
                "lock dropped outside a runtime; it frees when the lease lapses"
            );
            return;
        };
        let pool = self.pool.clone();
        let resource = std::mem::take(&mut self.resource);
        let owner = std::mem::take(&mut self.owner);
        handle.spawn(async move {
            let result =
                sqlx::query("DELETE FROM distributed_lock WHERE resource = ?1 AND owner = ?2")
                    .bind(&resource)
                    .bind(&owner)
                    .execute(&pool)
                    .await;
            if let Err(e) = result {
                warn!(resource = %resource, error = %e, "failed to release dropped lock");
            }
        });
    }
}

async fn renew_loop(
    pool: SqlitePool,
    resource: String,
    owner: String,
    ttl: Duration,
    cancel: CancellationToken,
    lost: Arc<AtomicBool>,
) {
    let period = (ttl / 3).max(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(period) => {}
        }

        let result = sqlx::query(
            "UPDATE distributed_lock SET expire_at = ?1 WHERE resource = ?2 AND owner = ?3",
        )
        .bind(millis_after(Utc::now(), ttl))
        .bind(&resource)
        .bind(&owner)
        .execute(&pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => {
                warn!(resource = %resource, "lock lease lost before renewal");
                lost.store(true, Ordering::Release);
                return;
            }
            Ok(_) => {}
            Err(e) => warn!(resource = %resource, error = %e, "lock renewal failed; retrying"),
        }
    }
}

/// Backoff step plus 0-24ms of jitter.
fn next_delay(backoff: Duration) -> Duration {
    backoff.min(BACKOFF_MAX) + Duration::from_millis(jitter_millis())
}

fn jitter_millis() -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    u64::from(nanos) % 25
}
