use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};

/// Handle to the running maintenance tasks.
#[derive(Debug)]
pub struct MaintenanceHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl MaintenanceHandle {
    pub(crate) fn new(cancel: CancellationToken, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { cancel, tasks }
    }

    /// Stop every task and wait until they have exited.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "maintenance task ended abnormally");
            }
        }
        info!("maintenance stopped");
    }
}

/// Run `pass` now and then every `interval` until `cancel` fires.
///
/// A failed pass is logged and retried on the next tick. `LockTimeout` means
/// another process is doing the work and is not treated as a failure.
pub(crate) fn spawn_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    cancel: CancellationToken,
    mut pass: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = StorageResult<usize>> + Send + 'static,
{
    tokio::spawn(async move {
        info!(worker = name, ?interval, "maintenance worker started");
        loop {
            match pass().await {
                Ok(affected) => debug!(worker = name, affected, "maintenance pass finished"),
                Err(StorageError::LockTimeout { .. }) => {
                    debug!(worker = name, "maintenance pass skipped; lock held elsewhere")
                }
                Err(e) => warn!(worker = name, error = %e, "maintenance pass failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        debug!(worker = name, "maintenance worker exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_until_shutdown() {
        let passes = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let counter = passes.clone();
        let task = spawn_periodic("test", Duration::from_millis(10), cancel.clone(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(0)
            }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        MaintenanceHandle::new(cancel, vec![task]).shutdown().await;

        let seen = passes.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected repeated passes, saw {seen}");

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(passes.load(Ordering::SeqCst), seen);
    }
}
