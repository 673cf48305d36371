//! Queue name -> backend mapping.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{StorageError, StorageResult};

use super::JobQueue;

/// Resolves the backend responsible for each queue name.
///
/// Queues without an explicit registration fall back to the default backend.
/// Resolution is deterministic and side-effect free.
#[derive(Clone)]
pub struct QueueRegistry {
    default: Arc<dyn JobQueue>,
    routes: HashMap<String, Arc<dyn JobQueue>>,
}

impl QueueRegistry {
    pub fn new(default: Arc<dyn JobQueue>) -> Self {
        Self {
            default,
            routes: HashMap::new(),
        }
    }

    /// Route `queues` to `backend`, replacing earlier registrations.
    pub fn register<I, S>(&mut self, queues: I, backend: Arc<dyn JobQueue>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for queue in queues {
            self.routes.insert(queue.into(), backend.clone());
        }
    }

    pub fn with_backend<I, S>(mut self, queues: I, backend: Arc<dyn JobQueue>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.register(queues, backend);
        self
    }

    pub fn default_backend(&self) -> &Arc<dyn JobQueue> {
        &self.default
    }

    pub fn resolve(&self, queue: &str) -> &Arc<dyn JobQueue> {
        self.routes.get(queue).unwrap_or(&self.default)
    }

    /// Resolve the one backend serving every queue in `queues`.
    ///
    /// A worker dequeues through a single backend at a time, so queues split
    /// across backends are a configuration error.
    pub fn resolve_single(&self, queues: &[String]) -> StorageResult<Arc<dyn JobQueue>> {
        if queues.is_empty() {
            return Err(StorageError::argument("queue list must not be empty"));
        }

        let mut distinct: Vec<&Arc<dyn JobQueue>> = Vec::new();
        for queue in queues {
            let backend = self.resolve(queue);
            if !distinct
                .iter()
                .any(|known| std::ptr::addr_eq(Arc::as_ptr(known), Arc::as_ptr(backend)))
            {
                distinct.push(backend);
            }
        }

        match distinct.as_slice() {
            [single] => Ok(Arc::clone(single)),
            many => {
                let names: Vec<&str> = many.iter().map(|b| b.name()).collect();
                Err(StorageError::configuration(format!(
                    "queues [{}] are served by {} different queue backends ({}); \
                     a single fetch must target queues of one backend",
                    queues.join(", "),
                    many.len(),
                    names.join(", ")
                )))
            }
        }
    }
}

impl std::fmt::Debug for QueueRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes: HashMap<&str, &str> = self
            .routes
            .iter()
            .map(|(queue, backend)| (queue.as_str(), backend.name()))
            .collect();
        f.debug_struct("QueueRegistry")
            .field("default", &self.default.name())
            .field("routes", &routes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::FetchedJob;
    use async_trait::async_trait;
    use jobvault_core::JobId;
    use sqlx::SqliteConnection;
    use tokio_util::sync::CancellationToken;

    struct NamedQueue(&'static str);

    #[async_trait]
    impl JobQueue for NamedQueue {
        fn name(&self) -> &str {
            self.0
        }

        async fn enqueue(
            &self,
            _conn: &mut SqliteConnection,
            _queue: &str,
            _job_id: JobId,
        ) -> StorageResult<()> {
            Ok(())
        }

        async fn dequeue(
            &self,
            _queues: &[String],
            _cancel: &CancellationToken,
        ) -> StorageResult<Box<dyn FetchedJob>> {
            Err(StorageError::Cancelled)
        }
    }

    fn queues(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn registry() -> QueueRegistry {
        QueueRegistry::new(Arc::new(NamedQueue("sql")))
            .with_backend(["critical", "alerts"], Arc::new(NamedQueue("redis")))
    }

    #[test]
    fn unregistered_queues_use_default() {
        let registry = registry();
        assert_eq!(registry.resolve("default").name(), "sql");
        assert_eq!(registry.resolve("critical").name(), "redis");
    }

    #[test]
    fn same_backend_queues_resolve_once() {
        let registry = registry();
        let backend = registry.resolve_single(&queues(&["critical", "alerts"])).unwrap();
        assert_eq!(backend.name(), "redis");
    }

    #[test]
    fn split_queues_are_a_configuration_error() {
        let err = registry()
            .resolve_single(&queues(&["default", "critical"]))
            .err()
            .expect("split queues must fail");
        assert!(err.is_configuration());
        assert!(err.to_string().contains("default, critical"));
    }

    #[test]
    fn empty_queue_list_is_an_argument_error() {
        let err = registry().resolve_single(&[]).err().expect("empty must fail");
        assert!(err.is_argument());
    }
}
