#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use jobvault_core::{Invocation, JobId};
use jobvault_storage::{SqlStorage, SqlStorageConnection, StorageConnection, StorageOptions};

/// A storage on a fresh database file, removed when dropped.
pub struct TestStore {
    pub storage: SqlStorage,
    _dir: TempDir,
}

impl TestStore {
    pub fn connection(&self) -> SqlStorageConnection {
        self.storage.connection()
    }
}

pub async fn store() -> anyhow::Result<TestStore> {
    store_with(|options| options).await
}

pub async fn store_with(
    configure: impl FnOnce(StorageOptions) -> StorageOptions,
) -> anyhow::Result<TestStore> {
    jobvault_observability::init_for_tests();

    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}", dir.path().join("jobs.db").display());
    let options = configure(
        StorageOptions::new(url)
            .with_queue_poll_interval(Duration::from_millis(20))
            .with_distributed_lock_ttl(Duration::from_secs(2)),
    );
    let storage = SqlStorage::connect(options).await?;
    Ok(TestStore { storage, _dir: dir })
}

pub fn invocation() -> Invocation {
    Invocation::new("Mailer", "send")
        .with_argument("string", "\"ops@example.com\"")
        .with_argument("int", "3")
}

pub async fn create_job(connection: &SqlStorageConnection) -> anyhow::Result<JobId> {
    Ok(connection
        .create_job(
            &invocation(),
            &BTreeMap::new(),
            Utc::now(),
            Duration::from_secs(3600),
        )
        .await?)
}

pub fn queues(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}
