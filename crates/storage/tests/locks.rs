mod common;

use std::time::Duration;

use common::store;
use jobvault_storage::{StorageConnection, StorageError};

#[tokio::test]
async fn second_holder_times_out_while_lock_is_held() -> anyhow::Result<()> {
    let store = store().await?;
    let first = store.connection();
    let second = store.connection();

    let mut guard = first
        .acquire_distributed_lock("recurring-jobs", Duration::from_secs(1))
        .await?;

    let err = second
        .acquire_distributed_lock("recurring-jobs", Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::LockTimeout { .. }));

    guard.release().await?;
    guard.release().await?;

    let mut again = second
        .acquire_distributed_lock("recurring-jobs", Duration::from_millis(200))
        .await?;
    again.release().await?;
    Ok(())
}

#[tokio::test]
async fn waiter_acquires_once_holder_releases() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    let mut guard = connection
        .acquire_distributed_lock("scheduler", Duration::from_secs(1))
        .await?;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        guard.release().await.expect("release succeeds");
    });

    let mut waiter = connection
        .acquire_distributed_lock("scheduler", Duration::from_secs(2))
        .await?;
    waiter.release().await?;
    Ok(())
}

#[tokio::test]
async fn held_lock_is_renewed_past_its_ttl() -> anyhow::Result<()> {
    // Locks in the test store lease for 2s and renew every ~666ms.
    let store = store().await?;
    let connection = store.connection();

    let mut guard = connection
        .acquire_distributed_lock("long-running", Duration::ZERO)
        .await?;
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert!(!guard.is_lost());
    let err = connection
        .acquire_distributed_lock("long-running", Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::LockTimeout { .. }));

    guard.release().await?;
    Ok(())
}

#[tokio::test]
async fn dropped_guard_releases_the_lock() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    {
        let _guard = connection
            .acquire_distributed_lock("scoped", Duration::ZERO)
            .await?;
    }

    let mut guard = connection
        .acquire_distributed_lock("scoped", Duration::from_secs(1))
        .await?;
    guard.release().await?;
    Ok(())
}

#[tokio::test]
async fn expired_lease_can_be_taken_over() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    sqlx::query(
        "INSERT INTO distributed_lock (resource, owner, acquired_at, expire_at) \
         VALUES ('crashed', 'dead-process', 0, 1)",
    )
    .execute(store.storage.pool())
    .await?;

    let mut guard = connection
        .acquire_distributed_lock("crashed", Duration::ZERO)
        .await?;
    guard.release().await?;
    Ok(())
}

#[tokio::test]
async fn blank_resource_is_an_argument_error() -> anyhow::Result<()> {
    let store = store().await?;
    let err = store
        .connection()
        .acquire_distributed_lock("", Duration::ZERO)
        .await
        .unwrap_err();
    assert!(err.is_argument());
    Ok(())
}

#[tokio::test]
async fn unbounded_timeout_acquires_and_waits_without_panicking() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    let mut guard = connection
        .acquire_distributed_lock("unbounded", Duration::MAX)
        .await?;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        guard.release().await.expect("release succeeds");
    });

    let mut waiter = connection
        .acquire_distributed_lock("unbounded", Duration::MAX)
        .await?;
    waiter.release().await?;
    Ok(())
}
