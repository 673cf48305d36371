mod common;

use std::time::Duration;

use common::store;
use jobvault_core::ServerContext;
use jobvault_storage::{StorageConnection, StorageError};

#[tokio::test]
async fn silent_server_is_reaped_after_timeout() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    connection
        .announce_server("s1", &ServerContext::new(2, ["default"]))
        .await?;
    connection.heartbeat("s1").await?;

    tokio::time::sleep(Duration::from_millis(700)).await;
    connection
        .announce_server("s2", &ServerContext::new(4, ["critical"]))
        .await?;
    tokio::time::sleep(Duration::from_millis(600)).await;
    connection.heartbeat("s2").await?;

    let removed = connection.remove_timed_out_servers(Duration::from_secs(1)).await?;
    assert_eq!(removed, 1);

    let remaining: Vec<String> = connection
        .get_servers()
        .await?
        .into_iter()
        .map(|server| server.id)
        .collect();
    assert_eq!(remaining, ["s2"]);
    Ok(())
}

#[tokio::test]
async fn announce_is_an_upsert() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    connection
        .announce_server("s1", &ServerContext::new(2, ["default"]))
        .await?;
    connection
        .announce_server("s1", &ServerContext::new(8, ["default", "critical"]))
        .await?;

    let servers = connection.get_servers().await?;
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].data.worker_count, 8);
    assert_eq!(servers[0].data.queues, ["default", "critical"]);
    Ok(())
}

#[tokio::test]
async fn heartbeat_and_removal_of_unknown_servers_are_no_ops() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    connection.heartbeat("ghost").await?;
    connection.remove_server("ghost").await?;
    assert!(connection.get_servers().await?.is_empty());

    connection
        .announce_server("s1", &ServerContext::new(1, ["default"]))
        .await?;
    connection.remove_server("s1").await?;
    assert!(connection.get_servers().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn heartbeat_refreshes_last_heartbeat() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    connection
        .announce_server("s1", &ServerContext::new(1, ["default"]))
        .await?;
    let before = connection.get_servers().await?[0].last_heartbeat;

    tokio::time::sleep(Duration::from_millis(20)).await;
    connection.heartbeat("s1").await?;
    let after = connection.get_servers().await?[0].last_heartbeat;

    assert!(after > before);
    Ok(())
}

#[tokio::test]
async fn zero_timeout_is_an_argument_error() -> anyhow::Result<()> {
    let store = store().await?;
    let err = store
        .connection()
        .remove_timed_out_servers(Duration::ZERO)
        .await
        .unwrap_err();
    assert!(err.is_argument());
    Ok(())
}

#[tokio::test]
async fn concurrent_announces_of_one_id_keep_a_single_row() -> anyhow::Result<()> {
    let store = store().await?;
    let (a, b, c, d) = (
        store.connection(),
        store.connection(),
        store.connection(),
        store.connection(),
    );

    let (ctx1, ctx2, ctx3, ctx4) = (
        ServerContext::new(1, ["default"]),
        ServerContext::new(2, ["default"]),
        ServerContext::new(3, ["default"]),
        ServerContext::new(4, ["default"]),
    );
    let (ra, rb, rc, rd) = tokio::join!(
        a.announce_server("s1", &ctx1),
        b.announce_server("s1", &ctx2),
        c.announce_server("s1", &ctx3),
        d.announce_server("s1", &ctx4),
    );
    ra?;
    rb?;
    rc?;
    rd?;

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM server WHERE id = 's1'")
        .fetch_one(store.storage.pool())
        .await?;
    assert_eq!(rows, 1);
    let servers = a.get_servers().await?;
    assert_eq!(servers.len(), 1);
    assert!((1..=4).contains(&servers[0].data.worker_count));
    Ok(())
}

#[tokio::test]
async fn unreadable_server_data_is_a_serialization_error() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    connection
        .announce_server("s1", &ServerContext::new(1, ["default"]))
        .await?;
    sqlx::query("INSERT INTO server (id, data, last_heartbeat) VALUES ('s2', '{broken', 0)")
        .execute(store.storage.pool())
        .await?;

    let err = connection.get_servers().await.unwrap_err();
    assert!(matches!(err, StorageError::Serialization(_)));
    Ok(())
}
