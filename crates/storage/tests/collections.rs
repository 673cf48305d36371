mod common;

use std::time::Duration;

use common::store;
use jobvault_core::Ttl;
use jobvault_storage::StorageConnection;

#[tokio::test]
async fn ttl_is_the_sentinel_without_expiring_rows() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    assert_eq!(connection.get_set_ttl("missing").await?, Ttl::NoExpiration);
    assert_eq!(
        connection.get_list_ttl("missing").await?.as_duration(),
        chrono::TimeDelta::seconds(-1)
    );

    let mut tx = connection.create_write_transaction();
    tx.add_to_set("persistent", "a", 0.0)?;
    tx.commit().await?;
    assert!(connection.get_set_ttl("persistent").await?.is_persistent());
    Ok(())
}

#[tokio::test]
async fn ttl_counts_down_from_the_earliest_expiry() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    let mut tx = connection.create_write_transaction();
    tx.insert_to_list("log", "one")?;
    tx.expire_list("log", Duration::from_secs(60))?;
    tx.commit().await?;

    let Ttl::ExpiresIn(first) = connection.get_list_ttl("log").await? else {
        panic!("list should expire");
    };
    assert!(first <= chrono::TimeDelta::seconds(60));
    assert!(first > chrono::TimeDelta::seconds(55));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let Ttl::ExpiresIn(second) = connection.get_list_ttl("log").await? else {
        panic!("list should expire");
    };
    assert!(second < first);
    Ok(())
}

#[tokio::test]
async fn lists_read_newest_first() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    let mut tx = connection.create_write_transaction();
    for value in ["a", "b", "c", "d"] {
        tx.insert_to_list("recent", value)?;
    }
    tx.commit().await?;

    assert_eq!(
        connection.get_all_items_from_list("recent").await?,
        ["d", "c", "b", "a"]
    );
    assert_eq!(
        connection.get_range_from_list("recent", 1, 2).await?,
        ["c", "b"]
    );
    assert_eq!(connection.get_list_count("recent").await?, 4);
    assert!(connection.get_range_from_list("recent", 2, 1).await.unwrap_err().is_argument());
    Ok(())
}

#[tokio::test]
async fn trim_and_remove_from_list() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    let mut tx = connection.create_write_transaction();
    for value in ["a", "b", "a", "c", "d"] {
        tx.insert_to_list("recent", value)?;
    }
    tx.commit().await?;

    let mut tx = connection.create_write_transaction();
    tx.trim_list("recent", 0, 2)?;
    tx.commit().await?;
    assert_eq!(
        connection.get_all_items_from_list("recent").await?,
        ["d", "c", "a"]
    );

    let mut tx = connection.create_write_transaction();
    tx.remove_from_list("recent", "a")?;
    tx.commit().await?;
    assert_eq!(connection.get_all_items_from_list("recent").await?, ["d", "c"]);
    Ok(())
}

#[tokio::test]
async fn sets_range_by_insertion_and_score() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    let mut tx = connection.create_write_transaction();
    tx.add_to_set("schedule", "job:3", 30.0)?;
    tx.add_to_set("schedule", "job:1", 10.0)?;
    tx.add_to_set("schedule", "job:2", 20.0)?;
    tx.add_to_set("schedule", "job:1", 15.0)?;
    tx.commit().await?;

    assert_eq!(connection.get_set_count("schedule").await?, 3);
    assert_eq!(
        connection.get_range_from_set("schedule", 0, 1).await?,
        ["job:3", "job:1"]
    );
    assert_eq!(
        connection.get_all_items_from_set("schedule").await?,
        ["job:3", "job:1", "job:2"]
    );

    assert_eq!(
        connection
            .get_first_by_lowest_score_from_set("schedule", 15.0, 30.0)
            .await?
            .as_deref(),
        Some("job:1")
    );
    assert_eq!(
        connection
            .get_first_by_lowest_score_from_set("schedule", 16.0, 19.0)
            .await?,
        None
    );
    assert_eq!(
        connection
            .get_lowest_scored_from_set("schedule", 0.0, 100.0, 2)
            .await?,
        ["job:1", "job:2"]
    );

    let err = connection
        .get_first_by_lowest_score_from_set("schedule", 30.0, 10.0)
        .await
        .unwrap_err();
    assert!(err.is_argument());

    assert!(connection.get_set_contains("schedule", "job:2").await?);
    assert!(!connection.get_set_contains("schedule", "job:9").await?);
    Ok(())
}

#[tokio::test]
async fn set_membership_mutations() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    let mut tx = connection.create_write_transaction();
    tx.add_range_to_set("tags", vec!["x".into(), "y".into(), "x".into()])?;
    tx.commit().await?;
    assert_eq!(connection.get_set_count("tags").await?, 2);

    let mut tx = connection.create_write_transaction();
    tx.remove_from_set("tags", "x")?;
    tx.commit().await?;
    assert_eq!(connection.get_all_items_from_set("tags").await?, ["y"]);

    let mut tx = connection.create_write_transaction();
    tx.remove_set("tags")?;
    tx.commit().await?;
    assert_eq!(connection.get_set_count("tags").await?, 0);
    Ok(())
}

#[tokio::test]
async fn hashes_upsert_fields_and_read_back() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    assert!(connection.get_all_entries_from_hash("recurring:daily").await?.is_none());

    connection
        .set_range_in_hash(
            "recurring:daily",
            &[
                ("Cron".into(), "0 0 * * *".into()),
                ("Queue".into(), "default".into()),
            ],
        )
        .await?;
    connection
        .set_range_in_hash("recurring:daily", &[("Queue".into(), "critical".into())])
        .await?;

    let entries = connection
        .get_all_entries_from_hash("recurring:daily")
        .await?
        .expect("hash has fields");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries["Queue"], "critical");
    assert_eq!(
        connection.get_value_from_hash("recurring:daily", "Cron").await?.as_deref(),
        Some("0 0 * * *")
    );
    assert_eq!(connection.get_value_from_hash("recurring:daily", "Nope").await?, None);
    assert_eq!(connection.get_hash_count("recurring:daily").await?, 2);
    Ok(())
}

#[tokio::test]
async fn hash_range_is_all_or_nothing() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    // A trigger that rejects one field makes the second upsert fail mid-batch.
    sqlx::query(
        "CREATE TRIGGER reject_poison BEFORE INSERT ON hash_entry \
         WHEN NEW.field = 'poison' BEGIN SELECT RAISE(ABORT, 'poison field'); END",
    )
    .execute(store.storage.pool())
    .await?;

    let err = connection
        .set_range_in_hash(
            "h",
            &[("ok".into(), "1".into()), ("poison".into(), "2".into())],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, jobvault_storage::StorageError::Store { .. }));
    assert!(connection.get_all_entries_from_hash("h").await?.is_none());

    let err = connection
        .set_range_in_hash("h", &[("".into(), "1".into())])
        .await
        .unwrap_err();
    assert!(err.is_argument());
    Ok(())
}

#[tokio::test]
async fn counter_sums_raw_and_aggregated_rows() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    assert_eq!(connection.get_counter("stats:succeeded").await?, 0);

    let mut tx = connection.create_write_transaction();
    tx.increment_counter("stats:succeeded", None)?;
    tx.increment_counter("stats:succeeded", None)?;
    tx.decrement_counter("stats:succeeded", None)?;
    tx.commit().await?;
    assert_eq!(connection.get_counter("stats:succeeded").await?, 1);

    sqlx::query("INSERT INTO aggregated_counter (key, value) VALUES ('stats:succeeded', 41)")
        .execute(store.storage.pool())
        .await?;
    assert_eq!(connection.get_counter("stats:succeeded").await?, 42);

    sqlx::query("INSERT INTO aggregated_counter (key, value) VALUES ('stats:deleted', 7)")
        .execute(store.storage.pool())
        .await?;
    assert_eq!(connection.get_counter("stats:deleted").await?, 7);
    Ok(())
}

#[tokio::test]
async fn persist_clears_expiry() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    let mut tx = connection.create_write_transaction();
    tx.set_range_in_hash("h", vec![("f".into(), "v".into())])?;
    tx.expire_hash("h", Duration::from_secs(30))?;
    tx.commit().await?;
    assert!(!connection.get_hash_ttl("h").await?.is_persistent());

    let mut tx = connection.create_write_transaction();
    tx.persist_hash("h")?;
    tx.commit().await?;
    assert!(connection.get_hash_ttl("h").await?.is_persistent());
    Ok(())
}

#[tokio::test]
async fn empty_keys_are_argument_errors() -> anyhow::Result<()> {
    let store = store().await?;
    let connection = store.connection();

    assert!(connection.get_set_count("").await.unwrap_err().is_argument());
    assert!(connection.get_counter(" ").await.unwrap_err().is_argument());
    assert!(connection.get_list_ttl("").await.unwrap_err().is_argument());
    Ok(())
}
