//! Set, hash, list and counter statements.
//!
//! Reads treat expired rows as present; only the expiration manager removes them.

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::instrument;

use jobvault_core::{HashEntry, ListEntry, SetEntry, Ttl};

use crate::error::{StorageError, StorageResult, require_non_empty, store_err};
use crate::rows::{HashEntryRow, ListEntryRow, SetEntryRow};
use crate::transaction::{Collection, upsert_hash_fields};

/// Validated `LIMIT`/`OFFSET` pair for an inclusive index range.
fn limit_offset(start: usize, end: usize) -> StorageResult<(i64, i64)> {
    if end < start {
        return Err(StorageError::argument(format!(
            "range end {end} is before start {start}"
        )));
    }
    let count = i64::try_from(end - start).unwrap_or(i64::MAX).saturating_add(1);
    let offset = i64::try_from(start).unwrap_or(i64::MAX);
    Ok((count, offset))
}

fn score_bounds(from: f64, to: f64) -> StorageResult<()> {
    if from.is_nan() || to.is_nan() {
        return Err(StorageError::argument("score bounds must be numbers"));
    }
    if to < from {
        return Err(StorageError::argument(format!(
            "score range upper bound {to} is below lower bound {from}"
        )));
    }
    Ok(())
}

#[instrument(skip(pool), err)]
pub(super) async fn count(
    pool: &SqlitePool,
    collection: Collection,
    key: &str,
) -> StorageResult<u64> {
    require_non_empty("key", key)?;
    let sql = format!("SELECT COUNT(*) FROM {} WHERE key = ?1", collection.table());
    let n: i64 = sqlx::query_scalar(&sql)
        .bind(key)
        .fetch_one(pool)
        .await
        .map_err(store_err("count"))?;
    Ok(u64::try_from(n).unwrap_or_default())
}

/// Remaining lifetime from the earliest expiry among a key's rows.
#[instrument(skip(pool), err)]
pub(super) async fn ttl(
    pool: &SqlitePool,
    collection: Collection,
    key: &str,
) -> StorageResult<Ttl> {
    require_non_empty("key", key)?;
    let sql = format!("SELECT MIN(expire_at) FROM {} WHERE key = ?1", collection.table());
    let earliest: Option<i64> = sqlx::query_scalar(&sql)
        .bind(key)
        .fetch_one(pool)
        .await
        .map_err(store_err("ttl"))?;
    Ok(Ttl::from_earliest(earliest, Utc::now()))
}

// ---- sets ----

pub(super) async fn get_all_items_from_set(
    pool: &SqlitePool,
    key: &str,
) -> StorageResult<Vec<String>> {
    require_non_empty("key", key)?;
    let rows: Vec<SetEntryRow> = sqlx::query_as(
        "SELECT id, key, value, score, expire_at FROM set_entry WHERE key = ?1 ORDER BY id",
    )
    .bind(key)
    .fetch_all(pool)
    .await
    .map_err(store_err("get_all_items_from_set"))?;
    Ok(rows.into_iter().map(|row| SetEntry::from(row).value).collect())
}

#[instrument(skip(pool), err)]
pub(super) async fn get_range_from_set(
    pool: &SqlitePool,
    key: &str,
    start: usize,
    end: usize,
) -> StorageResult<Vec<String>> {
    require_non_empty("key", key)?;
    let (limit, offset) = limit_offset(start, end)?;

    let rows: Vec<SetEntryRow> = sqlx::query_as(
        "SELECT id, key, value, score, expire_at FROM set_entry WHERE key = ?1 \
         ORDER BY id LIMIT ?2 OFFSET ?3",
    )
    .bind(key)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .map_err(store_err("get_range_from_set"))?;
    Ok(rows.into_iter().map(|row| SetEntry::from(row).value).collect())
}

#[instrument(skip(pool), err)]
pub(super) async fn get_lowest_scored_from_set(
    pool: &SqlitePool,
    key: &str,
    from: f64,
    to: f64,
    count: usize,
) -> StorageResult<Vec<String>> {
    require_non_empty("key", key)?;
    score_bounds(from, to)?;
    if count == 0 {
        return Err(StorageError::argument("count must be positive"));
    }

    let rows: Vec<SetEntryRow> = sqlx::query_as(
        "SELECT id, key, value, score, expire_at FROM set_entry \
         WHERE key = ?1 AND score BETWEEN ?2 AND ?3 \
         ORDER BY score, id LIMIT ?4",
    )
    .bind(key)
    .bind(from)
    .bind(to)
    .bind(i64::try_from(count).unwrap_or(i64::MAX))
    .fetch_all(pool)
    .await
    .map_err(store_err("get_lowest_scored_from_set"))?;
    Ok(rows.into_iter().map(|row| SetEntry::from(row).value).collect())
}

pub(super) async fn get_set_contains(
    pool: &SqlitePool,
    key: &str,
    value: &str,
) -> StorageResult<bool> {
    require_non_empty("key", key)?;
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM set_entry WHERE key = ?1 AND value = ?2")
            .bind(key)
            .bind(value)
            .fetch_optional(pool)
            .await
            .map_err(store_err("get_set_contains"))?;
    Ok(found.is_some())
}

// ---- hashes ----

#[instrument(skip(pool), err)]
pub(super) async fn get_all_entries_from_hash(
    pool: &SqlitePool,
    key: &str,
) -> StorageResult<Option<BTreeMap<String, String>>> {
    require_non_empty("key", key)?;
    let rows: Vec<HashEntryRow> =
        sqlx::query_as("SELECT id, key, field, value, expire_at FROM hash_entry WHERE key = ?1")
            .bind(key)
            .fetch_all(pool)
            .await
            .map_err(store_err("get_all_entries_from_hash"))?;

    if rows.is_empty() {
        return Ok(None);
    }
    Ok(Some(
        rows.into_iter()
            .map(HashEntry::from)
            .map(|entry| (entry.field, entry.value))
            .collect(),
    ))
}

pub(super) async fn get_value_from_hash(
    pool: &SqlitePool,
    key: &str,
    field: &str,
) -> StorageResult<Option<String>> {
    require_non_empty("key", key)?;
    require_non_empty("hash field", field)?;
    sqlx::query_scalar("SELECT value FROM hash_entry WHERE key = ?1 AND field = ?2")
        .bind(key)
        .bind(field)
        .fetch_optional(pool)
        .await
        .map_err(store_err("get_value_from_hash"))
}

#[instrument(skip(pool, pairs), fields(fields = pairs.len()), err)]
pub(super) async fn set_range_in_hash(
    pool: &SqlitePool,
    key: &str,
    pairs: &[(String, String)],
) -> StorageResult<()> {
    require_non_empty("key", key)?;
    for (field, _) in pairs {
        require_non_empty("hash field", field)?;
    }
    if pairs.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await.map_err(store_err("set_range_in_hash"))?;
    upsert_hash_fields(&mut tx, key, pairs).await?;
    tx.commit().await.map_err(store_err("set_range_in_hash"))?;
    Ok(())
}

// ---- lists ----

pub(super) async fn get_all_items_from_list(
    pool: &SqlitePool,
    key: &str,
) -> StorageResult<Vec<String>> {
    require_non_empty("key", key)?;
    let rows: Vec<ListEntryRow> = sqlx::query_as(
        "SELECT id, key, value, expire_at FROM list_entry WHERE key = ?1 ORDER BY id DESC",
    )
    .bind(key)
    .fetch_all(pool)
    .await
    .map_err(store_err("get_all_items_from_list"))?;
    Ok(rows.into_iter().map(|row| ListEntry::from(row).value).collect())
}

#[instrument(skip(pool), err)]
pub(super) async fn get_range_from_list(
    pool: &SqlitePool,
    key: &str,
    start: usize,
    end: usize,
) -> StorageResult<Vec<String>> {
    require_non_empty("key", key)?;
    let (limit, offset) = limit_offset(start, end)?;

    let rows: Vec<ListEntryRow> = sqlx::query_as(
        "SELECT id, key, value, expire_at FROM list_entry WHERE key = ?1 \
         ORDER BY id DESC LIMIT ?2 OFFSET ?3",
    )
    .bind(key)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .map_err(store_err("get_range_from_list"))?;
    Ok(rows.into_iter().map(|row| ListEntry::from(row).value).collect())
}

// ---- counters ----

#[instrument(skip(pool), err)]
pub(super) async fn get_counter(pool: &SqlitePool, key: &str) -> StorageResult<i64> {
    require_non_empty("key", key)?;
    sqlx::query_scalar(
        "SELECT (SELECT COALESCE(SUM(value), 0) FROM counter WHERE key = ?1) \
              + (SELECT COALESCE(SUM(value), 0) FROM aggregated_counter WHERE key = ?1)",
    )
    .bind(key)
    .fetch_one(pool)
    .await
    .map_err(store_err("get_counter"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inclusive_range_maps_to_limit_offset() {
        assert_eq!(limit_offset(0, 0).unwrap(), (1, 0));
        assert_eq!(limit_offset(2, 5).unwrap(), (4, 2));
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(limit_offset(3, 1).unwrap_err().is_argument());
    }

    #[test]
    fn score_bounds_are_inclusive_and_ordered() {
        assert!(score_bounds(1.0, 1.0).is_ok());
        assert!(score_bounds(2.0, 1.0).unwrap_err().is_argument());
        assert!(score_bounds(f64::NAN, 1.0).unwrap_err().is_argument());
    }
}
