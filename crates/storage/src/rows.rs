//! SQLx row types and their mapping into the entity records.

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use jobvault_core::time::from_millis;
use jobvault_core::{
    AggregatedCounter, CaseInsensitiveMap, Counter, HashEntry, Job, JobId, JobParameter, JobState,
    ListEntry, ServerData, ServerRecord, SetEntry, StateId,
};

use crate::error::StorageError;

#[derive(Debug)]
pub(crate) struct JobRow {
    id: i64,
    invocation_data: String,
    arguments: String,
    created_at: i64,
    expire_at: Option<i64>,
    state_id: Option<i64>,
    state_name: Option<String>,
}

impl<'r> FromRow<'r, SqliteRow> for JobRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            invocation_data: row.try_get("invocation_data")?,
            arguments: row.try_get("arguments")?,
            created_at: row.try_get("created_at")?,
            expire_at: row.try_get("expire_at")?,
            state_id: row.try_get("state_id")?,
            state_name: row.try_get("state_name")?,
        })
    }
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: JobId::from_i64(row.id),
            invocation_data: row.invocation_data,
            arguments: row.arguments,
            created_at: from_millis(row.created_at),
            expire_at: row.expire_at.map(from_millis),
            state_id: row.state_id.map(StateId::from_i64),
            state_name: row.state_name,
        }
    }
}

#[derive(Debug)]
pub(crate) struct JobParameterRow {
    job_id: i64,
    name: String,
    value: Option<String>,
}

impl<'r> FromRow<'r, SqliteRow> for JobParameterRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(JobParameterRow {
            job_id: row.try_get("job_id")?,
            name: row.try_get("name")?,
            value: row.try_get("value")?,
        })
    }
}

impl From<JobParameterRow> for JobParameter {
    fn from(row: JobParameterRow) -> Self {
        JobParameter {
            job_id: JobId::from_i64(row.job_id),
            name: row.name,
            value: row.value,
        }
    }
}

#[derive(Debug)]
pub(crate) struct JobStateRow {
    id: i64,
    job_id: i64,
    name: String,
    reason: Option<String>,
    data: Option<String>,
    created_at: i64,
}

impl<'r> FromRow<'r, SqliteRow> for JobStateRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(JobStateRow {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            name: row.try_get("name")?,
            reason: row.try_get("reason")?,
            data: row.try_get("data")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Decode a stored state data blob. An absent blob is an empty map.
pub(crate) fn decode_state_data(raw: Option<&str>) -> Result<CaseInsensitiveMap, StorageError> {
    match raw {
        None => Ok(CaseInsensitiveMap::new()),
        Some(json) => serde_json::from_str(json)
            .map_err(|e| StorageError::Serialization(format!("state data: {e}"))),
    }
}

impl TryFrom<JobStateRow> for JobState {
    type Error = StorageError;

    fn try_from(row: JobStateRow) -> Result<Self, Self::Error> {
        Ok(JobState {
            id: StateId::from_i64(row.id),
            job_id: JobId::from_i64(row.job_id),
            name: row.name,
            reason: row.reason,
            data: decode_state_data(row.data.as_deref())?,
            created_at: from_millis(row.created_at),
        })
    }
}

#[derive(Debug)]
pub(crate) struct SetEntryRow {
    id: i64,
    key: String,
    value: String,
    score: f64,
    expire_at: Option<i64>,
}

impl<'r> FromRow<'r, SqliteRow> for SetEntryRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(SetEntryRow {
            id: row.try_get("id")?,
            key: row.try_get("key")?,
            value: row.try_get("value")?,
            score: row.try_get("score")?,
            expire_at: row.try_get("expire_at")?,
        })
    }
}

impl From<SetEntryRow> for SetEntry {
    fn from(row: SetEntryRow) -> Self {
        SetEntry {
            id: row.id,
            key: row.key,
            value: row.value,
            score: row.score,
            expire_at: row.expire_at.map(from_millis),
        }
    }
}

#[derive(Debug)]
pub(crate) struct HashEntryRow {
    id: i64,
    key: String,
    field: String,
    value: String,
    expire_at: Option<i64>,
}

impl<'r> FromRow<'r, SqliteRow> for HashEntryRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(HashEntryRow {
            id: row.try_get("id")?,
            key: row.try_get("key")?,
            field: row.try_get("field")?,
            value: row.try_get("value")?,
            expire_at: row.try_get("expire_at")?,
        })
    }
}

impl From<HashEntryRow> for HashEntry {
    fn from(row: HashEntryRow) -> Self {
        HashEntry {
            id: row.id,
            key: row.key,
            field: row.field,
            value: row.value,
            expire_at: row.expire_at.map(from_millis),
        }
    }
}

#[derive(Debug)]
pub(crate) struct ListEntryRow {
    id: i64,
    key: String,
    value: String,
    expire_at: Option<i64>,
}

impl<'r> FromRow<'r, SqliteRow> for ListEntryRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(ListEntryRow {
            id: row.try_get("id")?,
            key: row.try_get("key")?,
            value: row.try_get("value")?,
            expire_at: row.try_get("expire_at")?,
        })
    }
}

impl From<ListEntryRow> for ListEntry {
    fn from(row: ListEntryRow) -> Self {
        ListEntry {
            id: row.id,
            key: row.key,
            value: row.value,
            expire_at: row.expire_at.map(from_millis),
        }
    }
}

#[derive(Debug)]
pub(crate) struct CounterRow {
    id: i64,
    key: String,
    value: i64,
    expire_at: Option<i64>,
}

impl<'r> FromRow<'r, SqliteRow> for CounterRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(CounterRow {
            id: row.try_get("id")?,
            key: row.try_get("key")?,
            value: row.try_get("value")?,
            expire_at: row.try_get("expire_at")?,
        })
    }
}

impl From<CounterRow> for Counter {
    fn from(row: CounterRow) -> Self {
        Counter {
            id: row.id,
            key: row.key,
            value: row.value,
            expire_at: row.expire_at.map(from_millis),
        }
    }
}

#[derive(Debug)]
pub(crate) struct AggregatedCounterRow {
    key: String,
    value: i64,
    expire_at: Option<i64>,
}

impl<'r> FromRow<'r, SqliteRow> for AggregatedCounterRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(AggregatedCounterRow {
            key: row.try_get("key")?,
            value: row.try_get("value")?,
            expire_at: row.try_get("expire_at")?,
        })
    }
}

impl From<AggregatedCounterRow> for AggregatedCounter {
    fn from(row: AggregatedCounterRow) -> Self {
        AggregatedCounter {
            key: row.key,
            value: row.value,
            expire_at: row.expire_at.map(from_millis),
        }
    }
}

#[derive(Debug)]
pub(crate) struct ServerRow {
    id: String,
    data: String,
    last_heartbeat: i64,
}

impl<'r> FromRow<'r, SqliteRow> for ServerRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(ServerRow {
            id: row.try_get("id")?,
            data: row.try_get("data")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
        })
    }
}

impl TryFrom<ServerRow> for ServerRecord {
    type Error = StorageError;

    fn try_from(row: ServerRow) -> Result<Self, Self::Error> {
        let data: ServerData = serde_json::from_str(&row.data)
            .map_err(|e| StorageError::Serialization(format!("server '{}' data: {e}", row.id)))?;
        Ok(ServerRecord {
            id: row.id,
            data,
            last_heartbeat: from_millis(row.last_heartbeat),
        })
    }
}
