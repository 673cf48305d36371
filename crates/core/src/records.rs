//! Typed records, one per stored table, with fixed field lists.
//!
//! These are the shapes rows are mapped into; they carry no behavior.

use chrono::{DateTime, Utc};

use crate::id::{JobId, StateId};
use crate::server::ServerData;
use crate::state_data::CaseInsensitiveMap;

/// `job` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub invocation_data: String,
    pub arguments: String,
    pub created_at: DateTime<Utc>,
    pub expire_at: Option<DateTime<Utc>>,
    /// Reference to the most recent `state` row, if any.
    pub state_id: Option<StateId>,
    pub state_name: Option<String>,
}

/// `job_parameter` row; unique per `(job_id, name)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobParameter {
    pub job_id: JobId,
    pub name: String,
    pub value: Option<String>,
}

/// `state` row; append-only history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobState {
    pub id: StateId,
    pub job_id: JobId,
    pub name: String,
    pub reason: Option<String>,
    pub data: CaseInsensitiveMap,
    pub created_at: DateTime<Utc>,
}

/// `set_entry` row.
#[derive(Debug, Clone, PartialEq)]
pub struct SetEntry {
    pub id: i64,
    pub key: String,
    pub value: String,
    pub score: f64,
    pub expire_at: Option<DateTime<Utc>>,
}

/// `hash_entry` row; unique per `(key, field)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashEntry {
    pub id: i64,
    pub key: String,
    pub field: String,
    pub value: String,
    pub expire_at: Option<DateTime<Utc>>,
}

/// `list_entry` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub id: i64,
    pub key: String,
    pub value: String,
    pub expire_at: Option<DateTime<Utc>>,
}

/// `counter` row; a delta, never updated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    pub id: i64,
    pub key: String,
    pub value: i64,
    pub expire_at: Option<DateTime<Utc>>,
}

/// `aggregated_counter` row; rollup of compacted deltas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedCounter {
    pub key: String,
    pub value: i64,
    pub expire_at: Option<DateTime<Utc>>,
}

/// `server` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    pub id: String,
    pub data: ServerData,
    pub last_heartbeat: DateTime<Utc>,
}
