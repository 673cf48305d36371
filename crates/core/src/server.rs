//! Worker-process liveness payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a worker process reports when it announces itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerContext {
    pub worker_count: u32,
    pub queues: Vec<String>,
}

impl ServerContext {
    pub fn new<I, S>(worker_count: u32, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            worker_count,
            queues: queues.into_iter().map(Into::into).collect(),
        }
    }
}

/// Stored data blob of a server row (`server.data`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerData {
    pub worker_count: u32,
    pub queues: Vec<String>,
    pub started_at: DateTime<Utc>,
}

impl ServerData {
    pub fn from_context(context: &ServerContext, started_at: DateTime<Utc>) -> Self {
        Self {
            worker_count: context.worker_count,
            queues: context.queues.clone(),
            started_at,
        }
    }
}
