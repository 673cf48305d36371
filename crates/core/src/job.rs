//! Job read results and state write inputs.

use chrono::{DateTime, Utc};

use crate::invocation::{Invocation, JobLoadError};
use crate::state_data::CaseInsensitiveMap;

/// What a job read returns.
///
/// When the stored invocation cannot be decoded, `job` is `None` and
/// `load_error` says why; everything else is still populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobData {
    pub job: Option<Invocation>,
    /// Name of the current state, `None` until a state is first applied.
    pub state: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expire_at: Option<DateTime<Utc>>,
    pub load_error: Option<JobLoadError>,
}

impl JobData {
    pub fn is_loaded(&self) -> bool {
        self.job.is_some()
    }
}

/// The current state of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateData {
    pub name: String,
    pub reason: Option<String>,
    pub data: CaseInsensitiveMap,
}

/// A state to append to a job's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewState {
    pub name: String,
    pub reason: Option<String>,
    pub data: CaseInsensitiveMap,
    pub created_at: DateTime<Utc>,
}

impl NewState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: None,
            data: CaseInsensitiveMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key, value);
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}
