//! `jobvault-core`: storage entity model and value types.
//!
//! This crate contains **pure data** shapes (no I/O). The storage crate maps
//! relational rows into these types and back.

pub mod error;
pub mod id;
pub mod invocation;
pub mod job;
pub mod records;
pub mod server;
pub mod state_data;
pub mod time;

pub use error::{ModelError, ModelResult};
pub use id::{JobId, StateId};
pub use invocation::{Invocation, JobLoadError};
pub use job::{JobData, NewState, StateData};
pub use records::{
    AggregatedCounter, Counter, HashEntry, Job, JobParameter, JobState, ListEntry, ServerRecord,
    SetEntry,
};
pub use server::{ServerContext, ServerData};
pub use state_data::CaseInsensitiveMap;
pub use time::Ttl;
