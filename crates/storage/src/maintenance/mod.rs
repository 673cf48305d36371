//! Background maintenance: expiry reaping and counter compaction.
//!
//! Both workers take a distributed lock per run, so any number of processes
//! can host them while only one does the work at a time.

pub mod counters;
pub mod expiration;
pub mod worker;

pub use counters::CountersAggregator;
pub use expiration::ExpirationManager;
pub use worker::MaintenanceHandle;

use std::time::Duration;

/// How long a maintenance run waits for its lock before skipping.
const LOCK_WAIT: Duration = Duration::from_secs(5);
