//! Storage configuration loading and representation.

use std::str::FromStr;
use std::time::Duration;

use crate::error::{StorageError, StorageResult};

/// SQLite journal mode; governs how readers and writers in different
/// processes see each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JournalMode {
    /// Readers see the last committed snapshot while a writer is active.
    #[default]
    Wal,
    /// Rollback journal; readers block while a writer commits.
    Delete,
}

impl FromStr for JournalMode {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wal" => Ok(Self::Wal),
            "delete" => Ok(Self::Delete),
            other => Err(StorageError::configuration(format!(
                "unknown journal mode '{other}' (expected 'wal' or 'delete')"
            ))),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// SQLite connection URL, e.g. `sqlite://jobs.db`.
    pub database_url: String,
    pub max_connections: u32,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout: Duration,
    pub journal_mode: JournalMode,
    /// Create missing tables on connect.
    pub prepare_schema: bool,
    /// Delay between dequeue attempts of the SQL queue backend.
    pub queue_poll_interval: Duration,
    /// A fetched queue entry not removed or requeued within this span becomes visible again.
    pub invisibility_timeout: Duration,
    pub job_expiration_check_interval: Duration,
    pub counters_aggregate_interval: Duration,
    /// Lease length of distributed locks; held locks renew before it lapses.
    pub distributed_lock_ttl: Duration,
    /// Rows deleted per statement by the expiration manager.
    pub delete_batch_size: u32,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_url: "sqlite://jobvault.db".to_string(),
            max_connections: 8,
            busy_timeout: Duration::from_secs(5),
            journal_mode: JournalMode::Wal,
            prepare_schema: true,
            queue_poll_interval: Duration::from_secs(1),
            invisibility_timeout: Duration::from_secs(30 * 60),
            job_expiration_check_interval: Duration::from_secs(30 * 60),
            counters_aggregate_interval: Duration::from_secs(5 * 60),
            distributed_lock_ttl: Duration::from_secs(30),
            delete_batch_size: 1000,
        }
    }
}

impl StorageOptions {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }

    /// Load from `JOBVAULT_*` environment variables, defaulting anything unset.
    pub fn from_env() -> StorageResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source (used by `from_env` and tests).
    pub fn from_lookup<F>(lookup: F) -> StorageResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();

        if let Some(url) = lookup("JOBVAULT_DATABASE_URL") {
            options.database_url = url;
        }
        if let Some(v) = parse_var::<u32, _>(&lookup, "JOBVAULT_MAX_CONNECTIONS")? {
            options.max_connections = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "JOBVAULT_BUSY_TIMEOUT_MS")? {
            options.busy_timeout = Duration::from_millis(v);
        }
        if let Some(raw) = lookup("JOBVAULT_JOURNAL_MODE") {
            options.journal_mode = raw.parse()?;
        }
        if let Some(v) = parse_var::<bool, _>(&lookup, "JOBVAULT_PREPARE_SCHEMA")? {
            options.prepare_schema = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "JOBVAULT_QUEUE_POLL_INTERVAL_MS")? {
            options.queue_poll_interval = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "JOBVAULT_INVISIBILITY_TIMEOUT_SECS")? {
            options.invisibility_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "JOBVAULT_EXPIRATION_CHECK_INTERVAL_SECS")? {
            options.job_expiration_check_interval = Duration::from_secs(v);
        }
        if let Some(v) =
            parse_var::<u64, _>(&lookup, "JOBVAULT_COUNTERS_AGGREGATE_INTERVAL_SECS")?
        {
            options.counters_aggregate_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "JOBVAULT_LOCK_TTL_SECS")? {
            options.distributed_lock_ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u32, _>(&lookup, "JOBVAULT_DELETE_BATCH_SIZE")? {
            options.delete_batch_size = v;
        }

        options.validate()?;
        Ok(options)
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    pub fn with_prepare_schema(mut self, prepare: bool) -> Self {
        self.prepare_schema = prepare;
        self
    }

    pub fn with_queue_poll_interval(mut self, interval: Duration) -> Self {
        self.queue_poll_interval = interval;
        self
    }

    pub fn with_invisibility_timeout(mut self, timeout: Duration) -> Self {
        self.invisibility_timeout = timeout;
        self
    }

    pub fn with_job_expiration_check_interval(mut self, interval: Duration) -> Self {
        self.job_expiration_check_interval = interval;
        self
    }

    pub fn with_counters_aggregate_interval(mut self, interval: Duration) -> Self {
        self.counters_aggregate_interval = interval;
        self
    }

    pub fn with_distributed_lock_ttl(mut self, ttl: Duration) -> Self {
        self.distributed_lock_ttl = ttl;
        self
    }

    pub fn with_delete_batch_size(mut self, size: u32) -> Self {
        self.delete_batch_size = size;
        self
    }

    /// Reject values the storage cannot run with.
    pub fn validate(&self) -> StorageResult<()> {
        if self.database_url.trim().is_empty() {
            return Err(StorageError::configuration("database_url must not be empty"));
        }
        if self.max_connections == 0 {
            return Err(StorageError::configuration("max_connections must be at least 1"));
        }
        if self.queue_poll_interval.is_zero() {
            return Err(StorageError::configuration("queue_poll_interval must be positive"));
        }
        if self.invisibility_timeout.is_zero() {
            return Err(StorageError::configuration("invisibility_timeout must be positive"));
        }
        if self.distributed_lock_ttl < Duration::from_secs(1) {
            return Err(StorageError::configuration(
                "distributed_lock_ttl must be at least one second",
            ));
        }
        if self.delete_batch_size == 0 {
            return Err(StorageError::configuration("delete_batch_size must be at least 1"));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> StorageResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| StorageError::configuration(format!("{name}={raw:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let options = StorageOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.journal_mode, JournalMode::Wal);
        assert!(options.prepare_schema);
    }

    #[test]
    fn lookup_overrides_defaults() {
        let options = StorageOptions::from_lookup(lookup_from(&[
            ("JOBVAULT_DATABASE_URL", "sqlite://other.db"),
            ("JOBVAULT_MAX_CONNECTIONS", "2"),
            ("JOBVAULT_JOURNAL_MODE", "DELETE"),
            ("JOBVAULT_QUEUE_POLL_INTERVAL_MS", "250"),
            ("JOBVAULT_PREPARE_SCHEMA", "false"),
        ]))
        .unwrap();

        assert_eq!(options.database_url, "sqlite://other.db");
        assert_eq!(options.max_connections, 2);
        assert_eq!(options.journal_mode, JournalMode::Delete);
        assert_eq!(options.queue_poll_interval, Duration::from_millis(250));
        assert!(!options.prepare_schema);
    }

    #[test]
    fn unparseable_values_are_configuration_errors() {
        let err = StorageOptions::from_lookup(lookup_from(&[("JOBVAULT_MAX_CONNECTIONS", "many")]))
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("JOBVAULT_MAX_CONNECTIONS"));

        let err = StorageOptions::from_lookup(lookup_from(&[("JOBVAULT_JOURNAL_MODE", "memory")]))
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let err = StorageOptions::default()
            .with_max_connections(0)
            .validate()
            .unwrap_err();
        assert!(err.is_configuration());

        let err = StorageOptions::default()
            .with_delete_batch_size(0)
            .validate()
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
