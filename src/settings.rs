//! Cache Settings
//!
//! One mutable bag of knobs shared by the façade, the engine and the
//! connection factory. There is no observer dispatch: settings changes go
//! through [`Cache::reconfigure`](crate::Cache::reconfigure), which
//! re-validates, rebuilds the pool and re-runs schema bootstrap before the
//! next operation.

use std::time::Duration;

use crate::errors::{CacheError, CacheResult};

/// Partition used when the caller does not name one.
pub const DEFAULT_PARTITION: &str = "default";

/// Tunable cache configuration
///
/// All fields are public; [`validate`](CacheSettings::validate) is the
/// gatekeeper and runs whenever a cache is built or reconfigured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Partition used by the `*_default_partition` operations; non-empty
    pub default_partition: String,

    /// Lifetime handed to `add_static`; must be non-zero
    pub static_interval: Duration,

    /// Number of upserts between automatic eviction sweeps; must be > 0
    pub insertion_count_before_auto_clean: u32,

    /// Page-count cap for embedded backends, in mebibytes; must be > 0
    pub max_cache_size_mb: u32,

    /// Journal cap for embedded backends, in mebibytes; must be > 0
    pub max_journal_size_mb: u32,

    /// Serialized payloads at or above this many bytes are compressed
    pub min_value_length_for_compression: usize,

    /// Backend-specific data source: a file path for file-backed SQLite, a
    /// store name for in-memory SQLite, a connection URL for PostgreSQL.
    /// Changing it forces a connection-string rebuild and re-bootstrap.
    pub data_source: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_partition: DEFAULT_PARTITION.to_string(),
            static_interval: Duration::from_secs(30 * 24 * 60 * 60),
            insertion_count_before_auto_clean: 64,
            max_cache_size_mb: 1024,
            max_journal_size_mb: 64,
            min_value_length_for_compression: 4096,
            data_source: "durable-cache.db".to_string(),
        }
    }
}

impl CacheSettings {
    /// Set the static-entry lifetime in days
    #[must_use]
    pub fn with_static_interval_days(mut self, days: u32) -> Self {
        self.static_interval = Duration::from_secs(u64::from(days) * 24 * 60 * 60);
        self
    }

    /// Set the data source (file path, store name, or connection URL)
    #[must_use]
    pub fn with_data_source(mut self, data_source: impl Into<String>) -> Self {
        self.data_source = data_source.into();
        self
    }

    /// Check every invariant the rest of the crate relies on
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` naming the offending field.
    pub fn validate(&self) -> CacheResult<()> {
        if self.default_partition.is_empty() {
            return Err(CacheError::invalid("default_partition must not be empty"));
        }
        if self.static_interval.as_secs() == 0 {
            return Err(CacheError::invalid("static_interval must be positive"));
        }
        if self.insertion_count_before_auto_clean == 0 {
            return Err(CacheError::invalid(
                "insertion_count_before_auto_clean must be positive",
            ));
        }
        if self.max_cache_size_mb == 0 {
            return Err(CacheError::invalid("max_cache_size_mb must be positive"));
        }
        if self.max_journal_size_mb == 0 {
            return Err(CacheError::invalid("max_journal_size_mb must be positive"));
        }
        if self.data_source.is_empty() {
            return Err(CacheError::invalid("data_source must not be empty"));
        }
        Ok(())
    }

    /// Static interval in whole seconds, as stored in the row
    #[must_use]
    pub fn static_interval_secs(&self) -> i64 {
        i64::try_from(self.static_interval.as_secs()).unwrap_or(i64::MAX)
    }
}
