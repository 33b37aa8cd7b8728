//! Entry Engine
//!
//! Byte-level cache operations over a [`ConnectionFactory`]: normalization,
//! row construction, the upsert/read/peek/clear protocol, and the
//! insertion-counter-driven eviction sweep. Typed encode/decode lives one
//! layer up in the façade; this layer never sees value types.

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::codec::EncodedValue;
use crate::entry::{ClearMode, EntryRow, MAX_IDENTIFIER_CHARS, ParentRef};
use crate::errors::{CacheError, CacheResult};
use crate::hash::entry_hash;
use crate::settings::CacheSettings;
use crate::traits::{Clock, ConnectionFactory};

/// Truncate a partition or key to the schema's identifier width.
///
/// Truncation, not rejection: oversized identifiers are normalized the same
/// way on every operation, so a write and its read agree on the stored name.
fn normalize(raw: &str) -> Cow<'_, str> {
    match raw.char_indices().nth(MAX_IDENTIFIER_CHARS) {
        Some((byte_offset, _)) => Cow::Owned(raw[..byte_offset].to_string()),
        None => Cow::Borrowed(raw),
    }
}

/// The cache entry engine
///
/// Thread-safe; every operation checks a connection out of the factory's
/// pool, runs its statements and releases it on drop.
pub struct CacheEngine {
    factory: Arc<dyn ConnectionFactory>,
    clock: Arc<dyn Clock>,
    settings: Arc<RwLock<CacheSettings>>,
    /// Upserts since the last eviction sweep.
    insertions: AtomicU32,
    /// Total rows removed by eviction sweeps, for the stats snapshot.
    evicted_rows: AtomicU64,
}

impl CacheEngine {
    /// Assemble an engine from its collaborators
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        clock: Arc<dyn Clock>,
        settings: Arc<RwLock<CacheSettings>>,
    ) -> Self {
        Self {
            factory,
            clock,
            settings,
            insertions: AtomicU32::new(0),
            evicted_rows: AtomicU64::new(0),
        }
    }

    /// The factory this engine runs against
    pub fn factory(&self) -> &Arc<dyn ConnectionFactory> {
        &self.factory
    }

    /// Rows removed by eviction sweeps since construction
    pub fn evicted_rows_total(&self) -> u64 {
        self.evicted_rows.load(Ordering::Relaxed)
    }

    /// Upsert an encoded entry
    ///
    /// Builds the row (creation = now, parent slots filled left to right),
    /// executes the single-statement upsert, then bumps the insertion
    /// counter and runs an eviction sweep when it crosses the configured
    /// threshold. A negative `interval` is clamped to `0` (timed).
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when more parent keys are given than the backend
    /// has slots; storage errors from the statement itself.
    pub fn add(
        &self,
        partition: &str,
        key: &str,
        encoded: EncodedValue,
        utc_expiry: i64,
        interval: i64,
        parent_keys: &[&str],
    ) -> CacheResult<()> {
        let max_parents = self.factory.max_parent_keys();
        if parent_keys.len() > max_parents {
            return Err(CacheError::invalid(format!(
                "{} parent keys given, backend supports at most {max_parents}",
                parent_keys.len(),
            )));
        }

        let partition = normalize(partition);
        let key = normalize(key);
        let parents: Vec<ParentRef> = parent_keys
            .iter()
            .map(|parent| {
                let parent = normalize(parent);
                ParentRef {
                    hash: entry_hash(&partition, &parent),
                    key: parent.into_owned(),
                }
            })
            .collect();

        let row = EntryRow {
            hash: entry_hash(&partition, &key),
            partition: partition.into_owned(),
            key: key.into_owned(),
            utc_creation: self.clock.unix_seconds(),
            utc_expiry,
            interval: interval.max(0),
            compressed: encoded.compressed,
            value: encoded.bytes,
            parents,
        };

        self.factory.acquire()?.upsert_entry(&row)?;
        debug!(
            partition = %row.partition,
            key = %row.key,
            utc_expiry = row.utc_expiry,
            interval = row.interval,
            "entry upserted"
        );

        self.note_insertion();
        Ok(())
    }

    /// Read one entry and extend its expiry when it is sliding
    pub fn get(&self, partition: &str, key: &str) -> CacheResult<Option<EntryRow>> {
        let now = self.clock.unix_seconds();
        self.factory.acquire()?.get_entry(&normalize(partition), &normalize(key), now)
    }

    /// Read one entry without touching its expiry
    pub fn peek(&self, partition: &str, key: &str) -> CacheResult<Option<EntryRow>> {
        let now = self.clock.unix_seconds();
        self.factory.acquire()?.peek_entry(&normalize(partition), &normalize(key), now)
    }

    /// Read all live entries, extending expiry of the sliding ones
    pub fn get_many(&self, partition: Option<&str>) -> CacheResult<Vec<EntryRow>> {
        let now = self.clock.unix_seconds();
        let partition = partition.map(normalize);
        self.factory.acquire()?.get_many(partition.as_deref(), now)
    }

    /// Read all live entries without touching expiry
    pub fn peek_many(&self, partition: Option<&str>) -> CacheResult<Vec<EntryRow>> {
        let now = self.clock.unix_seconds();
        let partition = partition.map(normalize);
        self.factory.acquire()?.peek_many(partition.as_deref(), now)
    }

    /// Whether a live entry exists for `(partition, key)`
    pub fn contains(&self, partition: &str, key: &str) -> CacheResult<bool> {
        let now = self.clock.unix_seconds();
        self.factory.acquire()?.contains_entry(&normalize(partition), &normalize(key), now)
    }

    /// Count entries, optionally restricted to a partition
    ///
    /// `include_expired` widens the count to rows awaiting eviction.
    pub fn count(&self, partition: Option<&str>, include_expired: bool) -> CacheResult<u64> {
        let now = (!include_expired).then(|| self.clock.unix_seconds());
        let partition = partition.map(normalize);
        self.factory.acquire()?.count_entries(partition.as_deref(), now)
    }

    /// Delete one entry (and, through the schema, its dependents)
    pub fn remove(&self, partition: &str, key: &str) -> CacheResult<bool> {
        let removed =
            self.factory.acquire()?.delete_entry(&normalize(partition), &normalize(key))?;
        if removed {
            debug!(partition = %normalize(partition), key = %normalize(key), "entry removed");
        }
        Ok(removed)
    }

    /// Bulk delete by partition filter and [`ClearMode`]
    ///
    /// `ConsiderExpiry` is the eviction path and resets the insertion
    /// counter.
    pub fn clear(&self, partition: Option<&str>, mode: ClearMode) -> CacheResult<u64> {
        let now = self.clock.unix_seconds();
        let partition = partition.map(normalize);
        let removed = self.factory.acquire()?.delete_entries(partition.as_deref(), mode, now)?;
        if mode == ClearMode::ConsiderExpiry {
            self.insertions.store(0, Ordering::Relaxed);
            self.evicted_rows.fetch_add(removed, Ordering::Relaxed);
        }
        Ok(removed)
    }

    /// Remove every expired row across all partitions
    ///
    /// Idempotent; concurrent sweeps delete the same rows once between them.
    pub fn evict_expired(&self) -> CacheResult<u64> {
        let removed = self.clear(None, ClearMode::ConsiderExpiry)?;
        if removed > 0 {
            info!(removed, "evicted expired cache entries");
        }
        Ok(removed)
    }

    fn note_insertion(&self) {
        let threshold = self.settings.read().insertion_count_before_auto_clean;
        let count = self.insertions.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        if count >= threshold {
            // Best-effort: a failed sweep must not fail the add that
            // triggered it. The counter was not reset, so the next add
            // retries.
            if let Err(error) = self.evict_expired() {
                warn!(%error, "automatic eviction sweep failed");
            }
        }
    }
}
