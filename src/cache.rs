//! Cache Façade - Typed Public Operations
//!
//! The user-facing surface: partition/key addressing, the three lifetime
//! disciplines, typed encode/decode through the value pipeline, and the
//! error-swallowing contract (reads never fail observably; storage trouble
//! is logged, recorded in `last_error`, and turned into a neutral result).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::codec::ValueCodec;
use crate::codecs::JsonSerializer;
use crate::engine::CacheEngine;
use crate::entry::{CacheItem, ClearMode, EntryRow};
use crate::errors::{CacheError, CacheResult};
use crate::settings::CacheSettings;
use crate::traits::{Clock, Compressor, ConnectionFactory, Serializer};

/// Operation counters kept by the façade
#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    removals: AtomicU64,
    swallowed_errors: AtomicU64,
}

/// Point-in-time view of the cache's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that returned a value
    pub hits: u64,
    /// Reads that returned nothing (absent, expired, or undecodable)
    pub misses: u64,
    /// Successful upserts
    pub inserts: u64,
    /// Successful explicit removals
    pub removals: u64,
    /// Rows removed by eviction sweeps
    pub evicted_rows: u64,
    /// Errors swallowed into neutral results
    pub swallowed_errors: u64,
}

struct CacheInner<S> {
    engine: CacheEngine,
    codec: ValueCodec<S>,
    clock: Arc<dyn Clock>,
    settings: Arc<RwLock<CacheSettings>>,
    counters: Counters,
    last_error: Mutex<Option<Arc<CacheError>>>,
    disposed: AtomicBool,
}

/// Partitioned durable key/value cache
///
/// Cheap to clone (`Arc` inside) and safe to share across threads; every
/// operation checks a pooled connection out of the backend factory.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use durable_cache::CacheBuilder;
///
/// # fn main() -> durable_cache::CacheResult<()> {
/// let cache = CacheBuilder::new().sqlite_in_memory("demo").build()?;
///
/// cache.add_sliding("sessions", "alice", &42u32, Duration::from_secs(600))?;
/// let hits: Option<u32> = cache.get("sessions", "alice")?;
/// assert_eq!(hits, Some(42));
/// # Ok(())
/// # }
/// ```
pub struct Cache<S: Serializer = JsonSerializer> {
    inner: Arc<CacheInner<S>>,
}

impl<S: Serializer> Clone for Cache<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<S: Serializer> Cache<S> {
    pub(crate) fn from_parts(
        factory: Arc<dyn ConnectionFactory>,
        serializer: Arc<S>,
        compressor: Arc<dyn Compressor>,
        clock: Arc<dyn Clock>,
        settings: Arc<RwLock<CacheSettings>>,
    ) -> Self {
        let engine = CacheEngine::new(factory, Arc::clone(&clock), Arc::clone(&settings));
        let codec = ValueCodec::new(serializer, compressor);
        debug!(serializer = codec.serializer().name(), "cache façade assembled");
        Self {
            inner: Arc::new(CacheInner {
                engine,
                codec,
                clock,
                settings,
                counters: Counters::default(),
                last_error: Mutex::new(None),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    // ----- lifetime-discipline writes -------------------------------------

    /// Upsert an entry whose expiry slides forward on every read
    ///
    /// The entry expires `interval` after the write, and every successful
    /// `get` within the window pushes the expiry to `now + interval` again.
    ///
    /// # Errors
    ///
    /// `Serialization` when the value cannot be encoded, `Disposed` after
    /// `close()`. Storage failures are swallowed and the write becomes a
    /// no-op.
    pub fn add_sliding<T: Serialize + ?Sized>(
        &self,
        partition: &str,
        key: &str,
        value: &T,
        interval: Duration,
    ) -> CacheResult<()> {
        self.add_sliding_with_parents(partition, key, value, interval, &[])
    }

    /// [`add_sliding`](Self::add_sliding) with parent-key dependencies
    ///
    /// # Errors
    ///
    /// Additionally `InvalidArgument` when more parent keys are given than
    /// the backend supports.
    pub fn add_sliding_with_parents<T: Serialize + ?Sized>(
        &self,
        partition: &str,
        key: &str,
        value: &T,
        interval: Duration,
        parent_keys: &[&str],
    ) -> CacheResult<()> {
        let interval = secs(interval);
        let expiry = self.inner.clock.unix_seconds().saturating_add(interval);
        self.add_inner(partition, key, value, expiry, interval, parent_keys)
    }

    /// [`add_sliding`](Self::add_sliding) into the default partition
    ///
    /// # Errors
    ///
    /// Same as [`add_sliding`](Self::add_sliding).
    pub fn add_sliding_to_default_partition<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        interval: Duration,
    ) -> CacheResult<()> {
        self.add_sliding(&self.default_partition(), key, value, interval)
    }

    /// Upsert a long-lived sliding entry using the configured static
    /// interval (30 days by default)
    ///
    /// # Errors
    ///
    /// Same as [`add_sliding`](Self::add_sliding).
    pub fn add_static<T: Serialize + ?Sized>(
        &self,
        partition: &str,
        key: &str,
        value: &T,
    ) -> CacheResult<()> {
        self.add_static_with_parents(partition, key, value, &[])
    }

    /// [`add_static`](Self::add_static) with parent-key dependencies
    ///
    /// # Errors
    ///
    /// Same as [`add_sliding_with_parents`](Self::add_sliding_with_parents).
    pub fn add_static_with_parents<T: Serialize + ?Sized>(
        &self,
        partition: &str,
        key: &str,
        value: &T,
        parent_keys: &[&str],
    ) -> CacheResult<()> {
        let interval = self.inner.settings.read().static_interval_secs();
        let expiry = self.inner.clock.unix_seconds().saturating_add(interval);
        self.add_inner(partition, key, value, expiry, interval, parent_keys)
    }

    /// [`add_static`](Self::add_static) into the default partition
    ///
    /// # Errors
    ///
    /// Same as [`add_static`](Self::add_static).
    pub fn add_static_to_default_partition<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> CacheResult<()> {
        self.add_static(&self.default_partition(), key, value)
    }

    /// Upsert an entry with a fixed absolute expiry, never extended by reads
    ///
    /// # Errors
    ///
    /// Same as [`add_sliding`](Self::add_sliding).
    pub fn add_timed<T: Serialize + ?Sized>(
        &self,
        partition: &str,
        key: &str,
        value: &T,
        utc_expiry: DateTime<Utc>,
    ) -> CacheResult<()> {
        self.add_timed_with_parents(partition, key, value, utc_expiry, &[])
    }

    /// [`add_timed`](Self::add_timed) with parent-key dependencies
    ///
    /// # Errors
    ///
    /// Same as [`add_sliding_with_parents`](Self::add_sliding_with_parents).
    pub fn add_timed_with_parents<T: Serialize + ?Sized>(
        &self,
        partition: &str,
        key: &str,
        value: &T,
        utc_expiry: DateTime<Utc>,
        parent_keys: &[&str],
    ) -> CacheResult<()> {
        self.add_inner(partition, key, value, utc_expiry.timestamp(), 0, parent_keys)
    }

    /// [`add_timed`](Self::add_timed) into the default partition
    ///
    /// # Errors
    ///
    /// Same as [`add_timed`](Self::add_timed).
    pub fn add_timed_to_default_partition<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        utc_expiry: DateTime<Utc>,
    ) -> CacheResult<()> {
        self.add_timed(&self.default_partition(), key, value, utc_expiry)
    }

    fn add_inner<T: Serialize + ?Sized>(
        &self,
        partition: &str,
        key: &str,
        value: &T,
        utc_expiry: i64,
        interval: i64,
        parent_keys: &[&str],
    ) -> CacheResult<()> {
        self.ensure_open()?;
        let threshold = self.inner.settings.read().min_value_length_for_compression;
        // Encoding happens before any connection is held.
        let encoded = self.inner.codec.encode(value, threshold)?;
        let result =
            self.inner.engine.add(partition, key, encoded, utc_expiry, interval, parent_keys);
        if result.is_ok() {
            self.inner.counters.inserts.fetch_add(1, Ordering::Relaxed);
        }
        self.swallow("add", (), result)
    }

    // ----- reads ----------------------------------------------------------

    /// Read a value, extending the expiry of sliding entries
    ///
    /// # Errors
    ///
    /// Only `Disposed`; absent keys, expired rows, undecodable values and
    /// storage failures all come back as `Ok(None)`.
    pub fn get<T: DeserializeOwned>(&self, partition: &str, key: &str) -> CacheResult<Option<T>> {
        self.ensure_open()?;
        let result = self.fetch_decoded(partition, key, true).map(|hit| hit.map(|(_, v)| v));
        self.swallow("get", None, result)
    }

    /// [`get`](Self::get) against the default partition
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub fn get_from_default_partition<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> CacheResult<Option<T>> {
        self.get(&self.default_partition(), key)
    }

    /// Read an entry with its metadata, extending sliding expiry
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub fn get_item<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
    ) -> CacheResult<Option<CacheItem<T>>> {
        self.ensure_open()?;
        let result = self
            .fetch_decoded(partition, key, true)
            .map(|hit| hit.map(|(row, value)| CacheItem::from_row(row, value)));
        self.swallow("get_item", None, result)
    }

    /// Read a value without touching its expiry
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub fn peek<T: DeserializeOwned>(&self, partition: &str, key: &str) -> CacheResult<Option<T>> {
        self.ensure_open()?;
        let result = self.fetch_decoded(partition, key, false).map(|hit| hit.map(|(_, v)| v));
        self.swallow("peek", None, result)
    }

    /// [`peek`](Self::peek) against the default partition
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub fn peek_from_default_partition<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> CacheResult<Option<T>> {
        self.peek(&self.default_partition(), key)
    }

    /// Read an entry with its metadata without touching its expiry
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub fn peek_item<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
    ) -> CacheResult<Option<CacheItem<T>>> {
        self.ensure_open()?;
        let result = self
            .fetch_decoded(partition, key, false)
            .map(|hit| hit.map(|(row, value)| CacheItem::from_row(row, value)));
        self.swallow("peek_item", None, result)
    }

    /// Read every live entry, optionally filtered by partition, extending
    /// sliding expiries
    ///
    /// Entries whose stored bytes no longer decode are dropped from the
    /// result and removed from the store.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get); storage failures yield an empty list.
    pub fn get_items<T: DeserializeOwned>(
        &self,
        partition: Option<&str>,
    ) -> CacheResult<Vec<CacheItem<T>>> {
        self.ensure_open()?;
        let rows = self.swallow("get_items", Vec::new(), self.inner.engine.get_many(partition))?;
        Ok(self.decode_rows(rows))
    }

    /// [`get_items`](Self::get_items) without expiry extension
    ///
    /// # Errors
    ///
    /// Same as [`get_items`](Self::get_items).
    pub fn peek_items<T: DeserializeOwned>(
        &self,
        partition: Option<&str>,
    ) -> CacheResult<Vec<CacheItem<T>>> {
        self.ensure_open()?;
        let rows = self.swallow("peek_items", Vec::new(), self.inner.engine.peek_many(partition))?;
        Ok(self.decode_rows(rows))
    }

    /// Read the value, or compute it, store it as a timed entry and return it
    ///
    /// The getter runs only on a miss; its result is upserted with
    /// `interval = 0` and the given absolute expiry.
    ///
    /// # Errors
    ///
    /// `Serialization` when the produced value cannot be encoded,
    /// `InvalidArgument` for oversized parent lists, `Disposed` after
    /// `close()`.
    pub fn get_or_add_timed<T, F>(
        &self,
        partition: &str,
        key: &str,
        utc_expiry: DateTime<Utc>,
        parent_keys: &[&str],
        value_getter: F,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.get(partition, key)? {
            return Ok(value);
        }
        let value = value_getter();
        self.add_timed_with_parents(partition, key, &value, utc_expiry, parent_keys)?;
        Ok(value)
    }

    // ----- predicates and counts ------------------------------------------

    /// Whether a live entry exists for `(partition, key)`
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get); storage failures yield `false`.
    pub fn contains(&self, partition: &str, key: &str) -> CacheResult<bool> {
        self.ensure_open()?;
        let result = self.inner.engine.contains(partition, key);
        self.swallow("contains", false, result)
    }

    /// Number of live entries, optionally restricted to one partition
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get); storage failures yield `0`.
    pub fn count(&self, partition: Option<&str>) -> CacheResult<u64> {
        self.ensure_open()?;
        let result = self.inner.engine.count(partition, false);
        self.swallow("count", 0, result)
    }

    /// Number of entries including expired rows still awaiting eviction
    ///
    /// # Errors
    ///
    /// Same as [`count`](Self::count).
    pub fn count_including_expired(&self, partition: Option<&str>) -> CacheResult<u64> {
        self.ensure_open()?;
        let result = self.inner.engine.count(partition, true);
        self.swallow("count_including_expired", 0, result)
    }

    // ----- removal --------------------------------------------------------

    /// Remove one entry; dependents cascade with it
    ///
    /// # Errors
    ///
    /// `Disposed` only; storage failures yield `false`.
    pub fn remove(&self, partition: &str, key: &str) -> CacheResult<bool> {
        self.ensure_open()?;
        let result = self.inner.engine.remove(partition, key);
        if matches!(result, Ok(true)) {
            self.inner.counters.removals.fetch_add(1, Ordering::Relaxed);
        }
        self.swallow("remove", false, result)
    }

    /// Bulk-remove entries by partition filter and [`ClearMode`]; returns
    /// the number of rows removed
    ///
    /// # Errors
    ///
    /// `Disposed` only; storage failures yield `0`.
    pub fn clear(&self, partition: Option<&str>, mode: ClearMode) -> CacheResult<u64> {
        self.ensure_open()?;
        let result = self.inner.engine.clear(partition, mode);
        self.swallow("clear", 0, result)
    }

    /// Remove only expired rows, the same sweep the eviction driver runs
    ///
    /// # Errors
    ///
    /// Same as [`clear`](Self::clear).
    pub fn clear_expired(&self, partition: Option<&str>) -> CacheResult<u64> {
        self.clear(partition, ClearMode::ConsiderExpiry)
    }

    // ----- maintenance and lifecycle --------------------------------------

    /// Reclaim unused space on backends that support it
    ///
    /// # Errors
    ///
    /// `NotSupported` for backends without a vacuum operation; storage
    /// errors are raised, not swallowed, because this is an explicit
    /// maintenance call.
    pub fn vacuum(&self) -> CacheResult<()> {
        self.ensure_open()?;
        self.inner.engine.factory().vacuum()
    }

    /// Bytes currently occupied by the store, when the backend can tell
    ///
    /// # Errors
    ///
    /// `Disposed` only; storage failures yield `None`.
    pub fn cache_size_bytes(&self) -> CacheResult<Option<u64>> {
        self.ensure_open()?;
        let result = self.inner.engine.factory().cache_size_bytes();
        self.swallow("cache_size_bytes", None, result)
    }

    /// Apply a settings change, revalidate, and rebuild the backend when a
    /// data-source-affecting option moved
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the mutated settings fail validation; storage
    /// errors when the rebuilt pool cannot reach the backend.
    pub fn reconfigure<F>(&self, mutate: F) -> CacheResult<()>
    where
        F: FnOnce(&mut CacheSettings),
    {
        self.ensure_open()?;
        let current = self.inner.settings.read().clone();
        let mut candidate = current.clone();
        mutate(&mut candidate);
        candidate.validate()?;

        let needs_rebuild = candidate.data_source != current.data_source
            || candidate.max_cache_size_mb != current.max_cache_size_mb
            || candidate.max_journal_size_mb != current.max_journal_size_mb;
        if needs_rebuild {
            self.inner.engine.factory().rebuild(&candidate)?;
            info!(data_source = %candidate.data_source, "cache backend rebuilt after reconfigure");
        }
        *self.inner.settings.write() = candidate;
        Ok(())
    }

    /// Dispose the cache
    ///
    /// Later operations fail with `Disposed`. Closing twice is a no-op. For
    /// the in-memory backend this releases the anchor connection, letting
    /// the store be destroyed once pooled connections drain.
    pub fn close(&self) {
        if !self.inner.disposed.swap(true, Ordering::SeqCst) {
            self.inner.engine.factory().shutdown();
            info!("cache closed");
        }
    }

    // ----- introspection --------------------------------------------------

    /// Snapshot of the operation counters
    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        CacheStats {
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            inserts: counters.inserts.load(Ordering::Relaxed),
            removals: counters.removals.load(Ordering::Relaxed),
            evicted_rows: self.inner.engine.evicted_rows_total(),
            swallowed_errors: counters.swallowed_errors.load(Ordering::Relaxed),
        }
    }

    /// The most recently swallowed error, if any
    pub fn last_error(&self) -> Option<Arc<CacheError>> {
        self.inner.last_error.lock().clone()
    }

    /// Copy of the current settings
    pub fn settings(&self) -> CacheSettings {
        self.inner.settings.read().clone()
    }

    /// The partition used by the `*_default_partition` operations
    pub fn default_partition(&self) -> String {
        self.inner.settings.read().default_partition.clone()
    }

    // ----- internals ------------------------------------------------------

    fn ensure_open(&self) -> CacheResult<()> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(CacheError::Disposed);
        }
        Ok(())
    }

    /// Fetch one row and decode it; a failing decode removes the row and
    /// surfaces as a `Deserialization` error for the swallowing layer.
    fn fetch_decoded<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
        extend: bool,
    ) -> CacheResult<Option<(EntryRow, T)>> {
        let row = if extend {
            self.inner.engine.get(partition, key)?
        } else {
            self.inner.engine.peek(partition, key)?
        };
        let Some(row) = row else {
            self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };
        match self.inner.codec.decode(&row.value, row.compressed) {
            Ok(value) => {
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some((row, value)))
            }
            Err(err) => {
                warn!(
                    partition = %row.partition,
                    key = %row.key,
                    "stored value no longer decodes, removing entry"
                );
                let _ = self.inner.engine.remove(&row.partition, &row.key);
                self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    /// Decode a batch of rows, silently dropping and removing the ones that
    /// no longer decode.
    fn decode_rows<T: DeserializeOwned>(&self, rows: Vec<EntryRow>) -> Vec<CacheItem<T>> {
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            match self.inner.codec.decode(&row.value, row.compressed) {
                Ok(value) => items.push(CacheItem::from_row(row, value)),
                Err(err) => {
                    warn!(
                        partition = %row.partition,
                        key = %row.key,
                        "stored value no longer decodes, removing entry"
                    );
                    let _ = self.inner.engine.remove(&row.partition, &row.key);
                    self.record_swallowed("decode", err);
                }
            }
        }
        items
    }

    fn record_swallowed(&self, operation: &'static str, err: CacheError) {
        warn!(operation, error = %err, "cache operation swallowed an error");
        self.inner.counters.swallowed_errors.fetch_add(1, Ordering::Relaxed);
        *self.inner.last_error.lock() = Some(Arc::new(err));
    }

    fn swallow<T>(&self, operation: &'static str, neutral: T, result: CacheResult<T>) -> CacheResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) if err.is_swallowed() => {
                self.record_swallowed(operation, err);
                Ok(neutral)
            }
            Err(err) => Err(err),
        }
    }
}

fn secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}
