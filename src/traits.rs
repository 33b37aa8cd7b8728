//! Cache Collaborator Traits
//!
//! This module defines the trait abstractions that allow users to swap the
//! cache's collaborators and storage backends.
//!
//! # Architecture
//!
//! - `Serializer`: pluggable value ↔ bytes conversion
//! - `Compressor`: pluggable framed stream compression
//! - `Clock`: source of UTC time, swappable for deterministic tests
//! - `ConnectionFactory`: owns a pool of connections to one backend plus its
//!   rendered SQL and schema bootstrap
//! - `CacheConnection`: one pooled connection executing the engine's ordered
//!   SQL protocol in the backend's dialect
//!
//! # Example: Custom Serializer
//!
//! ```rust,ignore
//! use durable_cache::traits::Serializer;
//! use anyhow::Result;
//! use serde::{Serialize, de::DeserializeOwned};
//!
//! #[derive(Debug)]
//! struct MyCodec;
//!
//! impl Serializer for MyCodec {
//!     fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
//!         Ok(mycodec::to_vec(value)?)
//!     }
//!
//!     fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
//!         Ok(mycodec::from_slice(bytes)?)
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "mycodec"
//!     }
//! }
//! ```

use std::fmt::Debug;
use std::io::{Read, Write};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::entry::{ClearMode, EntryRow};
use crate::errors::CacheResult;
use crate::settings::CacheSettings;

/// Trait for cache value serialization/deserialization
///
/// Implementations must be deterministic: serializing the same value twice
/// must produce bytes that deserialize to equal values.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync + Debug` to support concurrent use
/// across threads and provide debugging capabilities.
pub trait Serializer: Send + Sync + Debug {
    /// Serialize a value to bytes
    ///
    /// # Returns
    ///
    /// * `Ok(bytes)` - Serialized byte representation
    /// * `Err(e)` - Serialization failed
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize bytes back into a value
    ///
    /// # Returns
    ///
    /// * `Ok(value)` - Deserialized value
    /// * `Err(e)` - Deserialization failed
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;

    /// Name of the serializer, used for logging and debugging
    fn name(&self) -> &'static str;
}

/// Trait for the optional value compression stage
///
/// Output must be framed: the decompressor gets only the compressed bytes
/// and must not need an out-of-band length to find the end of the stream.
pub trait Compressor: Send + Sync + Debug {
    /// Compress everything from `input` into `output`
    ///
    /// # Errors
    ///
    /// Returns an error if reading, writing, or the compression itself fails.
    fn compress(&self, input: &mut dyn Read, output: &mut dyn Write) -> std::io::Result<()>;

    /// Decompress everything from `input` into `output`
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is truncated or corrupt.
    fn decompress(&self, input: &mut dyn Read, output: &mut dyn Write) -> std::io::Result<()>;

    /// Name of the compressor, used for logging and debugging
    fn name(&self) -> &'static str;
}

/// Source of UTC time
///
/// All expiry decisions flow through this trait so tests can advance time
/// without sleeping. See [`ManualClock`](crate::clock::ManualClock).
pub trait Clock: Send + Sync + Debug {
    /// Current instant in UTC
    fn now(&self) -> DateTime<Utc>;

    /// Current instant as seconds since the Unix epoch
    fn unix_seconds(&self) -> i64 {
        self.now().timestamp()
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }

    fn unix_seconds(&self) -> i64 {
        (**self).unix_seconds()
    }
}

/// A pooled connection executing the cache's SQL protocol in one dialect
///
/// Implementations hold their backend's rendered statements as data and a
/// live connection checked out of the factory's pool; dropping the value
/// returns the connection. Every read predicate treats rows with
/// `utc_expiry < now` as absent.
pub trait CacheConnection {
    /// Insert or replace the row keyed by `row.hash` in a single statement
    fn upsert_entry(&mut self, row: &EntryRow) -> CacheResult<()>;

    /// Whether a non-expired row exists for `(partition, key)`
    fn contains_entry(&mut self, partition: &str, key: &str, now: i64) -> CacheResult<bool>;

    /// Count rows matching the optional partition filter
    ///
    /// `now = Some(secs)` counts only non-expired rows; `None` counts all.
    fn count_entries(&mut self, partition: Option<&str>, now: Option<i64>) -> CacheResult<u64>;

    /// Read one non-expired row without touching its expiry
    fn peek_entry(&mut self, partition: &str, key: &str, now: i64)
    -> CacheResult<Option<EntryRow>>;

    /// Read all non-expired rows for the optional partition, expiry untouched
    fn peek_many(&mut self, partition: Option<&str>, now: i64) -> CacheResult<Vec<EntryRow>>;

    /// Read one non-expired row and, when it is sliding, push its expiry to
    /// `now + interval` inside the same transaction
    ///
    /// The extension is guarded by the expiry observed in the select; losing
    /// that race is not an error and the observed row is still returned.
    fn get_entry(&mut self, partition: &str, key: &str, now: i64) -> CacheResult<Option<EntryRow>>;

    /// Bulk variant of [`get_entry`](Self::get_entry): fetch all matching
    /// rows, then extend every sliding one, committing only after all
    /// extensions succeed
    fn get_many(&mut self, partition: Option<&str>, now: i64) -> CacheResult<Vec<EntryRow>>;

    /// Delete the row for `(partition, key)`; returns whether a row existed
    ///
    /// Dependent rows go with it via the schema's cascade.
    fn delete_entry(&mut self, partition: &str, key: &str) -> CacheResult<bool>;

    /// Delete rows matching the optional partition and [`ClearMode`];
    /// returns the number of rows removed (cascade victims not included)
    fn delete_entries(
        &mut self,
        partition: Option<&str>,
        mode: ClearMode,
        now: i64,
    ) -> CacheResult<u64>;
}

/// Factory owning pooled connections, rendered SQL, and schema bootstrap for
/// one backend
///
/// The cache holds exactly one factory (`Arc<dyn ConnectionFactory>`);
/// dialect differences live inside the factory as data, not in the engine.
pub trait ConnectionFactory: Send + Sync {
    /// Check a connection out of the pool
    ///
    /// Blocks up to the pool's acquisition timeout when saturated.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the pool is exhausted or the backend is
    /// unreachable.
    fn acquire(&self) -> CacheResult<Box<dyn CacheConnection>>;

    /// Probe the schema and create it when missing or incomplete
    ///
    /// Safe to call repeatedly; runs once after construction and again after
    /// every [`rebuild`](Self::rebuild).
    fn bootstrap(&self) -> CacheResult<()>;

    /// Rebuild the connection string and pool from changed settings, then
    /// re-run [`bootstrap`](Self::bootstrap)
    fn rebuild(&self, settings: &CacheSettings) -> CacheResult<()>;

    /// Number of parent-key slots the schema carries (K ≥ 3)
    fn max_parent_keys(&self) -> usize;

    /// Bytes currently occupied by the store, when the backend can tell
    fn cache_size_bytes(&self) -> CacheResult<Option<u64>>;

    /// Reclaim unused space, where the backend supports it
    ///
    /// # Errors
    ///
    /// Returns [`NotSupported`](crate::CacheError::NotSupported) on backends
    /// without a vacuum operation.
    fn vacuum(&self) -> CacheResult<()>;

    /// Release long-lived resources on cache disposal
    ///
    /// The in-memory SQLite factory drops its anchor connection here, which
    /// destroys the shared store once the pool drains.
    fn shutdown(&self) {}

    /// Name of this backend (e.g. "sqlite", "postgres"), for logging
    fn name(&self) -> &'static str;
}
