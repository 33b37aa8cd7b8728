//! Cache Entry Model
//!
//! Passive data shapes for a cache row. All lifetime and cascade rules are
//! enforced by the engine and the backing schema, never here.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Partitions and keys are truncated to this many characters before use.
pub const MAX_IDENTIFIER_CHARS: usize = 255;

/// A dependency slot: hash and key of a parent entry in the same partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    /// Canonical hash of `(partition, parent_key)`
    pub hash: i64,
    /// Parent key, unique within the partition
    pub key: String,
}

/// One persisted row, exactly as the entries table stores it.
///
/// `value` holds the already-encoded payload; whether it went through the
/// compressor is recorded in `compressed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRow {
    /// Deterministic hash of `(partition, key)`; table primary key
    pub hash: i64,
    /// Namespace for the key
    pub partition: String,
    /// Key, unique within the partition
    pub key: String,
    /// Creation instant, seconds since the Unix epoch
    pub utc_creation: i64,
    /// Expiry instant, seconds since the Unix epoch
    pub utc_expiry: i64,
    /// Sliding-refresh seconds; `0` means timed (reads never extend)
    pub interval: i64,
    /// Whether `value` was run through the compressor
    pub compressed: bool,
    /// Encoded payload bytes
    pub value: Vec<u8>,
    /// Parent dependencies, at most the backend's slot count
    pub parents: Vec<ParentRef>,
}

impl EntryRow {
    /// Whether this row is invisible to reads at the given instant
    #[must_use]
    pub fn is_expired(&self, now_secs: i64) -> bool {
        self.utc_expiry < now_secs
    }

    /// Whether reads extend this row's expiry
    #[must_use]
    pub fn is_sliding(&self) -> bool {
        self.interval > 0
    }
}

/// A decoded entry with its metadata, as returned by `get_item`/`peek_item`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheItem<T> {
    /// Namespace the entry lives in
    pub partition: String,
    /// Key within the partition
    pub key: String,
    /// The decoded value
    pub value: T,
    /// When the entry was created
    pub utc_creation: DateTime<Utc>,
    /// When the entry stops being visible
    pub utc_expiry: DateTime<Utc>,
    /// Sliding interval; `None` for timed entries
    pub interval: Option<Duration>,
    /// Keys of the entries this one depends on
    pub parent_keys: Vec<String>,
}

impl<T> CacheItem<T> {
    /// Build the typed view over a raw row and its decoded value.
    pub(crate) fn from_row(row: EntryRow, value: T) -> Self {
        let interval =
            u64::try_from(row.interval).ok().filter(|&secs| secs > 0).map(Duration::from_secs);
        Self {
            partition: row.partition,
            key: row.key,
            value,
            utc_creation: timestamp(row.utc_creation),
            utc_expiry: timestamp(row.utc_expiry),
            interval,
            parent_keys: row.parents.into_iter().map(|p| p.key).collect(),
        }
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    match Utc.timestamp_opt(secs, 0) {
        chrono::LocalResult::Single(dt) => dt,
        _ => DateTime::<Utc>::MIN_UTC,
    }
}

/// Row filter used by `clear` and the expiry-aware counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearMode {
    /// Match every row regardless of expiry
    IgnoreExpiry,
    /// Match only rows whose expiry has already passed
    ConsiderExpiry,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(expiry: i64, interval: i64) -> EntryRow {
        EntryRow {
            hash: 1,
            partition: "p".to_string(),
            key: "k".to_string(),
            utc_creation: 0,
            utc_expiry: expiry,
            interval,
            compressed: false,
            value: Vec::new(),
            parents: Vec::new(),
        }
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        // A row expiring exactly "now" is still visible.
        assert!(!row(100, 0).is_expired(100));
        assert!(row(100, 0).is_expired(101));
    }

    #[test]
    fn sliding_requires_positive_interval() {
        assert!(row(100, 30).is_sliding());
        assert!(!row(100, 0).is_sliding());
    }

    #[test]
    fn item_view_maps_timed_interval_to_none() {
        let item = CacheItem::from_row(row(100, 0), 7u32);
        assert_eq!(item.interval, None);
        let item = CacheItem::from_row(row(100, 45), 7u32);
        assert_eq!(item.interval, Some(Duration::from_secs(45)));
    }
}
