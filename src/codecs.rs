//! Serializer Implementations
//!
//! Built-in [`Serializer`](crate::traits::Serializer) impls for the value
//! pipeline. JSON is the default: stored rows stay inspectable with plain
//! SQL tooling, which matters for a cache that outlives the process that
//! wrote it. The bincode serializer (feature `bincode`) trades that for
//! density. Entries written with one serializer are not readable through
//! the other; pick one per store.

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::traits::Serializer;

/// Serializes values as UTF-8 JSON documents
///
/// The default serializer of [`CacheBuilder`](crate::CacheBuilder).
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        // Most cache payloads are small; a modest pre-size avoids the first
        // few growths without wasting space on tiny entries.
        let mut buf = Vec::with_capacity(128);
        serde_json::to_writer(&mut buf, value)?;
        Ok(buf)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn name(&self) -> &'static str {
        "serde_json"
    }
}

/// Serializes values in bincode's compact binary format
///
/// Denser than JSON for numeric-heavy payloads, at the cost of opaque
/// value columns.
#[cfg(feature = "bincode")]
#[cfg_attr(docsrs, doc(cfg(feature = "bincode")))]
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeSerializer;

#[cfg(feature = "bincode")]
impl Serializer for BincodeSerializer {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn name(&self) -> &'static str {
        "bincode"
    }
}
