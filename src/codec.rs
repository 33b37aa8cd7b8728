//! Value Pipeline
//!
//! serialize → (compress when large enough) → binary column, and back.
//! The per-entry `compressed` flag, not sniffing, decides the read path.

use std::io::Cursor;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::{CacheError, CacheResult};
use crate::traits::{Compressor, Serializer};

/// Encoded payload ready for the value column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedValue {
    /// Bytes to store
    pub bytes: Vec<u8>,
    /// Whether `bytes` went through the compressor
    pub compressed: bool,
}

/// The write/read pipeline between typed values and the value column
///
/// Generic over the serializer (like the rest of the typed surface) and
/// dynamic over the compressor, which never needs to know value types.
#[derive(Debug, Clone)]
pub struct ValueCodec<S> {
    serializer: Arc<S>,
    compressor: Arc<dyn Compressor>,
}

impl<S: Serializer> ValueCodec<S> {
    /// Build a pipeline from its two stages
    pub fn new(serializer: Arc<S>, compressor: Arc<dyn Compressor>) -> Self {
        Self { serializer, compressor }
    }

    /// Serializer stage, exposed for logging
    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// Encode a value for storage
    ///
    /// Serializes first; when the buffer reaches `min_compression_length`
    /// bytes it is additionally run through the compressor and the
    /// `compressed` flag is set.
    ///
    /// # Errors
    ///
    /// `Serialization` when either stage fails; this is raised to callers
    /// because an unencodable value is a programming error.
    pub fn encode<T: Serialize + ?Sized>(
        &self,
        value: &T,
        min_compression_length: usize,
    ) -> CacheResult<EncodedValue> {
        let serialized = self.serializer.serialize(value).map_err(CacheError::Serialization)?;

        if serialized.len() < min_compression_length {
            return Ok(EncodedValue { bytes: serialized, compressed: false });
        }

        let mut compressed = Vec::with_capacity(serialized.len() / 2);
        self.compressor
            .compress(&mut Cursor::new(&serialized), &mut compressed)
            .map_err(|e| CacheError::Serialization(anyhow::Error::new(e)))?;
        debug!(
            serializer = self.serializer.name(),
            compressor = self.compressor.name(),
            raw_len = serialized.len(),
            stored_len = compressed.len(),
            "compressed cache value"
        );
        Ok(EncodedValue { bytes: compressed, compressed: true })
    }

    /// Decode stored bytes back into a value
    ///
    /// # Errors
    ///
    /// `Deserialization` when decompression or deserialization fails; the
    /// engine reacts by dropping the offending row and reporting absence.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8], compressed: bool) -> CacheResult<T> {
        if compressed {
            let mut restored = Vec::with_capacity(bytes.len() * 2);
            self.compressor
                .decompress(&mut Cursor::new(bytes), &mut restored)
                .map_err(|e| CacheError::Deserialization(anyhow::Error::new(e)))?;
            self.serializer.deserialize(&restored).map_err(CacheError::Deserialization)
        } else {
            self.serializer.deserialize(bytes).map_err(CacheError::Deserialization)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::JsonSerializer;
    use crate::compression::GzipCompressor;

    fn codec() -> ValueCodec<JsonSerializer> {
        ValueCodec::new(Arc::new(JsonSerializer), Arc::new(GzipCompressor::default()))
    }

    #[test]
    fn small_values_skip_compression() {
        let encoded = codec().encode("tiny", 4096).unwrap();
        assert!(!encoded.compressed);
        let restored: String = codec().decode(&encoded.bytes, encoded.compressed).unwrap();
        assert_eq!(restored, "tiny");
    }

    #[test]
    fn large_values_are_compressed() {
        let value = "x".repeat(8192);
        let encoded = codec().encode(&value, 4096).unwrap();
        assert!(encoded.compressed);
        assert!(encoded.bytes.len() < value.len());
        let restored: String = codec().decode(&encoded.bytes, encoded.compressed).unwrap();
        assert_eq!(restored, value);
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        // The serialized form of a 10-byte string is 12 bytes with quotes.
        let value = "abcdefghij";
        let serialized_len = serde_json::to_vec(value).unwrap().len();
        let encoded = codec().encode(value, serialized_len).unwrap();
        assert!(encoded.compressed);
        let encoded = codec().encode(value, serialized_len + 1).unwrap();
        assert!(!encoded.compressed);
    }

    #[test]
    fn zero_threshold_compresses_everything() {
        let encoded = codec().encode(&1u8, 0).unwrap();
        assert!(encoded.compressed);
        let restored: u8 = codec().decode(&encoded.bytes, encoded.compressed).unwrap();
        assert_eq!(restored, 1);
    }

    #[test]
    fn corrupt_bytes_fail_as_deserialization() {
        let err = codec().decode::<String>(&[0xFF, 0x00, 0x12], true).unwrap_err();
        assert!(matches!(err, CacheError::Deserialization(_)));
        let err = codec().decode::<String>(&[0xFF, 0x00, 0x12], false).unwrap_err();
        assert!(matches!(err, CacheError::Deserialization(_)));
    }

    #[test]
    fn lying_compressed_flag_fails_safely() {
        let encoded = codec().encode("plain", usize::MAX).unwrap();
        assert!(!encoded.compressed);
        // Claiming the plain bytes are compressed must error, not panic.
        assert!(codec().decode::<String>(&encoded.bytes, true).is_err());
    }

    #[test]
    fn none_roundtrips() {
        let encoded = codec().encode(&Option::<u32>::None, 4096).unwrap();
        let restored: Option<u32> = codec().decode(&encoded.bytes, encoded.compressed).unwrap();
        assert_eq!(restored, None);
    }
}
