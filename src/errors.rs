//! Cache Error Taxonomy
//!
//! Splits failures into the classes the façade treats differently:
//! caller mistakes are raised, backend trouble is swallowed and logged.

/// Convenient result alias used throughout the crate
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors produced by cache operations
///
/// Only `InvalidArgument`, `Serialization` and `Disposed` ever reach callers
/// of the [`Cache`](crate::Cache) façade; the rest are recorded via
/// [`Cache::last_error`](crate::Cache::last_error) while the operation
/// returns a neutral value.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Caller programming error (null-ish input, too many parent keys, invalid setting)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The configured serializer could not encode the value
    #[error("failed to serialize cache value")]
    Serialization(#[source] anyhow::Error),

    /// Stored bytes could not be decoded back into a value
    #[error("failed to deserialize cache value")]
    Deserialization(#[source] anyhow::Error),

    /// The backend rejected or failed a statement
    #[error("storage backend error")]
    Storage(#[source] anyhow::Error),

    /// The cache was used after `close()`
    #[error("cache has been closed")]
    Disposed,

    /// The operation is not available on this backend
    #[error("operation not supported by the {0} backend")]
    NotSupported(&'static str),
}

impl CacheError {
    /// Wrap an arbitrary backend error as a storage failure
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage(anyhow::Error::new(err))
    }

    /// Build an `InvalidArgument` from anything printable
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Whether the façade should swallow this error instead of raising it
    #[must_use]
    pub fn is_swallowed(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Deserialization(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_swallowed() {
        let err = CacheError::storage(std::io::Error::other("disk on fire"));
        assert!(err.is_swallowed());
    }

    #[test]
    fn validation_errors_are_raised() {
        assert!(!CacheError::invalid("bad partition").is_swallowed());
        assert!(!CacheError::Disposed.is_swallowed());
    }
}
