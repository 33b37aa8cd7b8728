//! Cache Builder
//!
//! Provides a flexible builder for constructing a [`Cache`] with custom
//! settings, backends and collaborators.
//!
//! # Example: Default Backend (file-backed SQLite)
//!
//! ```rust,no_run
//! use durable_cache::CacheBuilder;
//!
//! # fn main() -> durable_cache::CacheResult<()> {
//! let cache = CacheBuilder::new().sqlite_file("app-cache.db").build()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Example: Custom Collaborators
//!
//! ```rust,ignore
//! let cache = CacheBuilder::new()
//!     .sqlite_in_memory("tests")
//!     .with_serializer(BincodeSerializer)
//!     .with_clock(ManualClock::starting_at(0))
//!     .build()?;
//! ```

use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::Cache;
use crate::clock::SystemClock;
use crate::codecs::JsonSerializer;
use crate::compression::GzipCompressor;
use crate::errors::CacheResult;
use crate::settings::CacheSettings;
use crate::traits::{Clock, Compressor, ConnectionFactory, Serializer};

#[cfg(not(any(feature = "sqlite", feature = "postgres")))]
use crate::errors::CacheError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendKind {
    Unset,
    #[cfg(feature = "sqlite")]
    SqliteFile,
    #[cfg(feature = "sqlite")]
    SqliteMemory,
    #[cfg(feature = "postgres")]
    Postgres,
}

/// Builder for a [`Cache`]
///
/// Defaults: file-backed SQLite at the settings' `data_source`, JSON
/// serialization, gzip compression, and the system clock.
pub struct CacheBuilder<S: Serializer = JsonSerializer> {
    settings: CacheSettings,
    serializer: Arc<S>,
    compressor: Arc<dyn Compressor>,
    clock: Arc<dyn Clock>,
    factory: Option<Arc<dyn ConnectionFactory>>,
    backend: BackendKind,
}

impl CacheBuilder<JsonSerializer> {
    /// Start a builder with default settings and collaborators
    #[must_use]
    pub fn new() -> Self {
        Self {
            settings: CacheSettings::default(),
            serializer: Arc::new(JsonSerializer),
            compressor: Arc::new(GzipCompressor::default()),
            clock: Arc::new(SystemClock),
            factory: None,
            backend: BackendKind::Unset,
        }
    }
}

impl Default for CacheBuilder<JsonSerializer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Serializer> CacheBuilder<S> {
    /// Replace the settings wholesale
    #[must_use]
    pub fn with_settings(mut self, settings: CacheSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Use a different serializer (e.g. `BincodeSerializer`)
    #[must_use]
    pub fn with_serializer<S2: Serializer>(self, serializer: S2) -> CacheBuilder<S2> {
        CacheBuilder {
            settings: self.settings,
            serializer: Arc::new(serializer),
            compressor: self.compressor,
            clock: self.clock,
            factory: self.factory,
            backend: self.backend,
        }
    }

    /// Use a different compressor
    #[must_use]
    pub fn with_compressor(mut self, compressor: impl Compressor + 'static) -> Self {
        self.compressor = Arc::new(compressor);
        self
    }

    /// Use a different clock (e.g. a manual clock in tests)
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Use a pre-built connection factory instead of the built-in backends
    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Store the cache in a SQLite database file at `path`
    #[cfg(feature = "sqlite")]
    #[must_use]
    pub fn sqlite_file(mut self, path: impl Into<String>) -> Self {
        self.settings.data_source = path.into();
        self.backend = BackendKind::SqliteFile;
        self
    }

    /// Store the cache in a named shared in-memory SQLite store
    #[cfg(feature = "sqlite")]
    #[must_use]
    pub fn sqlite_in_memory(mut self, store_name: impl Into<String>) -> Self {
        self.settings.data_source = store_name.into();
        self.backend = BackendKind::SqliteMemory;
        self
    }

    /// Store the cache in a PostgreSQL database reachable at `url`
    #[cfg(feature = "postgres")]
    #[must_use]
    pub fn postgres(mut self, url: impl Into<String>) -> Self {
        self.settings.data_source = url.into();
        self.backend = BackendKind::Postgres;
        self
    }

    /// Validate settings, open the backend, bootstrap the schema and return
    /// the ready cache
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for bad settings or a missing backend; storage
    /// errors when the backend cannot be opened or bootstrapped.
    pub fn build(self) -> CacheResult<Cache<S>> {
        self.settings.validate()?;

        let factory: Arc<dyn ConnectionFactory> = match self.factory {
            Some(factory) => factory,
            None => Self::open_backend(self.backend, &self.settings)?,
        };
        factory.bootstrap()?;

        let settings = Arc::new(RwLock::new(self.settings));
        Ok(Cache::from_parts(factory, self.serializer, self.compressor, self.clock, settings))
    }

    #[cfg(feature = "sqlite")]
    fn open_backend(
        backend: BackendKind,
        settings: &CacheSettings,
    ) -> CacheResult<Arc<dyn ConnectionFactory>> {
        use crate::backends::SqliteConnectionFactory;
        match backend {
            // With no explicit choice the data source names a database file.
            BackendKind::Unset | BackendKind::SqliteFile => {
                Ok(Arc::new(SqliteConnectionFactory::file(settings)?))
            }
            BackendKind::SqliteMemory => {
                Ok(Arc::new(SqliteConnectionFactory::in_memory(settings)?))
            }
            #[cfg(feature = "postgres")]
            BackendKind::Postgres => {
                Ok(Arc::new(crate::backends::PostgresConnectionFactory::connect(settings)?))
            }
        }
    }

    #[cfg(all(not(feature = "sqlite"), feature = "postgres"))]
    fn open_backend(
        backend: BackendKind,
        settings: &CacheSettings,
    ) -> CacheResult<Arc<dyn ConnectionFactory>> {
        use crate::backends::PostgresConnectionFactory;
        match backend {
            BackendKind::Postgres => Ok(Arc::new(PostgresConnectionFactory::connect(settings)?)),
            BackendKind::Unset => Err(crate::errors::CacheError::invalid(
                "no storage backend selected; call postgres() or provide a factory",
            )),
        }
    }

    #[cfg(not(any(feature = "sqlite", feature = "postgres")))]
    fn open_backend(
        _backend: BackendKind,
        _settings: &CacheSettings,
    ) -> CacheResult<Arc<dyn ConnectionFactory>> {
        Err(CacheError::invalid(
            "no storage backend features enabled; provide a factory via with_factory",
        ))
    }
}
