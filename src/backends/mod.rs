//! Storage Backend Implementations
//!
//! This module contains the connection factories that render the cache's
//! engine contracts into dialect-specific SQL.
//!
//! # Available Backends
//!
//! ## Embedded (feature: `sqlite`, default)
//! - **SQLite file** - durable single-file store, WAL journaling
//! - **SQLite in-memory** - same engine over a named shared-cache store,
//!   pinned by an anchor connection for the cache's lifetime
//!
//! ## Client/Server (feature: `postgres`)
//! - **PostgreSQL** - shared cache reachable by multiple processes
//!
//! # Usage
//!
//! ```rust,no_run
//! use durable_cache::CacheSettings;
//! use durable_cache::backends::SqliteConnectionFactory;
//!
//! # fn example() -> durable_cache::CacheResult<()> {
//! let settings = CacheSettings::default().with_data_source("app-cache.db");
//! let factory = SqliteConnectionFactory::file(&settings)?;
//! # Ok(())
//! # }
//! ```

pub mod schema;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteConnectionFactory;

#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub use postgres::PostgresConnectionFactory;
