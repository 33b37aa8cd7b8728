//! Durable Cache
//!
//! A partitioned, durable key/value cache persisted in a relational
//! database, featuring:
//! - **Three lifetime disciplines**: sliding (expiry extended on read),
//!   static (sliding with a long default interval), timed (fixed expiry)
//! - **Parent-key dependencies**: removing a parent cascades through its
//!   dependents, transitively
//! - **Opportunistic compression**: payloads past a size threshold are
//!   gzipped on write and restored on read
//! - **Threshold-triggered eviction**: expired rows are swept in bulk after
//!   a configurable number of writes
//! - **Pluggable backends**: file-backed SQLite, shared in-memory SQLite,
//!   and PostgreSQL, behind one connection-factory seam
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use durable_cache::CacheBuilder;
//!
//! fn main() -> durable_cache::CacheResult<()> {
//!     let cache = CacheBuilder::new().sqlite_file("app-cache.db").build()?;
//!
//!     // Sliding entry: stays alive while it keeps being read
//!     cache.add_sliding("sessions", "alice", &("token", 42), Duration::from_secs(600))?;
//!
//!     // Reads extend sliding expiries; absent keys come back as None
//!     if let Some((token, hits)) = cache.get::<(String, u32)>("sessions", "alice")? {
//!         println!("{token}: {hits}");
//!     }
//!
//!     // Dependent entries disappear with their parent
//!     cache.add_static("config", "tenant", &"acme")?;
//!     cache.add_static_with_parents("config", "tenant-theme", &"dark", &["tenant"])?;
//!     cache.remove("config", "tenant")?;
//!     assert_eq!(cache.get::<String>("config", "tenant-theme")?, None);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! add / get / peek / clear            (Cache façade: validation, typed
//!        │                             encode/decode, error swallowing)
//!        ▼
//! serialize → compress? → bytes       (value pipeline)
//!        ▼
//! upsert / read+extend / evict        (entry engine: ordered SQL protocol)
//!        ▼
//! connection factory ─ pooled connections, rendered dialect SQL, schema
//!        ▼
//! SQLite file │ SQLite memory │ PostgreSQL
//! ```
//!
//! # Consistency Contract
//!
//! The cache is synchronous and thread-safe. A successful write is visible
//! to a subsequent read on the same cache under the backend's default
//! isolation; expiry extension is optimistic and best-effort under
//! contention. This is a cache, not an authoritative store.

pub mod backends;
pub mod builder;
pub mod cache;
pub mod clock;
pub mod codec;
pub mod codecs;
pub mod compression;
pub mod engine;
pub mod entry;
pub mod errors;
pub mod hash;
pub mod settings;
pub mod traits;

pub use builder::CacheBuilder;
pub use cache::{Cache, CacheStats};
pub use clock::{ManualClock, SystemClock};
pub use codec::{EncodedValue, ValueCodec};
pub use codecs::JsonSerializer;
#[cfg(feature = "bincode")]
pub use codecs::BincodeSerializer;
pub use compression::GzipCompressor;
pub use engine::CacheEngine;
pub use entry::{CacheItem, ClearMode, EntryRow, ParentRef};
pub use errors::{CacheError, CacheResult};
pub use settings::{CacheSettings, DEFAULT_PARTITION};
pub use traits::{CacheConnection, Clock, Compressor, ConnectionFactory, Serializer};

#[cfg(feature = "sqlite")]
pub use backends::SqliteConnectionFactory;

#[cfg(feature = "postgres")]
pub use backends::PostgresConnectionFactory;
