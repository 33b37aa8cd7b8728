//! Common utilities for integration tests
//!
//! Every test gets its own uniquely named in-memory store so parallel tests
//! never share state, and a manual clock where expiry timing matters so no
//! test ever sleeps.

#![allow(dead_code)]

use std::sync::Arc;

use durable_cache::{Cache, CacheBuilder, CacheSettings, ManualClock};

/// Epoch all manual-clock tests start from.
pub const T0: i64 = 1_700_000_000;

/// Initialize tracing output once for the whole test binary
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A store name no other concurrently running test can collide with
pub fn unique_store(name: &str) -> String {
    format!("test_{}_{}", name, rand::random::<u32>())
}

/// Cache over a fresh in-memory store, system clock
pub fn build_cache(name: &str) -> Cache {
    init_tracing();
    CacheBuilder::new()
        .sqlite_in_memory(unique_store(name))
        .build()
        .expect("failed to build test cache")
}

/// Cache over a fresh in-memory store, driven by a manual clock
pub fn build_cache_with_clock(name: &str) -> (Cache, Arc<ManualClock>) {
    init_tracing();
    let clock = Arc::new(ManualClock::starting_at(T0));
    let cache = CacheBuilder::new()
        .sqlite_in_memory(unique_store(name))
        .with_clock(Arc::clone(&clock))
        .build()
        .expect("failed to build test cache");
    (cache, clock)
}

/// Cache with custom settings applied on top of a fresh in-memory store
pub fn build_cache_with_settings(
    name: &str,
    configure: impl FnOnce(&mut CacheSettings),
) -> (Cache, Arc<ManualClock>) {
    init_tracing();
    let clock = Arc::new(ManualClock::starting_at(T0));
    let mut settings = CacheSettings::default().with_data_source(unique_store(name));
    configure(&mut settings);
    let cache = CacheBuilder::new()
        .with_settings(settings.clone())
        .sqlite_in_memory(settings.data_source)
        .with_clock(Arc::clone(&clock))
        .build()
        .expect("failed to build test cache");
    (cache, clock)
}
