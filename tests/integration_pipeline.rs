//! Value-pipeline tests: compression threshold and corrupt-value recovery

mod common;

use std::sync::Arc;

use common::*;
use durable_cache::{
    CacheBuilder, CacheEngine, CacheSettings, ClearMode, ConnectionFactory, EncodedValue,
    SqliteConnectionFactory, SystemClock,
};
use parking_lot::RwLock;

/// A façade and a byte-level engine over the same store, so tests can both
/// inspect raw rows and inject broken ones.
fn cache_and_engine(name: &str) -> (durable_cache::Cache, CacheEngine) {
    init_tracing();
    let settings = CacheSettings::default().with_data_source(unique_store(name));
    let factory: Arc<dyn ConnectionFactory> =
        Arc::new(SqliteConnectionFactory::in_memory(&settings).unwrap());
    factory.bootstrap().unwrap();

    let engine = CacheEngine::new(
        Arc::clone(&factory),
        Arc::new(SystemClock),
        Arc::new(RwLock::new(settings.clone())),
    );
    let cache =
        CacheBuilder::new().with_settings(settings).with_factory(factory).build().unwrap();
    (cache, engine)
}

fn far_future() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now() + chrono::Duration::hours(1)
}

#[test]
fn values_below_the_threshold_stay_uncompressed() {
    let (cache, engine) = cache_and_engine("pipeline_small");

    // 4093 chars serialize to 4095 bytes of JSON, one short of the default
    // 4096 threshold.
    let small = "a".repeat(4093);
    cache.add_timed("p", "small", &small, far_future()).unwrap();

    let row = engine.peek("p", "small").unwrap().unwrap();
    assert!(!row.compressed);
    assert_eq!(cache.get::<String>("p", "small").unwrap().unwrap(), small);
}

#[test]
fn values_past_the_threshold_are_compressed() {
    let (cache, engine) = cache_and_engine("pipeline_large");

    let large = "b".repeat(16 * 1024);
    cache.add_timed("p", "large", &large, far_future()).unwrap();

    let row = engine.peek("p", "large").unwrap().unwrap();
    assert!(row.compressed);
    assert!(row.value.len() < large.len(), "stored form should be smaller");
    assert_eq!(cache.get::<String>("p", "large").unwrap().unwrap(), large);
}

#[test]
fn threshold_is_configurable_down_to_zero() {
    init_tracing();
    let mut settings = CacheSettings::default().with_data_source(unique_store("pipeline_zero"));
    settings.min_value_length_for_compression = 0;
    let factory: Arc<dyn ConnectionFactory> =
        Arc::new(SqliteConnectionFactory::in_memory(&settings).unwrap());
    factory.bootstrap().unwrap();
    let engine = CacheEngine::new(
        Arc::clone(&factory),
        Arc::new(SystemClock),
        Arc::new(RwLock::new(settings.clone())),
    );
    let cache =
        CacheBuilder::new().with_settings(settings).with_factory(factory).build().unwrap();

    cache.add_timed("p", "tiny", &1u8, far_future()).unwrap();
    let row = engine.peek("p", "tiny").unwrap().unwrap();
    assert!(row.compressed);
    assert_eq!(cache.get::<u8>("p", "tiny").unwrap(), Some(1));
}

#[test]
fn garbage_bytes_read_as_absent_and_the_row_is_removed() {
    let (cache, engine) = cache_and_engine("pipeline_garbage");

    let garbage: Vec<u8> = (0..32u8).map(|i| i.wrapping_mul(97).wrapping_add(13)).collect();
    engine
        .add(
            "p",
            "broken",
            EncodedValue { bytes: garbage, compressed: false },
            i64::MAX,
            0,
            &[],
        )
        .unwrap();

    assert_eq!(cache.get::<String>("p", "broken").unwrap(), None);
    // The offending row is gone, not just skipped.
    assert!(engine.peek("p", "broken").unwrap().is_none());
    assert!(cache.last_error().is_some());

    // The slot is immediately reusable.
    cache.add_timed("p", "broken", &"fresh", far_future()).unwrap();
    assert_eq!(cache.get::<String>("p", "broken").unwrap().as_deref(), Some("fresh"));
}

#[test]
fn lying_compressed_flag_reads_as_absent() {
    let (cache, engine) = cache_and_engine("pipeline_flag_flip");

    // Valid JSON bytes, but the row claims they are gzip.
    let bytes = serde_json::to_vec(&"honest value").unwrap();
    engine
        .add("p", "flipped", EncodedValue { bytes, compressed: true }, i64::MAX, 0, &[])
        .unwrap();

    assert_eq!(cache.get::<String>("p", "flipped").unwrap(), None);
    assert!(engine.peek("p", "flipped").unwrap().is_none());
}

#[test]
fn wrong_target_type_reads_as_absent_and_removes_the_row() {
    let (cache, _engine) = cache_and_engine("pipeline_wrong_type");

    cache.add_timed("p", "text", &"not a number", far_future()).unwrap();
    assert_eq!(cache.get::<u32>("p", "text").unwrap(), None);
    // The recovery removed the row, so even the right type misses now.
    assert_eq!(cache.get::<String>("p", "text").unwrap(), None);
}

#[test]
fn bulk_reads_drop_undecodable_rows_silently() {
    let (cache, engine) = cache_and_engine("pipeline_bulk_recovery");

    cache.add_timed("p", "good-1", &1u32, far_future()).unwrap();
    engine
        .add(
            "p",
            "bad",
            EncodedValue { bytes: vec![0xFF, 0x00], compressed: false },
            i64::MAX,
            0,
            &[],
        )
        .unwrap();
    cache.add_timed("p", "good-2", &2u32, far_future()).unwrap();

    let items = cache.get_items::<u32>(Some("p")).unwrap();
    let mut keys: Vec<_> = items.iter().map(|i| i.key.as_str()).collect();
    keys.sort_unstable();
    assert_eq!(keys, ["good-1", "good-2"]);

    // The bad row was removed along the way.
    assert_eq!(cache.count_including_expired(Some("p")).unwrap(), 2);
    let _ = cache.clear(None, ClearMode::IgnoreExpiry).unwrap();
}
