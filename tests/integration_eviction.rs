//! Eviction-driver tests: threshold-triggered sweeps and explicit clears

mod common;

use std::time::Duration;

use common::*;
use durable_cache::ClearMode;

#[test]
fn the_threshold_crossing_add_sweeps_expired_rows() {
    let (cache, _clock) = build_cache_with_settings("evict_threshold", |s| {
        s.insertion_count_before_auto_clean = 4;
    });
    let past = chrono::DateTime::from_timestamp(T0 - 10, 0).unwrap();

    // Four entries, all born expired; the fourth add crosses the threshold
    // and the sweep removes every one of them.
    for key in ["a", "b", "c", "d"] {
        cache.add_timed("p", key, &1u8, past).unwrap();
    }

    assert_eq!(cache.count_including_expired(None).unwrap(), 0);
    assert_eq!(cache.stats().evicted_rows, 4);
}

#[test]
fn sweeps_spare_live_entries() {
    let (cache, clock) = build_cache_with_settings("evict_spares_live", |s| {
        s.insertion_count_before_auto_clean = 3;
    });

    cache.add_sliding("p", "live", &1u8, Duration::from_secs(10_000)).unwrap();
    cache.add_sliding("p", "dying", &2u8, Duration::from_secs(5)).unwrap();
    clock.advance_secs(60);
    // Third insert crosses the threshold.
    cache.add_sliding("p", "fresh", &3u8, Duration::from_secs(10_000)).unwrap();

    assert_eq!(cache.count_including_expired(None).unwrap(), 2);
    assert!(cache.contains("p", "live").unwrap());
    assert!(cache.contains("p", "fresh").unwrap());
    assert!(!cache.contains("p", "dying").unwrap());
}

#[test]
fn the_counter_resets_after_a_sweep() {
    let (cache, clock) = build_cache_with_settings("evict_counter_reset", |s| {
        s.insertion_count_before_auto_clean = 2;
    });

    cache.add_sliding("p", "one", &1u8, Duration::from_secs(5)).unwrap();
    cache.add_sliding("p", "two", &2u8, Duration::from_secs(5)).unwrap();
    // Sweep ran at insert #2 but nothing was expired yet.
    assert_eq!(cache.count_including_expired(None).unwrap(), 2);

    clock.advance_secs(60);
    cache.add_sliding("p", "three", &3u8, Duration::from_secs(500)).unwrap();
    // Counter restarted at the sweep: one insert since, no sweep yet.
    assert_eq!(cache.count_including_expired(None).unwrap(), 3);

    cache.add_sliding("p", "four", &4u8, Duration::from_secs(500)).unwrap();
    // Insert #2 after the reset sweeps the two expired rows.
    assert_eq!(cache.count_including_expired(None).unwrap(), 2);
}

#[test]
fn explicit_clear_expired_is_the_same_sweep() {
    let (cache, clock) = build_cache_with_clock("evict_explicit");

    cache.add_sliding("p", "short", &1u8, Duration::from_secs(5)).unwrap();
    cache.add_sliding("p", "long", &2u8, Duration::from_secs(5_000)).unwrap();
    clock.advance_secs(60);

    let removed = cache.clear_expired(None).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(cache.stats().evicted_rows, 1);
    assert!(cache.contains("p", "long").unwrap());
}

#[test]
fn eviction_cascades_into_dependents() {
    let (cache, clock) = build_cache_with_clock("evict_cascade");

    cache.add_sliding("p", "root", &1u8, Duration::from_secs(5)).unwrap();
    // The child is long-lived but chained to a short-lived parent.
    cache
        .add_sliding_with_parents("p", "leaf", &2u8, Duration::from_secs(5_000), &["root"])
        .unwrap();
    clock.advance_secs(60);

    cache.clear_expired(None).unwrap();

    // The sweep deleted the root; the cascade took the leaf.
    assert_eq!(cache.count_including_expired(None).unwrap(), 0);
    assert_eq!(cache.get::<u8>("p", "leaf").unwrap(), None);
}

#[test]
fn ignore_expiry_clear_reports_everything_it_removed() {
    let (cache, clock) = build_cache_with_clock("evict_ignore_expiry");

    cache.add_sliding("p", "a", &1u8, Duration::from_secs(5)).unwrap();
    cache.add_sliding("p", "b", &2u8, Duration::from_secs(5_000)).unwrap();
    clock.advance_secs(60);

    let removed = cache.clear(None, ClearMode::IgnoreExpiry).unwrap();
    assert_eq!(removed, 2);
    assert_eq!(cache.count_including_expired(None).unwrap(), 0);
}
