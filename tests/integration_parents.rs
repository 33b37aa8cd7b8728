//! Parent-key dependency tests: cascade removal and slot limits

mod common;

use std::time::Duration;

use common::*;
use durable_cache::CacheError;

#[test]
fn removing_a_parent_removes_its_dependents() {
    let cache = build_cache("parents_cascade");

    cache.add_static("p", "root", &"R").unwrap();
    cache.add_static_with_parents("p", "leaf", &"L", &["root"]).unwrap();

    assert!(cache.remove("p", "root").unwrap());
    assert_eq!(cache.get::<String>("p", "leaf").unwrap(), None);
    assert_eq!(cache.count(Some("p")).unwrap(), 0);
}

#[test]
fn cascade_is_transitive() {
    let cache = build_cache("parents_transitive");

    cache.add_static("p", "a", &1u8).unwrap();
    cache.add_static_with_parents("p", "b", &2u8, &["a"]).unwrap();
    cache.add_static_with_parents("p", "c", &3u8, &["b"]).unwrap();
    cache.add_static_with_parents("p", "d", &4u8, &["c"]).unwrap();

    cache.remove("p", "a").unwrap();
    assert_eq!(cache.count_including_expired(None).unwrap(), 0);
}

#[test]
fn siblings_fall_together_but_cousins_survive() {
    let cache = build_cache("parents_siblings");

    cache.add_static("p", "root", &0u8).unwrap();
    cache.add_static("p", "other-root", &0u8).unwrap();
    cache.add_static_with_parents("p", "left", &1u8, &["root"]).unwrap();
    cache.add_static_with_parents("p", "right", &2u8, &["root"]).unwrap();
    cache.add_static_with_parents("p", "cousin", &3u8, &["other-root"]).unwrap();

    cache.remove("p", "root").unwrap();

    assert_eq!(cache.get::<u8>("p", "left").unwrap(), None);
    assert_eq!(cache.get::<u8>("p", "right").unwrap(), None);
    assert_eq!(cache.get::<u8>("p", "cousin").unwrap(), Some(3));
}

#[test]
fn an_entry_may_depend_on_several_parents() {
    let cache = build_cache("parents_multi");

    cache.add_static("p", "a", &1u8).unwrap();
    cache.add_static("p", "b", &2u8).unwrap();
    cache.add_static_with_parents("p", "child", &3u8, &["a", "b"]).unwrap();

    // Removing either parent takes the child down.
    cache.remove("p", "b").unwrap();
    assert_eq!(cache.get::<u8>("p", "child").unwrap(), None);
    assert_eq!(cache.get::<u8>("p", "a").unwrap(), Some(1));
}

#[test]
fn parent_metadata_is_visible_on_items() {
    let cache = build_cache("parents_metadata");

    cache.add_static("p", "root", &0u8).unwrap();
    cache.add_static_with_parents("p", "leaf", &1u8, &["root"]).unwrap();

    let item = cache.peek_item::<u8>("p", "leaf").unwrap().unwrap();
    assert_eq!(item.parent_keys, vec!["root".to_string()]);
}

#[test]
fn too_many_parents_is_rejected_up_front() {
    let cache = build_cache("parents_limit");
    let parents = ["a", "b", "c", "d", "e", "f"];

    let err = cache
        .add_static_with_parents("p", "child", &1u8, &parents)
        .unwrap_err();
    assert!(matches!(err, CacheError::InvalidArgument(_)));
    // Nothing was written.
    assert_eq!(cache.count_including_expired(None).unwrap(), 0);
}

#[test]
fn the_full_slot_count_is_usable() {
    let cache = build_cache("parents_full_slots");
    let parents = ["a", "b", "c", "d", "e"];

    for parent in parents {
        cache.add_static("p", parent, &0u8).unwrap();
    }
    cache.add_static_with_parents("p", "child", &1u8, &parents).unwrap();

    let item = cache.peek_item::<u8>("p", "child").unwrap().unwrap();
    assert_eq!(item.parent_keys.len(), 5);
}

#[test]
fn missing_parent_swallows_the_write() {
    let cache = build_cache("parents_missing");

    // The schema's foreign key rejects the row; the façade swallows the
    // failure and the write is a no-op.
    cache
        .add_static_with_parents("p", "orphan", &1u8, &["never-existed"])
        .unwrap();
    assert_eq!(cache.get::<u8>("p", "orphan").unwrap(), None);
    assert!(cache.last_error().is_some());
    assert!(cache.stats().swallowed_errors >= 1);
}

#[test]
fn expired_parents_still_anchor_their_children() {
    let (cache, clock) = build_cache_with_clock("parents_expired_parent");

    cache.add_sliding("p", "root", &0u8, Duration::from_secs(10)).unwrap();
    clock.advance_secs(60);

    // The parent row still exists (expired, not evicted), so the FK holds.
    cache.add_static_with_parents("p", "leaf", &1u8, &["root"]).unwrap();
    assert_eq!(cache.get::<u8>("p", "leaf").unwrap(), Some(1));
}
