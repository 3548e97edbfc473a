//! Image cache integration tests.
//!
//! Tests verify:
//! - Stored images come back with identical pixels
//! - The memory tier never exceeds its budget
//! - Evicted images are served again from disk
//! - A new store over the same root sees earlier entries
//! - Concurrent use keeps size accounting exact
//! - Writes and clears are not undone by disk reads still in flight

use std::sync::Arc;
use std::time::Duration;

use tileview::{CacheKey, ImageCacheStore};

use super::test_utils::{
    key, open_store, rgba_size, solid_image, temp_store, DeriveCounter,
};

// =============================================================================
// Round Trips
// =============================================================================

#[tokio::test]
async fn test_set_then_get_returns_same_pixels() {
    let (_dir, store) = temp_store(1024 * 1024);
    let image = solid_image(20, 10, 42);

    store.set(key("photo-1"), image.clone()).await;

    let cached = store.get(&key("photo-1")).await.unwrap();
    assert_eq!(cached.to_rgba8(), image.to_rgba8());
    assert_eq!(store.stats().await.memory_hits, 1);
}

#[tokio::test]
async fn test_unknown_key_is_a_miss() {
    let (_dir, store) = temp_store(1024 * 1024);

    assert!(store.get(&key("never-stored")).await.is_none());

    let stats = store.stats().await;
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.memory_entries, 0);
}

#[tokio::test]
async fn test_empty_key_rejected() {
    assert!(CacheKey::new("").is_err());
}

// =============================================================================
// Memory Budget
// =============================================================================

#[tokio::test]
async fn test_memory_never_exceeds_budget() {
    let entry = rgba_size(16, 16);
    let (_dir, store) = temp_store(entry * 3);

    for i in 0..10u8 {
        store.set(key(&format!("img-{i}")), solid_image(16, 16, i)).await;

        let stats = store.stats().await;
        assert!(stats.memory_bytes <= stats.memory_budget);
        assert_eq!(stats.memory_bytes, store.recount_memory().await);
    }

    let stats = store.stats().await;
    assert_eq!(stats.memory_entries, 3);
    assert_eq!(stats.disk_writes, 10);
}

#[tokio::test]
async fn test_least_recently_used_is_evicted_first() {
    let entry = rgba_size(8, 8);
    let (_dir, store) = temp_store(entry * 2);

    store.set(key("a"), solid_image(8, 8, 1)).await;
    store.set(key("b"), solid_image(8, 8, 2)).await;

    // Touch "a" so "b" becomes the eviction candidate
    store.get(&key("a")).await.unwrap();
    store.set(key("c"), solid_image(8, 8, 3)).await;

    assert!(store.contains_in_memory(&key("a")).await);
    assert!(!store.contains_in_memory(&key("b")).await);
    assert!(store.contains_in_memory(&key("c")).await);
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_evicted_entry_comes_back_from_disk() {
    let entry = rgba_size(12, 12);
    let (_dir, store) = temp_store(entry);

    let first = solid_image(12, 12, 7);
    store.set(key("first"), first.clone()).await;
    store.set(key("second"), solid_image(12, 12, 8)).await;
    assert!(!store.contains_in_memory(&key("first")).await);

    let restored = store.get(&key("first")).await.unwrap();
    assert_eq!(restored.to_rgba8(), first.to_rgba8());
    assert!(store.contains_in_memory(&key("first")).await);

    let stats = store.stats().await;
    assert_eq!(stats.disk_hits, 1);
    assert_eq!(stats.misses, 0);
}

#[tokio::test]
async fn test_entries_survive_store_restart() {
    let dir = tempfile::tempdir().unwrap();
    let image = solid_image(30, 20, 99);

    {
        let store = open_store(dir.path(), 1024 * 1024);
        store.set(key("persisted"), image.clone()).await;
    }

    let reopened = open_store(dir.path(), 1024 * 1024);
    assert_eq!(reopened.stats().await.memory_entries, 0);

    let restored = reopened.get(&key("persisted")).await.unwrap();
    assert_eq!(restored.to_rgba8(), image.to_rgba8());
    assert_eq!(reopened.stats().await.disk_hits, 1);
}

#[tokio::test]
async fn test_derivation_skipped_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let counter = DeriveCounter::new();

    {
        let store = open_store(dir.path(), 1024 * 1024);
        store
            .get_or_insert_with(key("derived"), counter.derive(solid_image(4, 4, 1)))
            .await
            .unwrap();
    }

    let reopened = open_store(dir.path(), 1024 * 1024);
    reopened
        .get_or_insert_with(key("derived"), counter.derive(solid_image(4, 4, 1)))
        .await
        .unwrap();

    assert_eq!(counter.calls(), 1);
}

#[tokio::test]
async fn test_clear_empties_both_tiers() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), 1024 * 1024);

    for i in 0..4u8 {
        store.set(key(&format!("k{i}")), solid_image(4, 4, i)).await;
    }
    store.clear().await;

    assert_eq!(store.stats().await.memory_entries, 0);
    assert!(store.disk().is_empty().unwrap());

    let reopened = open_store(dir.path(), 1024 * 1024);
    assert!(reopened.get(&key("k0")).await.is_none());
}

#[tokio::test]
async fn test_unwritable_disk_degrades_to_memory() {
    let (_dir, store) = temp_store(1024 * 1024);

    // Occupy the entry's path with a directory so the rename fails
    let blocked = key("blocked");
    std::fs::create_dir(store.disk().path_for(&blocked)).unwrap();

    store.set(blocked.clone(), solid_image(5, 5, 3)).await;

    assert!(store.get(&blocked).await.is_some());
    assert_eq!(store.stats().await.disk_write_failures, 1);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_access_keeps_accounting_exact() {
    let entry = rgba_size(10, 10);
    let (_dir, store) = temp_store(entry * 5);

    let mut handles = Vec::new();
    for task in 0..8u8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            for i in 0..20u8 {
                let name = format!("k{}", (task as usize * 7 + i as usize) % 12);
                if i % 3 == 0 {
                    store.set(key(&name), solid_image(10, 10, i)).await;
                } else {
                    let _ = store.get(&key(&name)).await;
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = store.stats().await;
    assert!(stats.memory_bytes <= stats.memory_budget);
    assert_eq!(stats.memory_bytes, store.recount_memory().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fills_derive_once() {
    let (_dir, store) = temp_store(1024 * 1024);
    let counter = DeriveCounter::new();

    let mut handles = Vec::new();
    for _ in 0..12 {
        let store = Arc::clone(&store);
        let counter = counter.clone();
        handles.push(tokio::spawn(async move {
            let slow = counter.derive(solid_image(6, 6, 5));
            store
                .get_or_insert_with(key("shared"), move || {
                    std::thread::sleep(Duration::from_millis(50));
                    slow()
                })
                .await
                .unwrap()
        }));
    }

    let mut images = Vec::new();
    for handle in handles {
        images.push(handle.await.unwrap());
    }

    assert_eq!(counter.calls(), 1);
    assert!(images.iter().all(|image| Arc::ptr_eq(image, &images[0])));
}

// =============================================================================
// Ordering With In-flight Disk Reads
// =============================================================================

/// Large enough that decoding it from disk takes a noticeable while.
const LARGE_EDGE: u32 = 2000;

/// Store a large image under `name` in `dir`, then reopen the store cold so
/// the next `get` has to hydrate it from disk.
async fn cold_store_with_large_entry(dir: &std::path::Path, name: &str) -> Arc<ImageCacheStore> {
    let budget = 4 * rgba_size(LARGE_EDGE, LARGE_EDGE);
    {
        let warm = open_store(dir, budget);
        warm.set(key(name), solid_image(LARGE_EDGE, LARGE_EDGE, 1)).await;
    }
    Arc::new(open_store(dir, budget))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_set_during_disk_read_wins() {
    for delay_ms in [1, 5, 20] {
        let dir = tempfile::tempdir().unwrap();
        let store = cold_store_with_large_entry(dir.path(), "photo").await;

        let reader = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.get(&key("photo")).await })
        };
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;

        let small = solid_image(4, 4, 200);
        store.set(key("photo"), small.clone()).await;
        reader.await.unwrap();

        let current = store.get(&key("photo")).await.unwrap();
        assert_eq!(current.to_rgba8(), small.to_rgba8(), "delay {delay_ms}ms");

        let on_disk = store.disk().read(&key("photo")).unwrap().unwrap();
        assert_eq!(on_disk.to_rgba8(), small.to_rgba8(), "delay {delay_ms}ms");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_clear_during_disk_read_leaves_nothing() {
    for delay_ms in [1, 5, 20] {
        let dir = tempfile::tempdir().unwrap();
        let store = cold_store_with_large_entry(dir.path(), "photo").await;

        let reader = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.get(&key("photo")).await })
        };
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;

        store.clear().await;
        reader.await.unwrap();

        let stats = store.stats().await;
        assert_eq!(stats.memory_entries, 0, "delay {delay_ms}ms");
        assert_eq!(stats.memory_bytes, 0, "delay {delay_ms}ms");
        assert!(store.disk().is_empty().unwrap());
        assert!(store.get(&key("photo")).await.is_none(), "delay {delay_ms}ms");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remove_during_disk_read_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = cold_store_with_large_entry(dir.path(), "photo").await;

    let reader = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.get(&key("photo")).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;

    store.remove(&key("photo")).await;
    reader.await.unwrap();

    assert!(!store.contains_in_memory(&key("photo")).await);
    assert!(store.get(&key("photo")).await.is_none());
}
