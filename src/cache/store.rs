//! Two-tier image cache store.
//!
//! The store ties the [`MemoryTier`] and [`DiskTier`] together:
//!
//! - `get` checks memory, then hydrates from disk into memory
//! - `set` writes memory and then writes through to disk
//! - `get_or_insert_with` additionally derives the image on a total miss
//!
//! # Concurrency
//!
//! Disk I/O, PNG coding and image derivation run on tokio's blocking thread
//! pool, so callers on the interactive path are never blocked by the
//! filesystem. Memory hits complete without touching the pool.
//!
//! Concurrent fills of the same key are coalesced (singleflight): the first
//! caller becomes the leader and does the disk read or derivation, later
//! callers wait for its result instead of repeating the work. `set` and
//! `remove` take the same per-key slot, so a slow disk read can never land in
//! memory after a newer write. A `clear` advances the memory tier's epoch;
//! fills that started before it are served to their callers but not kept.
//!
//! # Failure Semantics
//!
//! Steady-state failures never reach the caller. A corrupt disk entry is
//! logged, deleted and treated as a miss; a failed disk write is logged and
//! the image is still served from memory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use image::DynamicImage;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::disk::DiskTier;
use super::memory::MemoryTier;
use super::{CacheConfig, CacheKey, CachedImage};
use crate::error::{CacheError, ConfigError, TileError};

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of cache activity and memory tier occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from memory
    pub memory_hits: u64,

    /// Lookups answered by hydrating from disk
    pub disk_hits: u64,

    /// Lookups that found nothing in either tier
    pub misses: u64,

    /// Callers that waited on another caller's in-flight fill
    pub coalesced: u64,

    /// Successful disk writes
    pub disk_writes: u64,

    /// Disk writes that failed and were skipped
    pub disk_write_failures: u64,

    /// Entries currently in memory
    pub memory_entries: usize,

    /// Estimated bytes currently in memory
    pub memory_bytes: usize,

    /// Memory budget in bytes
    pub memory_budget: usize,
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    disk_writes: AtomicU64,
    disk_write_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// =============================================================================
// In-flight Fills
// =============================================================================

/// State for an in-flight fill of one key.
struct InFlight {
    /// Notification for waiters
    notify: Notify,

    /// Outcome of the fill (set when complete). `Some(None)` means the leader
    /// finished without producing an image.
    result: Mutex<Option<Option<CachedImage>>>,

    /// Set once the leader is gone, whether or not it finished
    closed: AtomicBool,
}

impl InFlight {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            result: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn outcome(&self) -> Option<Option<CachedImage>> {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn finish(&self, outcome: Option<CachedImage>) {
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
    }

    /// Wait for the leader to go away and return its outcome, or `None` if it
    /// was dropped before finishing.
    async fn wait(&self) -> Option<Option<CachedImage>> {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if !self.is_closed() {
            notified.await;
        }
        self.outcome()
    }
}

/// Result of trying to register an operation on a key.
enum Claim<'a> {
    Leader(LeaderGuard<'a>),
    Follower(Arc<InFlight>),
}

/// Deregisters the leader's in-flight entry and wakes waiters, including when
/// the leader's future is dropped before completing.
struct LeaderGuard<'a> {
    in_flight: &'a Mutex<HashMap<CacheKey, Arc<InFlight>>>,
    key: &'a CacheKey,
    state: Arc<InFlight>,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        {
            let mut in_flight = self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if in_flight
                .get(self.key)
                .is_some_and(|state| Arc::ptr_eq(state, &self.state))
            {
                in_flight.remove(self.key);
            }
        }
        self.state.closed.store(true, Ordering::Release);
        self.state.notify.notify_waiters();
    }
}

// =============================================================================
// Image Cache Store
// =============================================================================

/// Concurrency-safe, two-tier image cache.
///
/// Configuration is fixed at construction. Share one instance across threads
/// and tasks with `Arc`.
///
/// # Example
///
/// ```no_run
/// use image::DynamicImage;
/// use tileview::cache::{CacheConfig, CacheKey, ImageCacheStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = ImageCacheStore::open(
///     CacheConfig::new("/var/cache/viewer").with_memory_budget(32 * 1024 * 1024),
/// )?;
///
/// let key = CacheKey::new("tile:0:3:4:4f2c")?;
/// let tile = store
///     .get_or_insert_with(key, || {
///         Ok::<_, tileview::TileError>(DynamicImage::new_rgba8(256, 256))
///     })
///     .await?;
/// assert_eq!(tile.width(), 256);
/// # Ok(())
/// # }
/// ```
pub struct ImageCacheStore {
    memory: MemoryTier,

    disk: Arc<DiskTier>,

    /// In-flight fills for singleflight pattern
    in_flight: Mutex<HashMap<CacheKey, Arc<InFlight>>>,

    counters: Counters,
}

impl ImageCacheStore {
    /// Open a store, creating the disk tier's root directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroMemoryBudget`] for a zero budget and
    /// [`ConfigError::CacheRoot`] if the root is missing and cannot be
    /// created, or is not writable.
    pub fn open(config: CacheConfig) -> Result<Self, ConfigError> {
        if config.memory_budget == 0 {
            return Err(ConfigError::ZeroMemoryBudget);
        }

        let disk = DiskTier::open(config.cache_root)?;
        debug!(
            root = %disk.root().display(),
            memory_budget = config.memory_budget,
            "Opened image cache"
        );

        Ok(Self {
            memory: MemoryTier::with_capacity(config.memory_budget),
            disk: Arc::new(disk),
            in_flight: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        })
    }

    /// Get an image, from memory or else from disk.
    ///
    /// A memory hit marks the entry as recently used. A disk hit is decoded
    /// and inserted into memory. Returns `None` when neither tier holds the
    /// key, including when the disk entry turns out to be corrupt.
    pub async fn get(&self, key: &CacheKey) -> Option<CachedImage> {
        let mut no_derive: Option<fn() -> Result<DynamicImage, TileError>> = None;
        // Without a derivation the fill cannot fail
        self.fill(key, &mut no_derive).await.ok().flatten()
    }

    /// Get an image, deriving and storing it on a total miss.
    ///
    /// `derive` runs on the blocking thread pool and only when neither tier
    /// holds the key. Concurrent callers for the same key share one
    /// derivation.
    ///
    /// # Errors
    ///
    /// Returns the error of `derive`, or a task error if it panicked.
    pub async fn get_or_insert_with<F, E>(&self, key: CacheKey, derive: F) -> Result<CachedImage, E>
    where
        F: FnOnce() -> Result<DynamicImage, E> + Send + 'static,
        E: From<tokio::task::JoinError> + Send + 'static,
    {
        let mut derive = Some(derive);
        loop {
            // `None` means a leader we waited on produced nothing; our own
            // derivation is still unused, so go again
            if let Some(image) = self.fill(&key, &mut derive).await? {
                return Ok(image);
            }
        }
    }

    /// Store an image, replacing any previous entry for `key`.
    ///
    /// The image goes into memory (evicting least-recently-used entries as
    /// needed) and is then written through to disk before this returns. A
    /// failed disk write is logged and otherwise ignored.
    ///
    /// Writes are ordered with fills of the same key: a `set` waits for an
    /// in-flight disk read or derivation of `key` to finish, and callers that
    /// arrive while it runs receive the new image.
    pub async fn set(&self, key: CacheKey, image: impl Into<CachedImage>) -> CachedImage {
        let image = image.into();
        let guard = self.claim_exclusive(&key).await;
        let epoch = self.memory.epoch().await;

        self.store(&key, image.clone(), epoch).await;
        guard.state.finish(Some(image.clone()));
        image
    }

    /// Remove `key` from both tiers. Returns `true` if either tier held it.
    pub async fn remove(&self, key: &CacheKey) -> bool {
        let guard = self.claim_exclusive(key).await;
        let in_memory = self.memory.remove(key).await.is_some();

        let disk = Arc::clone(&self.disk);
        let remove_key = key.clone();
        let on_disk = match tokio::task::spawn_blocking(move || disk.remove(&remove_key)).await {
            Ok(Ok(removed)) => removed,
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Failed to remove disk cache entry");
                false
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Disk cache remove task failed");
                false
            }
        };

        guard.state.finish(None);
        in_memory || on_disk
    }

    /// Empty both tiers.
    ///
    /// Never called implicitly. Disk failures are logged; whatever could be
    /// removed is removed. Fills still running when this returns finish for
    /// their own callers but leave nothing behind in memory.
    pub async fn clear(&self) {
        self.memory.clear().await;

        let disk = Arc::clone(&self.disk);
        match tokio::task::spawn_blocking(move || disk.clear()).await {
            Ok(Ok(removed)) => debug!(removed, "Cleared image cache"),
            Ok(Err(e)) => warn!(error = %e, "Failed to clear disk cache"),
            Err(e) => warn!(error = %e, "Disk cache clear task failed"),
        }

        // Anything hydrated while the disk was being cleared is stale
        self.memory.clear().await;
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Check the memory tier without updating LRU order.
    pub async fn contains_in_memory(&self, key: &CacheKey) -> bool {
        self.memory.contains(key).await
    }

    /// Sum of the memory tier's entry sizes, recounted entry by entry.
    pub async fn recount_memory(&self) -> usize {
        self.memory.recount().await
    }

    pub async fn stats(&self) -> CacheStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CacheStats {
            memory_hits: load(&self.counters.memory_hits),
            disk_hits: load(&self.counters.disk_hits),
            misses: load(&self.counters.misses),
            coalesced: load(&self.counters.coalesced),
            disk_writes: load(&self.counters.disk_writes),
            disk_write_failures: load(&self.counters.disk_write_failures),
            memory_entries: self.memory.len().await,
            memory_bytes: self.memory.size().await,
            memory_budget: self.memory.capacity(),
        }
    }

    pub fn memory_budget(&self) -> usize {
        self.memory.capacity()
    }

    pub fn disk(&self) -> &DiskTier {
        &self.disk
    }

    // =========================================================================
    // Fill path
    // =========================================================================

    /// Memory lookup, then a coalesced disk hydration and optional derivation.
    ///
    /// The derivation is taken only if this caller becomes leader, in which
    /// case the result is an image or the derivation's error. `Ok(None)` is a
    /// total miss led by a caller without a derivation.
    async fn fill<F, E>(
        &self,
        key: &CacheKey,
        derive: &mut Option<F>,
    ) -> Result<Option<CachedImage>, E>
    where
        F: FnOnce() -> Result<DynamicImage, E> + Send + 'static,
        E: From<tokio::task::JoinError> + Send + 'static,
    {
        loop {
            // Fast path: memory
            if let Some(image) = self.memory.get(key).await {
                bump(&self.counters.memory_hits);
                return Ok(Some(image));
            }

            // Slow path: wait for an in-flight operation or become leader
            match self.claim(key) {
                Claim::Leader(guard) => {
                    let outcome = self.lead(key, derive.take()).await;
                    guard
                        .state
                        .finish(outcome.as_ref().ok().and_then(Clone::clone));
                    return outcome;
                }
                Claim::Follower(state) => {
                    bump(&self.counters.coalesced);
                    match state.wait().await {
                        Some(outcome) => return Ok(outcome),
                        // Leader was dropped before finishing
                        None => continue,
                    }
                }
            }
        }
    }

    /// Join the in-flight operation on `key`, or register as its leader.
    fn claim<'a>(&'a self, key: &'a CacheKey) -> Claim<'a> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = in_flight.get(key) {
            return Claim::Follower(Arc::clone(state));
        }

        let state = Arc::new(InFlight::new());
        in_flight.insert(key.clone(), Arc::clone(&state));
        Claim::Leader(LeaderGuard {
            in_flight: &self.in_flight,
            key,
            state,
        })
    }

    /// Become leader for `key`, waiting out any operation already in flight.
    async fn claim_exclusive<'a>(&'a self, key: &'a CacheKey) -> LeaderGuard<'a> {
        loop {
            match self.claim(key) {
                Claim::Leader(guard) => return guard,
                Claim::Follower(state) => {
                    state.wait().await;
                }
            }
        }
    }

    async fn lead<F, E>(&self, key: &CacheKey, derive: Option<F>) -> Result<Option<CachedImage>, E>
    where
        F: FnOnce() -> Result<DynamicImage, E> + Send + 'static,
        E: From<tokio::task::JoinError> + Send + 'static,
    {
        // A previous leader may have filled memory since our lookup
        if let Some(image) = self.memory.peek(key).await {
            bump(&self.counters.memory_hits);
            return Ok(Some(image));
        }

        // Read before touching the disk, so a clear during the read is noticed
        let epoch = self.memory.epoch().await;
        if let Some(image) = self.hydrate(key, epoch).await {
            return Ok(Some(image));
        }

        bump(&self.counters.misses);
        let Some(derive) = derive else {
            debug!(key = %key, "Image cache miss");
            return Ok(None);
        };

        debug!(key = %key, "Image cache miss, deriving");
        let image = tokio::task::spawn_blocking(derive).await??;
        Ok(Some(self.store(key, Arc::new(image), epoch).await))
    }

    /// Load `key` from disk into memory. Every failure is a miss.
    async fn hydrate(&self, key: &CacheKey, epoch: u64) -> Option<CachedImage> {
        let disk = Arc::clone(&self.disk);
        let read_key = key.clone();
        let read = tokio::task::spawn_blocking(move || {
            let read = disk.read(&read_key);
            if let Err(CacheError::Decode(_)) = &read {
                // Unusable entry; drop it so the next set starts clean
                if let Err(e) = disk.remove(&read_key) {
                    warn!(key = %read_key, error = %e, "Failed to remove corrupt disk cache entry");
                }
            }
            read
        })
        .await;

        match read {
            Ok(Ok(Some(image))) => {
                bump(&self.counters.disk_hits);
                debug!(key = %key, "Hydrated image from disk cache");
                let image: CachedImage = Arc::new(image);
                self.insert_memory(key.clone(), image.clone(), epoch).await;
                Some(image)
            }
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Disk cache entry unreadable; treating as miss");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Disk cache read task failed; treating as miss");
                None
            }
        }
    }

    /// Insert into memory, then write through to disk.
    async fn store(&self, key: &CacheKey, image: CachedImage, epoch: u64) -> CachedImage {
        self.insert_memory(key.clone(), image.clone(), epoch).await;

        let disk = Arc::clone(&self.disk);
        let (write_key, write_image) = (key.clone(), image.clone());
        let written = tokio::task::spawn_blocking(move || disk.write(&write_key, &write_image)).await;

        match written {
            Ok(Ok(())) => bump(&self.counters.disk_writes),
            Ok(Err(e)) => {
                bump(&self.counters.disk_write_failures);
                warn!(key = %key, error = %e, "Disk cache write failed; entry kept in memory only");
            }
            Err(e) => {
                bump(&self.counters.disk_write_failures);
                warn!(key = %key, error = %e, "Disk cache write task failed");
            }
        }

        image
    }

    async fn insert_memory(&self, key: CacheKey, image: CachedImage, epoch: u64) {
        match self.memory.put_in_epoch(key.clone(), image, epoch).await {
            Some(evicted) if !evicted.is_empty() => {
                debug!(count = evicted.len(), "Evicted images from memory cache");
            }
            Some(_) => {}
            None => debug!(key = %key, "Cache cleared meanwhile; image not kept in memory"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
