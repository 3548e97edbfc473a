//! Memory tier: LRU over decoded images with a byte budget.
//!
//! Images vary widely in footprint (coarse tiles are tiny, native-resolution
//! tiles are large), so capacity is a byte budget rather than an entry count.
//! The tier tracks the estimated size of every entry and evicts
//! least-recently-used entries until the total fits the budget again.
//!
//! Every [`MemoryTier::clear`] starts a new epoch. Writers that prepared an
//! image before a clear use [`MemoryTier::put_in_epoch`] so the image is
//! dropped instead of resurrecting an entry the clear removed.

use lru::LruCache;
use tokio::sync::RwLock;

use super::{estimated_size, CacheKey, CachedImage};

struct Entry {
    image: CachedImage,
    size: usize,
}

/// Recency order and size accounting, always updated together.
struct Inner {
    entries: LruCache<CacheKey, Entry>,
    current_size: usize,
    epoch: u64,
}

/// LRU cache of decoded images with size-based capacity.
///
/// # Thread Safety
///
/// All bookkeeping sits behind a single lock, so concurrent inserts and
/// evictions cannot leave the size accounting out of step with the entries.
/// The lock is only ever held for O(1) map operations.
pub struct MemoryTier {
    inner: RwLock<Inner>,

    /// Maximum total size in bytes
    max_size: usize,
}

impl MemoryTier {
    /// Create a tier holding at most `max_size` bytes of images.
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: LruCache::unbounded(),
                current_size: 0,
                epoch: 0,
            }),
            max_size,
        }
    }

    /// Get an image, marking it as recently used.
    pub async fn get(&self, key: &CacheKey) -> Option<CachedImage> {
        let mut inner = self.inner.write().await;
        inner.entries.get(key).map(|entry| entry.image.clone())
    }

    /// Get an image without updating LRU order.
    pub async fn peek(&self, key: &CacheKey) -> Option<CachedImage> {
        let inner = self.inner.read().await;
        inner.entries.peek(key).map(|entry| entry.image.clone())
    }

    pub async fn contains(&self, key: &CacheKey) -> bool {
        let inner = self.inner.read().await;
        inner.entries.contains(key)
    }

    /// Insert or replace an image.
    ///
    /// Least-recently-used entries are evicted until the tier is within its
    /// budget. An image larger than the whole budget is evicted as well, so it
    /// is never retained. Returns the keys that were evicted.
    pub async fn put(&self, key: CacheKey, image: CachedImage) -> Vec<CacheKey> {
        let mut inner = self.inner.write().await;
        self.insert(&mut inner, key, image)
    }

    /// Like [`MemoryTier::put`], but only while the tier is still in `epoch`.
    ///
    /// Returns `None`, leaving the tier untouched, if a clear happened since
    /// `epoch` was read.
    pub async fn put_in_epoch(
        &self,
        key: CacheKey,
        image: CachedImage,
        epoch: u64,
    ) -> Option<Vec<CacheKey>> {
        let mut inner = self.inner.write().await;
        if inner.epoch != epoch {
            return None;
        }
        Some(self.insert(&mut inner, key, image))
    }

    /// Current epoch; advanced by every clear.
    pub async fn epoch(&self) -> u64 {
        self.inner.read().await.epoch
    }

    fn insert(&self, inner: &mut Inner, key: CacheKey, image: CachedImage) -> Vec<CacheKey> {
        let size = estimated_size(&image);
        if let Some(old) = inner.entries.put(key, Entry { image, size }) {
            inner.current_size = inner.current_size.saturating_sub(old.size);
        }
        inner.current_size += size;

        let mut evicted = Vec::new();
        while inner.current_size > self.max_size {
            match inner.entries.pop_lru() {
                Some((key, entry)) => {
                    inner.current_size = inner.current_size.saturating_sub(entry.size);
                    evicted.push(key);
                }
                None => break,
            }
        }
        evicted
    }

    /// Remove an image, returning it if it was present.
    pub async fn remove(&self, key: &CacheKey) -> Option<CachedImage> {
        let mut inner = self.inner.write().await;
        let entry = inner.entries.pop(key)?;
        inner.current_size = inner.current_size.saturating_sub(entry.size);
        Some(entry.image)
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.current_size = 0;
        inner.epoch += 1;
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    /// Current total estimated size of cached images in bytes.
    pub async fn size(&self) -> usize {
        self.inner.read().await.current_size
    }

    /// Sum of the sizes of the entries actually present.
    ///
    /// Walks every entry; meant for verifying the running total.
    pub async fn recount(&self) -> usize {
        let inner = self.inner.read().await;
        inner.entries.iter().map(|(_, entry)| entry.size).sum()
    }

    /// Maximum capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }
}
