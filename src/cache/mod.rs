//! Two-tier image cache.
//!
//! Decoded images are cached by an opaque [`CacheKey`] in two tiers:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             ImageCacheStore             │
//! │  get / set / get_or_insert_with / clear │
//! └──────────┬─────────────────┬────────────┘
//!            │                 │ write-through,
//!            ▼                 ▼ hydrate on miss
//! ┌────────────────────┐ ┌────────────────────┐
//! │     MemoryTier     │ │      DiskTier      │
//! │ LRU, byte budget   │ │ one PNG per key,   │
//! │ (evicts freely)    │ │ cleared explicitly │
//! └────────────────────┘ └────────────────────┘
//! ```
//!
//! The memory tier is a pure performance cache. Every entry it holds was
//! written through to disk (or can be re-derived from the source image), so
//! evicting from it never loses data.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use image::DynamicImage;
//! use tileview::cache::{CacheConfig, CacheKey, ImageCacheStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = ImageCacheStore::open(CacheConfig::new("/tmp/tile-cache")).unwrap();
//!
//!     let key = CacheKey::new("thumbnail:photo.jpg").unwrap();
//!     if store.get(&key).await.is_none() {
//!         store.set(key.clone(), DynamicImage::new_rgba8(64, 64)).await;
//!     }
//!     assert!(store.get(&key).await.is_some());
//! }
//! ```

mod codec;
mod disk;
mod memory;
mod store;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use image::DynamicImage;

use crate::error::CacheError;

pub use codec::{decode_png, encode_png};
pub use disk::DiskTier;
pub use memory::MemoryTier;
pub use store::{CacheStats, ImageCacheStore};

/// Default memory tier budget: 64MB
pub const DEFAULT_MEMORY_BUDGET: usize = 64 * 1024 * 1024;

/// Default directory for the disk tier.
pub const DEFAULT_CACHE_ROOT: &str = "tile-cache";

/// Read-only handle to a cached image.
///
/// Handles stay valid after the store evicts or replaces the entry.
pub type CachedImage = Arc<DynamicImage>;

/// Estimated memory footprint of a decoded image in bytes.
pub fn estimated_size(image: &DynamicImage) -> usize {
    image.as_bytes().len()
}

// =============================================================================
// Cache Key
// =============================================================================

/// Opaque, non-empty key identifying one cached image.
///
/// Identical content must always map to the same key and distinct content to
/// distinct keys. The key string is never interpreted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Create a key from a string.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::EmptyKey`] for an empty string.
    pub fn new(key: impl Into<Arc<str>>) -> Result<Self, CacheError> {
        let key = key.into();
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }
        Ok(Self(key))
    }

    /// Wrap a string the caller has already built to be non-empty.
    pub(crate) fn from_nonempty(key: String) -> Self {
        debug_assert!(!key.is_empty());
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Construction-time settings of an [`ImageCacheStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Directory holding the disk tier
    pub cache_root: PathBuf,

    /// Maximum estimated size of the memory tier in bytes
    pub memory_budget: usize,
}

impl CacheConfig {
    /// Settings with the default memory budget.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            memory_budget: DEFAULT_MEMORY_BUDGET,
        }
    }

    pub fn with_memory_budget(mut self, memory_budget: usize) -> Self {
        self.memory_budget = memory_budget;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_ROOT)
    }
}
