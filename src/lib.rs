//! # tileview
//!
//! The core of a pinch-zoomable image viewer for very large images.
//!
//! Large images are drawn as square tiles at several resolution levels. This
//! library decides which tiles a viewport needs, and serves tile images from
//! a two-tier cache so that each tile is cut from the source image at most
//! once, even across process restarts.
//!
//! ## Features
//!
//! - **Tile mapping**: Viewport + zoom scale to the minimal covering tile set, and back
//! - **Two-tier cache**: Byte-budgeted LRU in memory, write-through PNG files on disk
//! - **Concurrency**: Safe to share across threads; concurrent fills of a key are coalesced
//! - **Degrades, never fails**: Disk problems become cache misses
//!
//! ## Architecture
//!
//! - [`tile`] - Tile grid geometry and the tile provider
//! - [`cache`] - Memory and disk tiers and the store combining them
//! - [`config`] - CLI and configuration types
//! - [`error`] - Error types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tileview::{CacheConfig, ImageCacheStore, TiledImage, VisibleRect};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tileview::TileError> {
//!     let cache = Arc::new(ImageCacheStore::open(CacheConfig::new("tile-cache"))?);
//!     let image = TiledImage::open("large.jpg", 256, cache).await?;
//!
//!     let visible = VisibleRect::new(0.0, 0.0, 1920.0, 1080.0);
//!     for (tile, pixels) in image.render_viewport(visible, 0.5).await? {
//!         println!("{:?}: {}x{}", tile, pixels.width(), pixels.height());
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod tile;

// Re-export commonly used types
pub use cache::{
    CacheConfig, CacheKey, CacheStats, CachedImage, DiskTier, ImageCacheStore, MemoryTier,
    DEFAULT_CACHE_ROOT, DEFAULT_MEMORY_BUDGET,
};
pub use config::{CacheArgs, Cli, Command, LevelsConfig, RenderConfig};
pub use error::{CacheError, ConfigError, TileError};
pub use tile::{
    number_of_zoom_levels, PixelRect, TileGrid, TileIdentity, TileProvider, TiledImage,
    VisibleRect, COARSEST_LEVEL_TILES,
};
