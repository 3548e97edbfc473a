//! Tile provider: the rendering callback contract.
//!
//! A drawing layer asks for tiles by `(row, column, scale)`. [`TiledImage`]
//! answers by mapping the scale to a zoom level, looking the tile up in the
//! [`ImageCacheStore`], and on a miss cutting it out of the source image:
//!
//! ```text
//! tile_image(row, column, scale)
//!     │
//!     ├─ level = round(-log2(scale))
//!     ├─ key   = tile:{level}:{row}:{column}:{image id}
//!     │
//!     ▼
//! ImageCacheStore::get_or_insert_with(key)
//!     │  memory hit ─────────────────────────────▶ tile
//!     │  disk hit ───────────────────────────────▶ tile
//!     │  miss: crop pixel_rect, downsample 2^level ▶ set ▶ tile
//! ```

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use image::imageops::FilterType;
use image::DynamicImage;
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;
use tracing::debug;

use crate::cache::{CachedImage, ImageCacheStore};
use crate::error::{ConfigError, TileError};

use super::grid::{TileGrid, TileIdentity, VisibleRect};

// =============================================================================
// TileProvider Trait
// =============================================================================

/// Source of tile images for a tiled drawing layer.
///
/// Implementations may be called concurrently from several threads.
#[async_trait]
pub trait TileProvider: Send + Sync {
    /// Image for the tile at `row`, `column` when drawn at `scale`.
    ///
    /// `scale` is the drawing scale relative to native resolution (1.0 draws
    /// the image at full size, 0.5 at half size).
    async fn tile_image(&self, row: u32, column: u32, scale: f64) -> Result<CachedImage, TileError>;
}

// =============================================================================
// TiledImage
// =============================================================================

/// A source image served as multi-resolution tiles through an image cache.
///
/// Cloning is cheap; clones share the source image and the cache.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tileview::cache::{CacheConfig, ImageCacheStore};
/// use tileview::tile::{TileProvider, TiledImage, VisibleRect};
///
/// # async fn example() -> Result<(), tileview::TileError> {
/// let cache = Arc::new(ImageCacheStore::open(CacheConfig::new("/tmp/tiles"))?);
/// let image = TiledImage::open("map.png", 256, cache).await?;
///
/// // Callback style
/// let tile = image.tile_image(0, 1, 0.5).await?;
///
/// // Whole viewport
/// let tiles = image
///     .render_viewport(VisibleRect::new(0.0, 0.0, 1024.0, 768.0), 0.5)
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TiledImage {
    id: Arc<str>,
    source: Arc<DynamicImage>,
    grid: TileGrid,
    cache: Arc<ImageCacheStore>,
}

impl TiledImage {
    /// Wrap a decoded image.
    ///
    /// `id` must identify the image content: two different images must never
    /// share an id, or they would share cached tiles.
    ///
    /// # Errors
    ///
    /// Fails if `tile_edge` is zero or the image is empty.
    pub fn new(
        id: impl Into<Arc<str>>,
        image: impl Into<Arc<DynamicImage>>,
        tile_edge: u32,
        cache: Arc<ImageCacheStore>,
    ) -> Result<Self, ConfigError> {
        let source = image.into();
        let grid = TileGrid::new(source.width(), source.height(), tile_edge)?;

        Ok(Self {
            id: id.into(),
            source,
            grid,
            cache,
        })
    }

    /// Read and decode an image file.
    ///
    /// The image id is the SHA-256 of the file contents, so tiles cached for
    /// a file are reused across runs for as long as the file is unchanged.
    pub async fn open(
        path: impl AsRef<Path>,
        tile_edge: u32,
        cache: Arc<ImageCacheStore>,
    ) -> Result<Self, TileError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| TileError::SourceImage {
                message: format!("{}: {}", path.display(), e),
            })?;

        let (id, image) = tokio::task::spawn_blocking(move || {
            let id = hex::encode(Sha256::digest(&data));
            let image = image::load_from_memory(&data).map_err(|e| TileError::SourceImage {
                message: e.to_string(),
            })?;
            Ok::<_, TileError>((id, image))
        })
        .await??;

        debug!(
            path = %path.display(),
            id = %id,
            width = image.width(),
            height = image.height(),
            "Opened source image"
        );

        Ok(Self::new(id, image, tile_edge, cache)?)
    }

    /// Content identity used in tile cache keys.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    /// Native image size as `(width, height)`.
    pub fn raw_size(&self) -> (u32, u32) {
        self.grid.image_size()
    }

    pub fn cache(&self) -> &Arc<ImageCacheStore> {
        &self.cache
    }

    /// Image for one tile, from the cache or freshly cut from the source.
    ///
    /// # Errors
    ///
    /// Returns [`TileError::TileOutOfBounds`] if the tile is not on the grid.
    pub async fn tile(&self, tile: TileIdentity) -> Result<CachedImage, TileError> {
        if !self.grid.contains(tile) {
            let (columns, rows) = self.grid.tile_count(tile.level);
            return Err(TileError::TileOutOfBounds {
                level: tile.level,
                row: tile.row,
                column: tile.column,
                rows,
                columns,
            });
        }

        let source = Arc::clone(&self.source);
        let grid = self.grid;
        self.cache
            .get_or_insert_with(tile.cache_key(&self.id), move || {
                Ok::<_, TileError>(render_tile(&source, &grid, tile))
            })
            .await
    }

    /// All tiles needed to draw `rect` at `scale`, in row-major order.
    ///
    /// Tiles are fetched concurrently. A rectangle outside the image yields
    /// no tiles.
    pub async fn render_viewport(
        &self,
        rect: VisibleRect,
        scale: f64,
    ) -> Result<Vec<(TileIdentity, CachedImage)>, TileError> {
        let tiles = self.grid.tiles_covering(rect, scale);

        let mut tasks = JoinSet::new();
        for (index, tile) in tiles.iter().copied().enumerate() {
            let this = self.clone();
            tasks.spawn(async move { (index, this.tile(tile).await) });
        }

        let mut slots: Vec<Option<CachedImage>> = vec![None; tiles.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, image) = joined?;
            slots[index] = Some(image?);
        }

        Ok(tiles
            .into_iter()
            .zip(slots)
            .filter_map(|(tile, image)| image.map(|image| (tile, image)))
            .collect())
    }
}

#[async_trait]
impl TileProvider for TiledImage {
    async fn tile_image(&self, row: u32, column: u32, scale: f64) -> Result<CachedImage, TileError> {
        let level = self.grid.level_for_scale(scale);
        self.tile(TileIdentity::new(level, row, column)).await
    }
}

/// Cut `tile` out of `source` and downsample it to its level's resolution.
fn render_tile(source: &DynamicImage, grid: &TileGrid, tile: TileIdentity) -> DynamicImage {
    let rect = grid.pixel_rect(tile);
    let cropped = source.crop_imm(rect.x, rect.y, rect.width, rect.height);

    let factor = 1u64 << tile.level;
    if factor == 1 {
        return cropped;
    }

    let width = u64::from(rect.width).div_ceil(factor).max(1) as u32;
    let height = u64::from(rect.height).div_ceil(factor).max(1) as u32;
    cropped.resize_exact(width, height, FilterType::Triangle)
}
