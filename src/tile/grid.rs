//! Tile grid geometry across zoom levels.
//!
//! A [`TileGrid`] maps between the native-resolution pixel space of an image
//! and the `(level, row, column)` tiles that a zoomable view draws.
//!
//! # Levels
//!
//! Level 0 is full native resolution. Each further level halves the linear
//! resolution, so a tile at level `L` covers `tile_edge * 2^L` native pixels
//! along each axis while still being drawn at (at most) `tile_edge` pixels.
//!
//! ```text
//!  level 0            level 1          level 2
//! ┌──┬──┬──┬──┐     ┌─────┬─────┐    ┌───────────┐
//! ├──┼──┼──┼──┤     │     │     │    │           │
//! ├──┼──┼──┼──┤     ├─────┼─────┤    │           │
//! ├──┼──┼──┼──┤     │     │     │    │           │
//! └──┴──┴──┴──┘     └─────┴─────┘    └───────────┘
//! ```
//!
//! The grid is immutable and holds no shared state, so it is safe to query
//! from any number of threads.

use serde::Serialize;

use crate::error::ConfigError;

/// Maximum number of tiles per axis at the coarsest zoom level.
pub const COARSEST_LEVEL_TILES: u32 = 1;

// =============================================================================
// Geometry Types
// =============================================================================

/// Identifies one tile of the pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TileIdentity {
    /// Zoom level (0 = native resolution)
    pub level: u32,

    /// Tile row (0-indexed from top)
    pub row: u32,

    /// Tile column (0-indexed from left)
    pub column: u32,
}

impl TileIdentity {
    /// Create a new tile identity.
    pub fn new(level: u32, row: u32, column: u32) -> Self {
        Self { level, row, column }
    }
}

/// A rectangle in native-resolution image coordinates, as handed over by a
/// drawing callback. Coordinates may be fractional and may extend past the
/// image; they are clamped before use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl VisibleRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// An integer pixel rectangle at native resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// Returns `true` if the rectangle covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Returns `true` if the native pixel `(x, y)` lies inside this rectangle.
    pub fn contains_point(&self, x: u32, y: u32) -> bool {
        x >= self.x
            && y >= self.y
            && u64::from(x) < u64::from(self.x) + u64::from(self.width)
            && u64::from(y) < u64::from(self.y) + u64::from(self.height)
    }
}

// =============================================================================
// Zoom Level Count
// =============================================================================

/// Number of zoom levels needed for an image.
///
/// This is the smallest `n` such that at level `n - 1` the whole image fits
/// within [`COARSEST_LEVEL_TILES`] tiles along each axis. A tile edge of zero
/// is treated as one pixel; [`TileGrid::new`] rejects it before it gets here.
///
/// # Example
///
/// ```
/// use tileview::tile::number_of_zoom_levels;
///
/// // 4x4 tiles at level 0, 2x2 at level 1, 1x1 at level 2
/// assert_eq!(number_of_zoom_levels(2000, 2000, 512), 3);
/// ```
pub fn number_of_zoom_levels(width: u32, height: u32, tile_edge: u32) -> u32 {
    let longest = u64::from(width.max(height));
    let mut span = u64::from(tile_edge.max(1)) * u64::from(COARSEST_LEVEL_TILES);
    let mut levels = 1;

    while span < longest {
        span *= 2;
        levels += 1;
    }

    levels
}

// =============================================================================
// Tile Grid
// =============================================================================

/// Tile layout of one image across all of its zoom levels.
///
/// # Example
///
/// ```
/// use tileview::tile::{TileGrid, TileIdentity, VisibleRect};
///
/// let grid = TileGrid::new(2000, 2000, 512).unwrap();
/// assert_eq!(grid.levels(), 3);
///
/// let tiles = grid.tiles_covering(VisibleRect::new(0.0, 0.0, 512.0, 512.0), 1.0);
/// assert_eq!(tiles, vec![TileIdentity::new(0, 0, 0)]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    image_width: u32,
    image_height: u32,
    tile_edge: u32,
    levels: u32,
}

impl TileGrid {
    /// Create a grid for an image of `image_width` x `image_height` pixels.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigError::InvalidTileEdge`] when `tile_edge` is zero and
    /// with [`ConfigError::EmptyImage`] when either image dimension is zero.
    pub fn new(image_width: u32, image_height: u32, tile_edge: u32) -> Result<Self, ConfigError> {
        if tile_edge == 0 {
            return Err(ConfigError::InvalidTileEdge(tile_edge));
        }
        if image_width == 0 || image_height == 0 {
            return Err(ConfigError::EmptyImage {
                width: image_width,
                height: image_height,
            });
        }

        Ok(Self {
            image_width,
            image_height,
            tile_edge,
            levels: number_of_zoom_levels(image_width, image_height, tile_edge),
        })
    }

    /// Native image size as `(width, height)`.
    pub fn image_size(&self) -> (u32, u32) {
        (self.image_width, self.image_height)
    }

    pub fn tile_edge(&self) -> u32 {
        self.tile_edge
    }

    /// Number of zoom levels; valid levels are `0..levels()`.
    pub fn levels(&self) -> u32 {
        self.levels
    }

    /// Native pixels covered by one tile edge at `level`.
    fn span(&self, level: u32) -> u64 {
        u64::from(self.tile_edge) << level.min(self.levels - 1)
    }

    /// Map a zoom scale to a level: `round(-log2(scale))`, clamped to the
    /// valid level range.
    ///
    /// Scales at or above 1 select level 0. Non-positive and NaN scales select
    /// the coarsest level.
    pub fn level_for_scale(&self, zoom_scale: f64) -> u32 {
        let coarsest = self.levels - 1;

        if zoom_scale.is_nan() || zoom_scale <= 0.0 {
            return coarsest;
        }
        if zoom_scale >= 1.0 {
            return 0;
        }

        // -log2 is positive here; the float to int cast saturates
        let level = (-zoom_scale.log2()).round() as u32;
        level.min(coarsest)
    }

    /// Zoom scale that maps exactly onto `level`.
    pub fn scale_for_level(&self, level: u32) -> f64 {
        1.0 / (self.span(level) / u64::from(self.tile_edge)) as f64
    }

    /// Number of tiles at `level` as `(columns, rows)`.
    pub fn tile_count(&self, level: u32) -> (u32, u32) {
        let span = self.span(level);
        let columns = u64::from(self.image_width).div_ceil(span);
        let rows = u64::from(self.image_height).div_ceil(span);
        (columns as u32, rows as u32)
    }

    /// Dimensions of the whole image when drawn at `level`, rounded up.
    pub fn level_dimensions(&self, level: u32) -> (u32, u32) {
        let factor = self.span(level) / u64::from(self.tile_edge);
        let width = u64::from(self.image_width).div_ceil(factor);
        let height = u64::from(self.image_height).div_ceil(factor);
        (width as u32, height as u32)
    }

    /// Returns `true` if the tile lies on the grid.
    pub fn contains(&self, tile: TileIdentity) -> bool {
        if tile.level >= self.levels {
            return false;
        }
        let (columns, rows) = self.tile_count(tile.level);
        tile.column < columns && tile.row < rows
    }

    /// Tiles needed to cover `visible_rect` when drawn at `zoom_scale`.
    ///
    /// The rectangle is clamped to the image bounds. The result is the minimal
    /// set of tiles at the chosen level whose pixel rectangles together cover
    /// the clamped rectangle, in row-major order. A rectangle with no area
    /// inside the image yields an empty set.
    pub fn tiles_covering(&self, visible_rect: VisibleRect, zoom_scale: f64) -> Vec<TileIdentity> {
        let Some((x0, y0, x1, y1)) = self.clamp(visible_rect) else {
            return Vec::new();
        };

        let level = self.level_for_scale(zoom_scale);
        let span = self.span(level) as f64;
        let (columns, rows) = self.tile_count(level);

        // Right and bottom edges are exclusive
        let first_column = (x0 / span).floor() as u32;
        let last_column = ((x1 / span).ceil() as u32).saturating_sub(1).min(columns - 1);
        let first_row = (y0 / span).floor() as u32;
        let last_row = ((y1 / span).ceil() as u32).saturating_sub(1).min(rows - 1);

        let mut tiles = Vec::with_capacity(
            ((last_column - first_column + 1) * (last_row - first_row + 1)) as usize,
        );
        for row in first_row..=last_row {
            for column in first_column..=last_column {
                tiles.push(TileIdentity::new(level, row, column));
            }
        }
        tiles
    }

    /// Native-resolution pixel rectangle of `tile`.
    ///
    /// Tiles in the last row or column are clipped to the image edge and may
    /// be smaller than the tile span. A tile wholly outside the image yields an
    /// empty rectangle positioned at the image edge.
    pub fn pixel_rect(&self, tile: TileIdentity) -> PixelRect {
        let span = self.span(tile.level);
        let width = u64::from(self.image_width);
        let height = u64::from(self.image_height);

        let x = (u64::from(tile.column) * span).min(width);
        let y = (u64::from(tile.row) * span).min(height);

        PixelRect {
            x: x as u32,
            y: y as u32,
            width: span.min(width - x) as u32,
            height: span.min(height - y) as u32,
        }
    }

    /// Clamp a rectangle to the image, returning `(x0, y0, x1, y1)` or `None`
    /// when nothing of positive area remains.
    fn clamp(&self, rect: VisibleRect) -> Option<(f64, f64, f64, f64)> {
        let VisibleRect {
            x,
            y,
            width,
            height,
        } = rect;
        if !(x.is_finite() && y.is_finite() && width.is_finite() && height.is_finite()) {
            return None;
        }

        let image_width = f64::from(self.image_width);
        let image_height = f64::from(self.image_height);

        // Negative extents are normalized the way a standardized rect would be
        let x0 = x.min(x + width).clamp(0.0, image_width);
        let x1 = x.max(x + width).clamp(0.0, image_width);
        let y0 = y.min(y + height).clamp(0.0, image_height);
        let y1 = y.max(y + height).clamp(0.0, image_height);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1, y1))
    }
}

// =============================================================================
// Tests
// =============================================================================
