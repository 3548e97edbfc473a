//! Tile layer.
//!
//! This module maps viewports onto multi-resolution tiles and serves tile
//! images through the image cache.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │      Drawing layer (external)           │
//! │   asks for (row, column, scale)         │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │        TiledImage (TileProvider)        │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │   TileGrid   │  │  tile cache key │  │
//! │  │ (coordinate  │  │  (tile + image  │  │
//! │  │  mapping)    │  │   identity)     │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │            ImageCacheStore              │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileGrid`]: Pure coordinate mapping between viewports, zoom levels and tiles
//! - [`TileIdentity`]: `(level, row, column)` address of one tile
//! - [`TileProvider`]: The `(row, column, scale) -> image` callback contract
//! - [`TiledImage`]: A source image served as cached tiles

mod grid;
mod key;
mod provider;

pub use grid::{
    number_of_zoom_levels, PixelRect, TileGrid, TileIdentity, VisibleRect, COARSEST_LEVEL_TILES,
};
pub use provider::{TileProvider, TiledImage};
