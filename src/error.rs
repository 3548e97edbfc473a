use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while constructing a tile grid, cache store or tiled image.
///
/// These are fatal at construction time and never retried.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Tile edge length must be at least one pixel
    #[error("Invalid tile edge: {0} (must be greater than 0)")]
    InvalidTileEdge(u32),

    /// Image has no pixels along at least one axis
    #[error("Image is empty: {width}x{height}")]
    EmptyImage { width: u32, height: u32 },

    /// Memory tier budget of zero bytes
    #[error("Memory budget must be greater than 0 bytes")]
    ZeroMemoryBudget,

    /// Cache root could not be created or is not writable
    #[error("Cache root {path:?} is unusable: {message}")]
    CacheRoot { path: PathBuf, message: String },
}

/// Errors produced by the image cache.
///
/// Only [`CacheError::EmptyKey`] crosses the store boundary; the remaining
/// variants come from the disk tier and are downgraded to misses by the store.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Cache keys must not be empty
    #[error("Cache key must not be empty")]
    EmptyKey,

    /// Filesystem error in the disk tier
    #[error("I/O error: {0}")]
    Io(String),

    /// Stored bytes could not be decoded into an image
    #[error("Failed to decode cached image: {0}")]
    Decode(String),

    /// Image could not be encoded for storage
    #[error("Failed to encode image: {0}")]
    Encode(String),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err.to_string())
    }
}

/// Errors that can occur when producing a tile image.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Cache misuse
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Source image could not be opened or decoded
    #[error("Failed to load source image: {message}")]
    SourceImage { message: String },

    /// Tile coordinates outside the grid at the requested level
    #[error(
        "Tile out of bounds: ({row}, {column}) at level {level}, grid is {rows} rows x {columns} columns"
    )]
    TileOutOfBounds {
        level: u32,
        row: u32,
        column: u32,
        rows: u32,
        columns: u32,
    },

    /// A blocking worker task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for TileError {
    fn from(err: tokio::task::JoinError) -> Self {
        TileError::Task(err.to_string())
    }
}
