//! Cache keys for tiles.
//!
//! A tile key combines the tile's identity with the identity of the image it
//! was cut from:
//!
//! ```text
//! tile:{level}:{row}:{column}:{image_id}
//! ```
//!
//! The numeric fields come first and the image id last, so the key parses
//! back unambiguously even when the image id itself contains `:`.

use crate::cache::CacheKey;

use super::grid::TileIdentity;

const TILE_KEY_PREFIX: &str = "tile";

impl TileIdentity {
    /// Cache key of this tile within the image identified by `image_id`.
    pub fn cache_key(&self, image_id: &str) -> CacheKey {
        CacheKey::from_nonempty(format!(
            "{TILE_KEY_PREFIX}:{}:{}:{}:{image_id}",
            self.level, self.row, self.column
        ))
    }

    /// Parse a key produced by [`TileIdentity::cache_key`], returning the
    /// tile and the image id. Returns `None` for any other key.
    pub fn from_cache_key(key: &CacheKey) -> Option<(TileIdentity, &str)> {
        let mut parts = key.as_str().splitn(5, ':');

        if parts.next()? != TILE_KEY_PREFIX {
            return None;
        }
        let level = parts.next()?.parse().ok()?;
        let row = parts.next()?.parse().ok()?;
        let column = parts.next()?.parse().ok()?;
        let image_id = parts.next()?;

        Some((TileIdentity::new(level, row, column), image_id))
    }
}
