//! Tile mapping and rendering integration tests.
//!
//! Tests verify:
//! - Covering sets are complete and minimal for many viewports
//! - Tiles rendered through the provider land in both cache tiers
//! - A second image instance reuses tiles from disk

use std::sync::Arc;

use tileview::{
    number_of_zoom_levels, TileError, TileGrid, TileIdentity, TileProvider, TiledImage,
    VisibleRect,
};

use super::test_utils::{gradient_image, open_store, temp_store, write_gradient_png};

// =============================================================================
// Coordinate Mapping
// =============================================================================

#[test]
fn test_large_image_scenario() {
    let grid = TileGrid::new(2000, 2000, 512).unwrap();
    assert_eq!(grid.levels(), 3);
    assert_eq!(number_of_zoom_levels(2000, 2000, 512), 3);

    // Full image at half scale needs the 2x2 level-1 tiles
    let tiles = grid.tiles_covering(VisibleRect::new(0.0, 0.0, 2000.0, 2000.0), 0.5);
    assert_eq!(tiles.len(), 4);
    assert!(tiles.iter().all(|tile| tile.level == 1));

    // A quarter scale shows the whole image in one tile
    let tiles = grid.tiles_covering(VisibleRect::new(0.0, 0.0, 2000.0, 2000.0), 0.25);
    assert_eq!(tiles, vec![TileIdentity::new(2, 0, 0)]);
}

#[test]
fn test_covering_sets_are_complete_and_minimal() {
    let grid = TileGrid::new(1000, 700, 64).unwrap();
    let scales = [1.0, 0.7, 0.5, 0.3, 0.25, 0.1, 0.01];
    let rects = [
        VisibleRect::new(0.0, 0.0, 1000.0, 700.0),
        VisibleRect::new(63.5, 10.0, 1.0, 1.0),
        VisibleRect::new(300.0, 200.0, 257.0, 129.0),
        VisibleRect::new(-50.0, -50.0, 200.0, 120.0),
        VisibleRect::new(900.0, 600.0, 400.0, 400.0),
    ];

    for &scale in &scales {
        for &rect in &rects {
            let tiles = grid.tiles_covering(rect, scale);
            assert!(!tiles.is_empty(), "{rect:?} at {scale}");

            let x0 = rect.x.max(0.0);
            let y0 = rect.y.max(0.0);
            let x1 = (rect.x + rect.width).min(1000.0);
            let y1 = (rect.y + rect.height).min(700.0);

            // Every integer sample point of the clamped rect is covered
            let mut y = y0.floor();
            while y < y1 {
                let mut x = x0.floor();
                while x < x1 {
                    let covered = tiles
                        .iter()
                        .any(|tile| grid.pixel_rect(*tile).contains_point(x as u32, y as u32));
                    assert!(covered, "({x}, {y}) of {rect:?} at {scale}");
                    x += 7.0;
                }
                y += 7.0;
            }

            // Every tile overlaps the clamped rect
            for tile in &tiles {
                let r = grid.pixel_rect(*tile);
                assert!(
                    f64::from(r.x) < x1
                        && f64::from(r.x + r.width) > x0
                        && f64::from(r.y) < y1
                        && f64::from(r.y + r.height) > y0,
                    "{tile:?} does not overlap {rect:?} at {scale}"
                );
            }
        }
    }
}

#[test]
fn test_viewport_outside_image_is_empty() {
    let grid = TileGrid::new(1000, 700, 64).unwrap();
    let outside = [
        VisibleRect::new(1000.0, 0.0, 50.0, 50.0),
        VisibleRect::new(-100.0, -100.0, 50.0, 50.0),
        VisibleRect::new(10.0, 10.0, 0.0, 100.0),
    ];
    for rect in outside {
        assert!(grid.tiles_covering(rect, 1.0).is_empty(), "{rect:?}");
    }
}

// =============================================================================
// Rendering Through the Cache
// =============================================================================

#[tokio::test]
async fn test_render_viewport_fills_both_tiers() {
    let (_dir, store) = temp_store(16 * 1024 * 1024);
    let image = TiledImage::new("gradient", gradient_image(300, 200), 64, store.clone()).unwrap();

    let tiles = image
        .render_viewport(VisibleRect::new(0.0, 0.0, 300.0, 200.0), 1.0)
        .await
        .unwrap();
    assert_eq!(tiles.len(), 5 * 4);

    for (tile, pixels) in &tiles {
        let rect = image.grid().pixel_rect(*tile);
        assert_eq!((pixels.width(), pixels.height()), (rect.width, rect.height));

        let key = tile.cache_key(image.id());
        assert!(store.contains_in_memory(&key).await);
        assert!(store.disk().path_for(&key).is_file());
    }

    let stats = store.stats().await;
    assert_eq!(stats.misses, 20);
    assert_eq!(stats.disk_writes, 20);
}

#[tokio::test]
async fn test_rendered_tile_matches_source_pixels() {
    let (_dir, store) = temp_store(16 * 1024 * 1024);
    let source = gradient_image(300, 200);
    let image = TiledImage::new("gradient", source.clone(), 64, store).unwrap();

    let tile = image.tile(TileIdentity::new(0, 1, 2)).await.unwrap();
    let expected = source.crop_imm(128, 64, 64, 64);
    assert_eq!(tile.to_rgb8(), expected.to_rgb8());
}

#[tokio::test]
async fn test_provider_as_trait_object() {
    let (_dir, store) = temp_store(16 * 1024 * 1024);
    let image = TiledImage::new("gradient", gradient_image(300, 200), 64, store).unwrap();
    let provider: Arc<dyn TileProvider> = Arc::new(image);

    // Scale 0.25 rounds to level 2: spans 256 px, drawn at 64
    let tile = provider.tile_image(0, 0, 0.25).await.unwrap();
    assert_eq!((tile.width(), tile.height()), (64, 50));

    let result = provider.tile_image(0, 9, 0.25).await;
    assert!(matches!(result, Err(TileError::TileOutOfBounds { .. })));
}

#[tokio::test]
async fn test_reopened_image_reuses_disk_tiles() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_gradient_png(dir.path(), "source.png", 256, 256);
    let cache_root = dir.path().join("cache");
    let rect = VisibleRect::new(0.0, 0.0, 256.0, 256.0);

    let first = {
        let store = Arc::new(open_store(&cache_root, 16 * 1024 * 1024));
        let image = TiledImage::open(&source, 128, store.clone()).await.unwrap();
        let tiles = image.render_viewport(rect, 1.0).await.unwrap();
        assert_eq!(store.stats().await.misses, 4);
        tiles
    };

    let store = Arc::new(open_store(&cache_root, 16 * 1024 * 1024));
    let image = TiledImage::open(&source, 128, store.clone()).await.unwrap();
    let second = image.render_viewport(rect, 1.0).await.unwrap();

    let stats = store.stats().await;
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.disk_hits, 4);

    for ((tile_a, pixels_a), (tile_b, pixels_b)) in first.iter().zip(&second) {
        assert_eq!(tile_a, tile_b);
        assert_eq!(pixels_a.to_rgb8(), pixels_b.to_rgb8());
    }
}
