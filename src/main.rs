//! tileview - Render and cache multi-resolution tiles of large images.
//!
//! This binary wires the tile grid and the image cache into a small CLI.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tileview::{
    config::{CacheArgs, Cli, Command, LevelsConfig, RenderConfig},
    CacheKey, CacheStats, ImageCacheStore, PixelRect, TileGrid, TileIdentity, TiledImage,
    VisibleRect,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Render(config) => run_render(config).await,
        Command::Levels(config) => run_levels(config).await,
        Command::Clear(args) => run_clear(args).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tileview=debug"
    } else {
        "tileview=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Print a report as pretty JSON on stdout.
fn print_json<T: Serialize>(report: &T) -> ExitCode {
    match serde_json::to_string_pretty(report) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to serialize report: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Levels Command
// =============================================================================

#[derive(Debug, Serialize)]
struct LevelsReport {
    width: u32,
    height: u32,
    tile_edge: u32,
    levels: Vec<LevelReport>,
}

#[derive(Debug, Serialize)]
struct LevelReport {
    level: u32,
    scale: f64,
    width: u32,
    height: u32,
    columns: u32,
    rows: u32,
}

impl LevelsReport {
    fn from_grid(grid: &TileGrid) -> Self {
        let (width, height) = grid.image_size();
        let levels = (0..grid.levels())
            .map(|level| {
                let (level_width, level_height) = grid.level_dimensions(level);
                let (columns, rows) = grid.tile_count(level);
                LevelReport {
                    level,
                    scale: grid.scale_for_level(level),
                    width: level_width,
                    height: level_height,
                    columns,
                    rows,
                }
            })
            .collect();

        Self {
            width,
            height,
            tile_edge: grid.tile_edge(),
            levels,
        }
    }
}

async fn run_levels(config: LevelsConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let (width, height) = match read_dimensions(&config.image).await {
        Ok(size) => size,
        Err(e) => {
            error!("Failed to read {}: {}", config.image.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let grid = match TileGrid::new(width, height, config.tile_edge) {
        Ok(grid) => grid,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let report = LevelsReport::from_grid(&grid);
    if config.json {
        return print_json(&report);
    }

    println!(
        "{}: {}x{} px, tile edge {} px, {} level(s)",
        config.image.display(),
        report.width,
        report.height,
        report.tile_edge,
        report.levels.len()
    );
    for level in &report.levels {
        println!(
            "  level {:>2}  scale {:<10}  {:>6}x{:<6} px  {:>4}x{:<4} tiles",
            level.level, level.scale, level.width, level.height, level.columns, level.rows
        );
    }

    ExitCode::SUCCESS
}

/// Read image dimensions from the file header without decoding pixels.
async fn read_dimensions(path: &Path) -> Result<(u32, u32), String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || image::image_dimensions(&path))
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())
}

// =============================================================================
// Render Command
// =============================================================================

#[derive(Debug, Serialize)]
struct RenderReport {
    image_id: String,
    level: u32,
    tiles: Vec<TileReport>,
    stats: CacheStats,
}

#[derive(Debug, Serialize)]
struct TileReport {
    #[serde(flatten)]
    tile: TileIdentity,
    source: PixelRect,
    width: u32,
    height: u32,
    cached: bool,
}

async fn run_render(config: RenderConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let store = match ImageCacheStore::open(config.cache.cache_config()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open cache: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let image = match TiledImage::open(&config.image, config.tile_edge, store.clone()).await {
        Ok(image) => image,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let grid = *image.grid();
    let rect = VisibleRect::new(config.x, config.y, config.width, config.height);
    let level = grid.level_for_scale(config.scale);

    info!(
        image = %config.image.display(),
        id = %image.id(),
        level,
        "Rendering viewport"
    );

    // Whether each tile was already cached, either in memory or on disk
    let mut cached = Vec::new();
    for tile in grid.tiles_covering(rect, config.scale) {
        let key = tile.cache_key(image.id());
        cached.push(is_cached(&store, &key).await);
    }

    let rendered = match image.render_viewport(rect, config.scale).await {
        Ok(tiles) => tiles,
        Err(e) => {
            error!("Failed to render viewport: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let tiles: Vec<TileReport> = rendered
        .into_iter()
        .zip(cached)
        .map(|((tile, pixels), cached)| TileReport {
            tile,
            source: grid.pixel_rect(tile),
            width: pixels.width(),
            height: pixels.height(),
            cached,
        })
        .collect();

    let report = RenderReport {
        image_id: image.id().to_string(),
        level,
        tiles,
        stats: store.stats().await,
    };

    if config.json {
        return print_json(&report);
    }

    for tile in &report.tiles {
        println!(
            "level {} row {:>4} column {:>4}  source {}x{}+{}+{}  tile {}x{}  {}",
            tile.tile.level,
            tile.tile.row,
            tile.tile.column,
            tile.source.width,
            tile.source.height,
            tile.source.x,
            tile.source.y,
            tile.width,
            tile.height,
            if tile.cached { "cached" } else { "rendered" }
        );
    }

    let stats = &report.stats;
    info!(
        "{} tile(s): {} memory hit(s), {} disk hit(s), {} miss(es), {}/{} bytes in memory",
        report.tiles.len(),
        stats.memory_hits,
        stats.disk_hits,
        stats.misses,
        stats.memory_bytes,
        stats.memory_budget
    );

    ExitCode::SUCCESS
}

/// Whether `key` is in either tier, without promoting or hydrating it.
async fn is_cached(store: &ImageCacheStore, key: &CacheKey) -> bool {
    if store.contains_in_memory(key).await {
        return true;
    }
    match tokio::fs::try_exists(store.disk().path_for(key)).await {
        Ok(exists) => exists,
        Err(e) => {
            warn!(key = %key, error = %e, "Failed to check disk cache entry");
            false
        }
    }
}

// =============================================================================
// Clear Command
// =============================================================================

/// Number of entries on disk, or `None` if the directory cannot be listed.
async fn count_disk_entries(store: &ImageCacheStore) -> Option<usize> {
    let disk = store.disk().clone();
    match tokio::task::spawn_blocking(move || disk.len()).await {
        Ok(Ok(count)) => Some(count),
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to count disk cache entries");
            None
        }
        Err(e) => {
            warn!(error = %e, "Disk cache count task failed");
            None
        }
    }
}

async fn run_clear(args: CacheArgs) -> ExitCode {
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let store = match ImageCacheStore::open(args.cache_config()) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open cache: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let before = count_disk_entries(&store).await;
    store.clear().await;

    let root = store.disk().root().display();
    match before {
        Some(count) => info!(root = %root, "Removed {} cached image(s)", count),
        None => info!(root = %root, "Cleared image cache"),
    }

    ExitCode::SUCCESS
}
