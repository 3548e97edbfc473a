//! Configuration management for tileview.
//!
//! This module provides the command-line configuration, which supports:
//! - Command-line arguments via clap
//! - Environment variables with `TILEVIEW_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use tileview::config::{Cli, Command};
//!
//! let cli = Cli::parse();
//! if let Command::Render(config) = cli.command {
//!     println!("Cache root: {}", config.cache.cache_root.display());
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `TILEVIEW_CACHE_ROOT` - Disk cache directory (default: ./tile-cache)
//! - `TILEVIEW_MEMORY_BUDGET` - Memory cache budget in bytes (default: 64MB)
//! - `TILEVIEW_TILE_EDGE` - Tile edge length in pixels (default: 256)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::cache::{CacheConfig, DEFAULT_CACHE_ROOT, DEFAULT_MEMORY_BUDGET};

// =============================================================================
// Default Values
// =============================================================================

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_EDGE: u32 = 256;

/// Largest accepted tile edge length in pixels.
pub const MAX_TILE_EDGE: u32 = 8192;

// =============================================================================
// CLI Arguments
// =============================================================================

/// tileview - Multi-resolution tiles for large images, backed by a two-tier cache.
#[derive(Parser, Debug, Clone)]
#[command(name = "tileview")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Render the tiles covering a viewport, using and filling the cache.
    Render(RenderConfig),

    /// Show the zoom levels and tile grid of an image.
    Levels(LevelsConfig),

    /// Remove every cached image from memory and disk.
    Clear(CacheArgs),
}

/// Cache settings shared by commands that open the cache.
#[derive(Args, Debug, Clone)]
pub struct CacheArgs {
    /// Directory holding the disk cache.
    #[arg(long, default_value = DEFAULT_CACHE_ROOT, env = "TILEVIEW_CACHE_ROOT")]
    pub cache_root: PathBuf,

    /// Memory cache budget in bytes.
    #[arg(long, default_value_t = DEFAULT_MEMORY_BUDGET, env = "TILEVIEW_MEMORY_BUDGET")]
    pub memory_budget: usize,
}

impl CacheArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_root.as_os_str().is_empty() {
            return Err(
                "Cache root is required. Set --cache-root or TILEVIEW_CACHE_ROOT".to_string(),
            );
        }
        if self.memory_budget == 0 {
            return Err("memory_budget must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(self.cache_root.clone()).with_memory_budget(self.memory_budget)
    }
}

/// Arguments of the `render` command.
#[derive(Args, Debug, Clone)]
pub struct RenderConfig {
    /// Source image file.
    pub image: PathBuf,

    #[command(flatten)]
    pub cache: CacheArgs,

    /// Tile edge length in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_EDGE, env = "TILEVIEW_TILE_EDGE")]
    pub tile_edge: u32,

    /// Left edge of the viewport in native image pixels.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub x: f64,

    /// Top edge of the viewport in native image pixels.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub y: f64,

    /// Viewport width in native image pixels.
    #[arg(long)]
    pub width: f64,

    /// Viewport height in native image pixels.
    #[arg(long)]
    pub height: f64,

    /// Zoom scale in (0, 1]; 1 draws at native resolution.
    #[arg(long, default_value_t = 1.0)]
    pub scale: f64,

    /// Print the report as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl RenderConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.cache.validate()?;
        validate_tile_edge(self.tile_edge)?;

        if !(self.x.is_finite() && self.y.is_finite()) {
            return Err("Viewport origin must be finite".to_string());
        }
        if !(self.width.is_finite() && self.height.is_finite())
            || self.width < 0.0
            || self.height < 0.0
        {
            return Err("Viewport width and height must be finite and non-negative".to_string());
        }
        if !(self.scale > 0.0 && self.scale <= 1.0) {
            return Err("scale must be in (0, 1]".to_string());
        }
        Ok(())
    }
}

/// Arguments of the `levels` command.
#[derive(Args, Debug, Clone)]
pub struct LevelsConfig {
    /// Source image file.
    pub image: PathBuf,

    /// Tile edge length in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_EDGE, env = "TILEVIEW_TILE_EDGE")]
    pub tile_edge: u32,

    /// Print the report as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl LevelsConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_tile_edge(self.tile_edge)
    }
}

fn validate_tile_edge(tile_edge: u32) -> Result<(), String> {
    if tile_edge == 0 || tile_edge > MAX_TILE_EDGE {
        return Err(format!("tile_edge must be between 1 and {MAX_TILE_EDGE}"));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
