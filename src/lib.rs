//! # tilemx
//!
//! A pure-Rust loader for the Tiled map editor's XML document family:
//! TMX maps, TSX external tilesets, and TX object templates.
//!
//! The crate parses documents with its own incremental, re-entrant XML
//! tokenizer, builds a typed model of maps, tilesets, layers, and objects,
//! decodes tile-layer payloads (CSV and Base64, raw or DEFLATE-compressed),
//! and resolves every tile GID into a dense lookup table ready for a
//! renderer. Drawing, collision, and text layout are left to the consumer.
//!
//! ## Quick start
//!
//! ```no_run
//! use tilemx::prelude::*;
//!
//! let map = tilemx::load_map("assets/overworld.tmx")?;
//! for layer in &map.layers {
//!     if let Some(tiles) = layer.as_tile_layer() {
//!         for y in 0..tiles.height {
//!             for x in 0..tiles.width {
//!                 let Some(raw) = tiles.tile_at(x, y) else { continue };
//!                 if let Some(tile) = map.tile(raw) {
//!                     // hand tile.source_rect / tile.texture to a renderer
//!                     let _ = tile;
//!                 }
//!             }
//!         }
//!     }
//! }
//! # Ok::<(), tilemx::Error>(())
//! ```
//!
//! ## Custom texture loading
//!
//! Image references resolve through an overridable callback, so any
//! rendering backend (or none at all) can supply the handles:
//!
//! ```no_run
//! use tilemx::{LoadOptions, TextureHandle};
//!
//! let options = LoadOptions::new().with_texture_loader(|path| {
//!     // upload to the GPU here and return your own id
//!     Some(TextureHandle(42))
//! });
//! let map = tilemx::load_map_with("assets/overworld.tmx", options)?;
//! # Ok::<(), tilemx::Error>(())
//! ```
//!
//! ## Feature flags
//!
//! - `cli` - Enables the `tilemx` command-line binary

mod builder;

pub mod data;
pub mod error;
pub mod loader;
pub mod model;
pub mod summary;
pub mod xml;

// Re-exports for convenience
pub use error::{Error, Result};
pub use loader::{
    load_map, load_map_with, load_template, load_template_with, load_tileset, load_tileset_with,
    LoadOptions, ObjectTemplate, TextureLoader,
};
pub use model::{Map, TextureHandle};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::loader::{
        load_map, load_map_with, load_template, load_tileset, LoadOptions, ObjectTemplate,
    };
    pub use crate::model::{
        gid, Layer, LayerKind, Map, Object, ObjectGroup, ObjectShape, Property, PropertyValue,
        TextureHandle, Tile, TileLayer, Tileset, TilesetTile,
    };
    pub use crate::summary::{trace_map, SummaryFilter};
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// CLI module (feature-gated)
#[cfg(feature = "cli")]
pub mod cli;
