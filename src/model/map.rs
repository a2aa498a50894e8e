//! The top-level map record and the GID lookup table it owns.

use std::path::PathBuf;

use serde::Serialize;

use super::layer::{Layer, ObjectGroup};
use super::property::{Color, Property};
use super::tileset::{Animation, Tileset};

/// Map orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    None,
    Orthogonal,
    Isometric,
    Staggered,
    Hexagonal,
}

/// The order in which tiles on tile layers are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderOrder {
    #[default]
    RightDown,
    RightUp,
    LeftDown,
    LeftUp,
}

/// An axis-aligned rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Opaque handle to a texture produced by the caller's texture loader. The
/// crate never interprets the value; it only stores and compares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TextureHandle(pub u64);

/// GID flip/rotation flags.
///
/// Tile identifiers in layer data may carry transform flags in their high
/// bits; [`split`] separates them from the plain identifier.
pub mod gid {
    use serde::Serialize;

    /// The tile is flipped horizontally.
    pub const FLIP_HORIZONTAL: u32 = 0x8000_0000;
    /// The tile is flipped vertically.
    pub const FLIP_VERTICAL: u32 = 0x4000_0000;
    /// The tile is flipped along its top-left/bottom-right diagonal.
    pub const FLIP_DIAGONAL: u32 = 0x2000_0000;
    /// Hexagonal maps only: the tile is rotated 120 degrees.
    pub const ROTATE_120: u32 = 0x1000_0000;

    const ALL_FLAGS: u32 = FLIP_HORIZONTAL | FLIP_VERTICAL | FLIP_DIAGONAL | ROTATE_120;

    /// Transform flags carried by a raw GID.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
    pub struct Flip {
        pub horizontal: bool,
        pub vertical: bool,
        pub diagonal: bool,
        pub rotated_120: bool,
    }

    /// Split a raw GID into the plain identifier and its transform flags.
    #[must_use]
    pub fn split(raw: u32) -> (u32, Flip) {
        (
            raw & !ALL_FLAGS,
            Flip {
                horizontal: raw & FLIP_HORIZONTAL != 0,
                vertical: raw & FLIP_VERTICAL != 0,
                diagonal: raw & FLIP_DIAGONAL != 0,
                rotated_120: raw & ROTATE_120 != 0,
            },
        )
    }
}

/// One entry of the GID lookup table: everything needed to draw one tile.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Tile {
    /// The plain GID this entry answers for. For animated tiles this holds
    /// the owning tileset's first GID instead, so frame-local tile ids can
    /// be rebased by adding it.
    pub gid: u32,
    /// The area of the texture to draw.
    pub source_rect: Rect,
    /// The texture the rectangle indexes into, when one was loaded.
    pub texture: Option<TextureHandle>,
    /// Tileset-wide drawing offset in pixels.
    pub offset_x: f32,
    /// Tileset-wide drawing offset in pixels.
    pub offset_y: f32,
    /// Frames to cycle through instead of drawing this tile directly.
    pub animation: Option<Animation>,
    /// Collision shapes attached to the tile in the editor.
    pub object_group: Option<ObjectGroup>,
}

/// A fully loaded map document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Map {
    /// File name of the document this map was loaded from.
    pub file_name: PathBuf,
    pub orientation: Orientation,
    pub render_order: RenderOrder,
    /// Map width in tiles.
    pub width: u32,
    /// Map height in tiles.
    pub height: u32,
    /// Width of one tile in pixels.
    pub tile_width: u32,
    /// Height of one tile in pixels.
    pub tile_height: u32,
    pub parallax_origin_x: i32,
    pub parallax_origin_y: i32,
    pub background_color: Option<Color>,
    pub properties: Vec<Property>,
    pub tilesets: Vec<Tileset>,
    /// Root layers in document order; group layers nest their children.
    pub layers: Vec<Layer>,
    /// Dense GID-indexed lookup table. Index 0 is the "no tile" sentinel and
    /// the length is one more than the highest GID of any tileset.
    pub tiles: Vec<Tile>,
}

impl Map {
    /// Look up the table entry for a raw GID, ignoring its flip flags.
    /// GID 0 and out-of-range GIDs yield `None`.
    #[must_use]
    pub fn tile(&self, raw_gid: u32) -> Option<&Tile> {
        let (id, _) = gid::split(raw_gid);
        if id == 0 {
            return None;
        }
        self.tiles.get(id as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_separates_flags_from_id() {
        let raw = 5 | gid::FLIP_HORIZONTAL | gid::FLIP_DIAGONAL;
        let (id, flip) = gid::split(raw);
        assert_eq!(id, 5);
        assert!(flip.horizontal);
        assert!(!flip.vertical);
        assert!(flip.diagonal);
        assert!(!flip.rotated_120);
    }

    #[test]
    fn tile_zero_is_never_valid() {
        let map = Map {
            tiles: vec![Tile::default(), Tile::default()],
            ..Map::default()
        };
        assert!(map.tile(0).is_none());
        assert!(map.tile(gid::FLIP_VERTICAL).is_none());
        assert!(map.tile(1).is_some());
    }
}
