//! Tilesets and the tiles, images, and animations they define.

use serde::Serialize;

use super::layer::ObjectGroup;
use super::map::TextureHandle;
use super::property::{Color, Property};

/// Alignment of tiles from this tileset when placed as tile objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectAlignment {
    #[default]
    Unspecified,
    TopLeft,
    Top,
    TopRight,
    Left,
    Center,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
}

/// A reference to an image file plus the texture loaded from it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Image {
    /// Path as written in the document, relative to the document's directory.
    pub source: String,
    /// Color key to treat as transparent, when present.
    pub trans: Option<Color>,
    /// Image width in pixels as declared in the document.
    pub width: u32,
    /// Image height in pixels as declared in the document.
    pub height: u32,
    /// Handle produced by the texture loader; `None` when loading failed or
    /// no loader was configured.
    pub texture: Option<TextureHandle>,
}

/// One frame of a tile animation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Frame {
    /// Local tile id (relative to the owning tileset) to display.
    pub tile_id: u32,
    /// How long the frame shows, in seconds.
    pub duration: f32,
}

/// A tile animation: an ordered list of frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Animation {
    pub frames: Vec<Frame>,
}

/// A tile defined explicitly inside a `<tileset>`.
///
/// Most tiles of a shared-image tileset are implicit; explicit entries add
/// animations, collision shapes, per-tile images (collection-of-images
/// tilesets), or source-rectangle overrides.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TilesetTile {
    /// Local id within the tileset.
    pub id: u32,
    /// Sub-rectangle override into the tileset image, when declared.
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// The tile's own image, for collection-of-images tilesets.
    pub image: Option<Image>,
    pub animation: Option<Animation>,
    pub properties: Vec<Property>,
    /// Collision shapes drawn in the editor's collision tool.
    pub object_group: Option<ObjectGroup>,
}

/// A named, contiguous range of GIDs backed by one shared image or a
/// collection of per-tile images.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Tileset {
    /// The first GID this tileset answers for.
    pub first_gid: u32,
    /// Path of the external TSX document this tileset came from, if any.
    pub source: Option<String>,
    pub name: String,
    pub class: String,
    /// Width of each tile in pixels.
    pub tile_width: u32,
    /// Height of each tile in pixels.
    pub tile_height: u32,
    /// Pixels between tiles in the shared image.
    pub spacing: u32,
    /// Pixels around the edge of the shared image.
    pub margin: u32,
    /// Total number of tiles, implicit and explicit.
    pub tile_count: u32,
    /// Number of tile columns in the shared image.
    pub columns: u32,
    pub object_alignment: ObjectAlignment,
    /// Per-tile drawing offset in pixels.
    pub offset_x: i32,
    /// Per-tile drawing offset in pixels.
    pub offset_y: i32,
    /// The shared image, absent for collection-of-images tilesets.
    pub image: Option<Image>,
    pub properties: Vec<Property>,
    /// Explicitly-defined tiles.
    pub tiles: Vec<TilesetTile>,
}

impl Tileset {
    /// The last GID this tileset answers for: `first_gid + tile_count - 1`
    /// for shared-image tilesets, or `first_gid` plus the highest explicit
    /// tile id for collections of images.
    #[must_use]
    pub fn last_gid(&self) -> u32 {
        if self.image.is_some() {
            self.first_gid + self.tile_count.saturating_sub(1)
        } else {
            self.first_gid
                + self
                    .tiles
                    .iter()
                    .map(|tile| tile.id)
                    .max()
                    .unwrap_or(0)
        }
    }

    /// Whether a plain GID falls inside this tileset's range.
    #[must_use]
    pub fn contains(&self, gid: u32) -> bool {
        gid >= self.first_gid && gid <= self.last_gid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_gid_of_shared_image_tileset() {
        let tileset = Tileset {
            first_gid: 1,
            tile_count: 8,
            image: Some(Image::default()),
            ..Tileset::default()
        };
        assert_eq!(tileset.last_gid(), 8);
        assert!(tileset.contains(1));
        assert!(tileset.contains(8));
        assert!(!tileset.contains(9));
    }

    #[test]
    fn last_gid_of_image_collection_uses_max_tile_id() {
        let tileset = Tileset {
            first_gid: 10,
            tiles: vec![
                TilesetTile {
                    id: 0,
                    ..TilesetTile::default()
                },
                TilesetTile {
                    id: 7,
                    ..TilesetTile::default()
                },
                TilesetTile {
                    id: 3,
                    ..TilesetTile::default()
                },
            ],
            ..Tileset::default()
        };
        assert_eq!(tileset.last_gid(), 17);
    }
}
