//! The layer tree: tile layers, object layers, image layers, and groups.

use serde::Serialize;

use super::object::Object;
use super::property::{Color, Property};
use super::tileset::Image;

/// The order in which objects in an object layer are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawOrder {
    /// Sorted by ascending y coordinate.
    #[default]
    TopDown,
    /// Document order.
    Index,
}

/// A rectangular grid of raw GIDs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TileLayer {
    /// Layer width in tiles; matches the map's width in current documents.
    pub width: u32,
    /// Layer height in tiles.
    pub height: u32,
    /// The declared payload encoding ("csv", "base64"), if any.
    pub encoding: Option<String>,
    /// The declared payload compression ("zlib", "gzip"), if any.
    pub compression: Option<String>,
    /// Row-major raw GIDs, including flip flags; length is width × height
    /// unless the layer's data failed to decode, in which case it is empty.
    pub tiles: Vec<u32>,
}

impl TileLayer {
    /// The raw GID at a tile coordinate, if in range.
    #[must_use]
    pub fn tile_at(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.tiles.get((y * self.width + x) as usize).copied()
    }
}

/// A layer holding freeform objects.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjectGroup {
    pub color: Option<Color>,
    pub draw_order: DrawOrder,
    pub objects: Vec<Object>,
}

/// A layer holding a single image.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageLayer {
    pub image: Option<Image>,
    pub repeat_x: bool,
    pub repeat_y: bool,
}

/// What kind of layer this is, with the kind-specific payload.
#[derive(Debug, Clone, Serialize)]
pub enum LayerKind {
    Tile(TileLayer),
    Objects(ObjectGroup),
    Image(ImageLayer),
    /// A container of child layers.
    Group(Vec<Layer>),
}

impl Default for LayerKind {
    fn default() -> Self {
        LayerKind::Tile(TileLayer::default())
    }
}

/// One layer of any kind, with the attributes all kinds share.
#[derive(Debug, Clone, Serialize)]
pub struct Layer {
    pub id: u32,
    pub name: String,
    pub class: String,
    /// 0.0 (transparent) to 1.0 (opaque); defaults to 1.0.
    pub opacity: f64,
    /// Defaults to true.
    pub visible: bool,
    pub tint_color: Option<Color>,
    /// Drawing offset in pixels.
    pub offset_x: i32,
    pub offset_y: i32,
    /// Parallax scroll factors; 1.0 means no parallax.
    pub parallax_x: f64,
    pub parallax_y: f64,
    pub properties: Vec<Property>,
    pub kind: LayerKind,
}

impl Default for Layer {
    fn default() -> Self {
        Layer {
            id: 0,
            name: String::new(),
            class: String::new(),
            opacity: 1.0,
            visible: true,
            tint_color: None,
            offset_x: 0,
            offset_y: 0,
            parallax_x: 1.0,
            parallax_y: 1.0,
            properties: Vec::new(),
            kind: LayerKind::default(),
        }
    }
}

impl Layer {
    /// The tile layer payload, if this is a tile layer.
    #[must_use]
    pub fn as_tile_layer(&self) -> Option<&TileLayer> {
        match &self.kind {
            LayerKind::Tile(layer) => Some(layer),
            _ => None,
        }
    }

    /// The object group payload, if this is an object layer.
    #[must_use]
    pub fn as_object_group(&self) -> Option<&ObjectGroup> {
        match &self.kind {
            LayerKind::Objects(group) => Some(group),
            _ => None,
        }
    }

    /// Child layers, if this is a group layer.
    #[must_use]
    pub fn children(&self) -> Option<&[Layer]> {
        match &self.kind {
            LayerKind::Group(children) => Some(children),
            _ => None,
        }
    }
}
