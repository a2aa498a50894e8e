//! The in-memory map model.
//!
//! Every record here is immutable once its owning document scope closes
//! during loading, owns its strings and arrays, and is torn down by ordinary
//! recursive drop of the `Map` that roots it.

pub mod layer;
pub mod map;
pub mod object;
pub mod property;
pub mod tileset;

pub use layer::{DrawOrder, ImageLayer, Layer, LayerKind, ObjectGroup, TileLayer};
pub use map::{gid, Map, Orientation, Rect, RenderOrder, TextureHandle, Tile};
pub use object::{HorizontalAlign, Object, ObjectShape, Text, VerticalAlign};
pub use property::{Color, Property, PropertyValue};
pub use tileset::{Animation, Frame, Image, ObjectAlignment, Tileset, TilesetTile};
