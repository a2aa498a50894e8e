//! Freeform objects placed on object layers.

use serde::Serialize;

use super::map::Rect;
use super::property::{Color, Property};

/// Horizontal alignment of text within its object bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HorizontalAlign {
    #[default]
    Left,
    Center,
    Right,
    Justify,
}

/// Vertical alignment of text within its object bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerticalAlign {
    #[default]
    Top,
    Center,
    Bottom,
}

/// Text drawn inside an object's bounds. Line breaking and justification are
/// the renderer's concern; the record carries the styling attributes as
/// written.
#[derive(Debug, Clone, Serialize)]
pub struct Text {
    pub content: String,
    pub font_family: String,
    pub pixel_size: u32,
    pub wrap: bool,
    pub color: Color,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strikeout: bool,
    pub kerning: bool,
    pub halign: HorizontalAlign,
    pub valign: VerticalAlign,
}

impl Default for Text {
    fn default() -> Self {
        Text {
            content: String::new(),
            font_family: String::new(),
            pixel_size: 16,
            wrap: false,
            color: Color::BLACK,
            bold: false,
            italic: false,
            underline: false,
            strikeout: false,
            kerning: true,
            halign: HorizontalAlign::default(),
            valign: VerticalAlign::default(),
        }
    }
}

/// The geometric shape of an object.
#[derive(Debug, Clone, Default, Serialize)]
pub enum ObjectShape {
    /// The default: `x`/`y`/`width`/`height` describe a rectangle.
    #[default]
    Rectangle,
    /// The object's bounds describe an ellipse.
    Ellipse,
    /// A single point at `x`/`y`.
    Point,
    /// A closed polygon; vertices are relative to the object's position.
    Polygon {
        points: Vec<(f64, f64)>,
    },
    /// An open polyline; vertices are relative to the object's position.
    Polyline {
        points: Vec<(f64, f64)>,
    },
    /// Text within the object's bounds.
    Text(Text),
    /// A tile stamped at the object's position.
    Tile {
        /// Raw GID of the tile, including flip flags.
        gid: u32,
    },
}

/// One `<object>` on an object layer (or a tile's collision group).
#[derive(Debug, Clone, Serialize)]
pub struct Object {
    pub id: u32,
    pub name: String,
    /// The editor's freeform object type/class string.
    pub class: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Rotation in degrees, clockwise around (x, y).
    pub rotation: f64,
    pub visible: bool,
    /// Path of the TX template this object instantiates, if any.
    pub template: Option<String>,
    pub shape: ObjectShape,
    pub properties: Vec<Property>,
    /// Axis-aligned bounding box in absolute map coordinates. Tile objects
    /// get no box here because their size depends on the referenced tile.
    pub aabb: Option<Rect>,
}

impl Default for Object {
    fn default() -> Self {
        Object {
            id: 0,
            name: String::new(),
            class: String::new(),
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            rotation: 0.0,
            visible: true,
            template: None,
            shape: ObjectShape::default(),
            properties: Vec::new(),
            aabb: None,
        }
    }
}

impl Object {
    /// Find a property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }
}
