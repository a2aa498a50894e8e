//! Event-driven model builder.
//!
//! Consumes parser events and populates staging structures keyed off the
//! currently open tag name. Staging lists are plain `Vec`s that get
//! flattened into the owning record the moment their scope closes; default
//! values that depend on more than one attribute (tile-object alignment by
//! map orientation, tile sizes from images) are applied at scope close, not
//! at attribute time. Unrecognized element and attribute names are ignored
//! so newer documents still load.

use std::mem;
use std::path::{Path, PathBuf};

use crate::data;
use crate::error::Result;
use crate::loader::LoadContext;
use crate::model::{
    DrawOrder, HorizontalAlign, Image, Layer, LayerKind, Map, Object, ObjectAlignment,
    ObjectGroup, ObjectShape, Orientation, Property, PropertyValue, Rect, RenderOrder, Text,
    TileLayer, Tileset, TilesetTile, VerticalAlign,
};
use crate::model::{Color, Frame};
use crate::xml::{ParseCode, Parser};

/// Which of the three document shapes is being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DocumentKind {
    /// A full map: tilesets plus a layer tree.
    Map,
    /// An external tileset document; the root element is `<tileset>`.
    Tileset,
    /// An object template: one object, optionally with a tileset.
    Template,
}

/// Everything a finished parse produced, before cross-reference resolution.
#[derive(Debug, Default)]
pub(crate) struct BuiltDocument {
    pub map: Map,
    /// Root-level objects; only object templates produce these.
    pub objects: Vec<Object>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageHost {
    None,
    Tileset,
    TilesetTile,
    ImageLayer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupHost {
    Layer,
    TilesetTile,
}

/// Per-attribute "was it written" flags for the open object, so template
/// values only fill attributes the instance never set.
#[derive(Debug, Default, Clone, Copy)]
struct SeenObjectAttrs {
    name: bool,
    class: bool,
    x: bool,
    y: bool,
    width: bool,
    height: bool,
    rotation: bool,
    visible: bool,
    shape: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum PropertyType {
    #[default]
    String,
    Int,
    Float,
    Bool,
    Color,
    File,
    Object,
}

/// A `<property>` mid-flight. The `value` attribute may arrive before the
/// `type` attribute, so the raw string is kept and converted at scope close.
#[derive(Debug, Default)]
struct PropertyStaging {
    name: String,
    kind: PropertyType,
    raw: Option<String>,
}

pub(crate) struct Builder<'ctx> {
    kind: DocumentKind,
    /// Directory of the document, for resolving external references.
    dir: PathBuf,
    ctx: &'ctx mut LoadContext,

    map: Map,

    // Currently-open records. TMX nesting never opens two of the same kind.
    property: Option<PropertyStaging>,
    tileset: Option<Tileset>,
    tileset_tile: Option<TilesetTile>,
    frame: Option<Frame>,
    layer: Option<Layer>,
    object_group: Option<ObjectGroup>,
    group_host: GroupHost,
    object: Option<Object>,
    object_seen: SeenObjectAttrs,
    image_host: ImageHost,
    in_animation: bool,
    data_decoded: bool,

    // Staging lists, flattened when their scope closes.
    properties: Vec<Property>,
    properties_depth: u32,
    tilesets: Vec<Tileset>,
    tileset_tiles: Vec<TilesetTile>,
    frames: Vec<Frame>,
    layer_gids: Vec<u32>,
    objects: Vec<Object>,
    root_layers: Vec<Layer>,
    /// Open `<group>` layers, innermost last.
    group_stack: Vec<Layer>,
    root_objects: Vec<Object>,
}

impl<'ctx> Builder<'ctx> {
    pub(crate) fn new(kind: DocumentKind, dir: PathBuf, ctx: &'ctx mut LoadContext) -> Self {
        Builder {
            kind,
            dir,
            ctx,
            map: Map::default(),
            property: None,
            tileset: None,
            tileset_tile: None,
            frame: None,
            layer: None,
            object_group: None,
            group_host: GroupHost::Layer,
            object: None,
            object_seen: SeenObjectAttrs::default(),
            image_host: ImageHost::None,
            in_animation: false,
            data_decoded: false,
            properties: Vec::new(),
            properties_depth: 0,
            tilesets: Vec::new(),
            tileset_tiles: Vec::new(),
            frames: Vec::new(),
            layer_gids: Vec::new(),
            objects: Vec::new(),
            root_layers: Vec::new(),
            group_stack: Vec::new(),
            root_objects: Vec::new(),
        }
    }

    /// Route one parser event into the staging structures.
    pub(crate) fn handle(&mut self, parser: &Parser, code: ParseCode) -> Result<()> {
        match code {
            ParseCode::ElementBegin => self.element_begin(parser),
            ParseCode::Attribute => self.attribute(parser),
            ParseCode::ElementEnd => self.element_end(parser),
            _ => {}
        }
        Ok(())
    }

    /// Flatten what remains and hand the document over.
    pub(crate) fn finish(mut self) -> BuiltDocument {
        self.map.tilesets = mem::take(&mut self.tilesets);
        self.map.layers = mem::take(&mut self.root_layers);
        BuiltDocument {
            map: self.map,
            objects: self.root_objects,
        }
    }

    // ---- element begin ---------------------------------------------------

    fn element_begin(&mut self, parser: &Parser) {
        let tag = parser.tag().unwrap_or("");
        match tag {
            "properties" => {
                // Nested <properties> are unsupported but tracked by depth so
                // everything still flattens at the outermost close.
                self.properties_depth += 1;
            }
            "property" => self.property = Some(PropertyStaging::default()),
            "tileset" => self.tileset = Some(Tileset::default()),
            "image" => self.begin_image(parser),
            "tile" => {
                // A tileset's <tile> defines metadata; a layer's <tile> only
                // carries a gid attribute and is handled there.
                if self.tileset.is_some() {
                    self.tileset_tile = Some(TilesetTile::default());
                }
            }
            "animation" => {
                if self.tileset_tile.is_some() {
                    self.in_animation = true;
                }
            }
            "frame" => {
                if self.in_animation {
                    self.frame = Some(Frame::default());
                }
            }
            "layer" => {
                self.layer = Some(Layer::default());
                self.data_decoded = false;
            }
            "objectgroup" => {
                if self.tileset_tile.is_some() {
                    // An object group under a <tile> is its collision info.
                    self.object_group = Some(ObjectGroup::default());
                    self.group_host = GroupHost::TilesetTile;
                } else {
                    self.layer = Some(Layer {
                        kind: LayerKind::Objects(ObjectGroup::default()),
                        ..Layer::default()
                    });
                    self.object_group = Some(ObjectGroup::default());
                    self.group_host = GroupHost::Layer;
                }
            }
            "object" => {
                // Objects live in object groups, except in templates where
                // one hangs off the root <template> element.
                if self.object_group.is_some() || self.kind == DocumentKind::Template {
                    self.object = Some(Object::default());
                    self.object_seen = SeenObjectAttrs::default();
                }
            }
            "ellipse" => self.set_shape(ObjectShape::Ellipse),
            "point" => self.set_shape(ObjectShape::Point),
            "polygon" => self.set_shape(ObjectShape::Polygon { points: Vec::new() }),
            "polyline" => self.set_shape(ObjectShape::Polyline { points: Vec::new() }),
            "text" => self.set_shape(ObjectShape::Text(Text::default())),
            "imagelayer" => {
                self.layer = Some(Layer {
                    kind: LayerKind::Image(crate::model::ImageLayer::default()),
                    ..Layer::default()
                });
            }
            "group" => {
                self.group_stack.push(Layer {
                    kind: LayerKind::Group(Vec::new()),
                    ..Layer::default()
                });
            }
            _ => {}
        }
    }

    fn set_shape(&mut self, shape: ObjectShape) {
        if let Some(object) = self.object.as_mut() {
            object.shape = shape;
            self.object_seen.shape = true;
        }
    }

    fn begin_image(&mut self, parser: &Parser) {
        // <image> may belong to a <tile>, a <tileset>, or an <imagelayer>,
        // checked innermost-first; each can contain at most one.
        let host = if self.tileset_tile.is_some() {
            ImageHost::TilesetTile
        } else if self.tileset.is_some() {
            ImageHost::Tileset
        } else if matches!(
            self.layer.as_ref().map(|l| &l.kind),
            Some(LayerKind::Image(_))
        ) {
            ImageHost::ImageLayer
        } else {
            ImageHost::None
        };
        let slot = match host {
            ImageHost::TilesetTile => self.tileset_tile.as_mut().map(|t| &mut t.image),
            ImageHost::Tileset => self.tileset.as_mut().map(|t| &mut t.image),
            ImageHost::ImageLayer => match self.layer.as_mut().map(|l| &mut l.kind) {
                Some(LayerKind::Image(image_layer)) => Some(&mut image_layer.image),
                _ => None,
            },
            ImageHost::None => None,
        };
        match slot {
            Some(slot) if slot.is_some() => {
                tracing::warn!(
                    "an element contained multiple images; the image on line {} will be dropped",
                    parser.line()
                );
                self.image_host = ImageHost::None;
            }
            Some(slot) => {
                *slot = Some(Image::default());
                self.image_host = host;
            }
            None => self.image_host = ImageHost::None,
        }
    }

    fn current_image_mut(&mut self) -> Option<&mut Image> {
        match self.image_host {
            ImageHost::TilesetTile => self.tileset_tile.as_mut()?.image.as_mut(),
            ImageHost::Tileset => self.tileset.as_mut()?.image.as_mut(),
            ImageHost::ImageLayer => match self.layer.as_mut().map(|l| &mut l.kind) {
                Some(LayerKind::Image(image_layer)) => image_layer.image.as_mut(),
                _ => None,
            },
            ImageHost::None => None,
        }
    }

    // ---- attributes ------------------------------------------------------

    #[allow(clippy::too_many_lines)]
    fn attribute(&mut self, parser: &Parser) {
        let tag = parser.tag().unwrap_or("");
        let name = parser.attribute().unwrap_or("");
        let value = parser.value().unwrap_or("");
        match tag {
            "map" => match name {
                "orientation" => {
                    self.map.orientation = match value {
                        "orthogonal" => Orientation::Orthogonal,
                        "isometric" => Orientation::Isometric,
                        "staggered" => Orientation::Staggered,
                        "hexagonal" => Orientation::Hexagonal,
                        _ => self.map.orientation,
                    };
                }
                "renderorder" => {
                    self.map.render_order = match value {
                        "right-down" => RenderOrder::RightDown,
                        "right-up" => RenderOrder::RightUp,
                        "left-down" => RenderOrder::LeftDown,
                        "left-up" => RenderOrder::LeftUp,
                        _ => self.map.render_order,
                    };
                }
                "width" => self.map.width = parse_u32(value),
                "height" => self.map.height = parse_u32(value),
                "tilewidth" => self.map.tile_width = parse_u32(value),
                "tileheight" => self.map.tile_height = parse_u32(value),
                "parallaxoriginx" => self.map.parallax_origin_x = parse_i32(value),
                "parallaxoriginy" => self.map.parallax_origin_y = parse_i32(value),
                "backgroundcolor" => self.map.background_color = Some(Color::from_hex(value)),
                _ => {}
            },
            "property" => {
                if let Some(property) = self.property.as_mut() {
                    match name {
                        "name" => property.name = value.to_owned(),
                        "type" => {
                            property.kind = match value {
                                "int" => PropertyType::Int,
                                "float" => PropertyType::Float,
                                "bool" => PropertyType::Bool,
                                "color" => PropertyType::Color,
                                "file" => PropertyType::File,
                                "object" => PropertyType::Object,
                                _ => PropertyType::String,
                            };
                        }
                        "value" => property.raw = Some(value.to_owned()),
                        _ => {}
                    }
                }
            }
            "tileset" => self.tileset_attribute(name, value),
            "tileoffset" => {
                if let Some(tileset) = self.tileset.as_mut() {
                    match name {
                        "x" => tileset.offset_x = parse_i32(value),
                        "y" => tileset.offset_y = parse_i32(value),
                        _ => {}
                    }
                }
            }
            "image" => {
                if name == "source" {
                    let texture = self.ctx.load_texture(&self.dir, value);
                    if let Some(image) = self.current_image_mut() {
                        image.source = value.to_owned();
                        image.texture = texture;
                    }
                } else if let Some(image) = self.current_image_mut() {
                    match name {
                        "trans" => image.trans = Some(Color::from_hex(value)),
                        "width" => image.width = parse_u32(value),
                        "height" => image.height = parse_u32(value),
                        _ => {}
                    }
                }
            }
            "tile" => {
                if let Some(tile) = self.tileset_tile.as_mut() {
                    match name {
                        "id" => tile.id = parse_u32(value),
                        "x" => tile.x = parse_i32(value),
                        "y" => tile.y = parse_i32(value),
                        "width" => tile.width = parse_u32(value),
                        "height" => tile.height = parse_u32(value),
                        _ => {}
                    }
                } else if name == "gid" && self.current_tile_layer().is_some() {
                    self.layer_gids.push(parse_u32(value));
                }
            }
            "frame" => {
                if let Some(frame) = self.frame.as_mut() {
                    match name {
                        "tileid" => frame.tile_id = parse_u32(value),
                        // Durations are written in milliseconds.
                        "duration" => frame.duration = parse_f64(value) as f32 / 1000.0,
                        _ => {}
                    }
                }
            }
            "layer" => {
                if let Some(tile_layer) = self.current_tile_layer() {
                    match name {
                        "width" => tile_layer.width = parse_u32(value),
                        "height" => tile_layer.height = parse_u32(value),
                        _ => {}
                    }
                }
            }
            "data" => {
                if let Some(tile_layer) = self.current_tile_layer() {
                    match name {
                        "encoding" => tile_layer.encoding = Some(value.to_owned()),
                        "compression" => tile_layer.compression = Some(value.to_owned()),
                        _ => {}
                    }
                }
            }
            "objectgroup" => {
                if let Some(group) = self.object_group.as_mut() {
                    match name {
                        "color" => group.color = Some(Color::from_hex(value)),
                        "draworder" => {
                            group.draw_order = match value {
                                "index" => DrawOrder::Index,
                                _ => DrawOrder::TopDown,
                            };
                        }
                        _ => {}
                    }
                }
            }
            "object" => self.object_attribute(name, value),
            "polygon" | "polyline" => {
                if name == "points" {
                    self.points_attribute(value, parser.line());
                }
            }
            "text" => self.text_attribute(name, value),
            "imagelayer" => {
                if let Some(Layer {
                    kind: LayerKind::Image(image_layer),
                    ..
                }) = self.layer.as_mut()
                {
                    match name {
                        "repeatx" => image_layer.repeat_x = parse_bool(value),
                        "repeaty" => image_layer.repeat_y = parse_bool(value),
                        _ => {}
                    }
                }
            }
            _ => {}
        }

        if matches!(tag, "layer" | "objectgroup" | "imagelayer" | "group") {
            self.layer_common_attribute(name, value);
        }
    }

    fn tileset_attribute(&mut self, name: &str, value: &str) {
        // The external load below needs `self.ctx`, so the open tileset is
        // taken out of its slot for the duration.
        let Some(mut tileset) = self.tileset.take() else {
            return;
        };
        match name {
            "firstgid" => tileset.first_gid = parse_u32(value),
            "source" => {
                // The document only carries firstgid + source; everything
                // else lives in the external TSX and gets merged here, with
                // the two local attributes surviving the merge.
                if let Some(external) = self.ctx.load_external_tileset(&self.dir, value) {
                    let first_gid = tileset.first_gid;
                    tileset = external;
                    tileset.first_gid = first_gid;
                }
                tileset.source = Some(value.to_owned());
            }
            "name" => tileset.name = value.to_owned(),
            "class" => tileset.class = value.to_owned(),
            "tilewidth" => tileset.tile_width = parse_u32(value),
            "tileheight" => tileset.tile_height = parse_u32(value),
            "spacing" => tileset.spacing = parse_u32(value),
            "margin" => tileset.margin = parse_u32(value),
            "tilecount" => tileset.tile_count = parse_u32(value),
            "columns" => tileset.columns = parse_u32(value),
            "objectalignment" => {
                tileset.object_alignment = match value {
                    "topleft" => ObjectAlignment::TopLeft,
                    "top" => ObjectAlignment::Top,
                    "topright" => ObjectAlignment::TopRight,
                    "left" => ObjectAlignment::Left,
                    "center" => ObjectAlignment::Center,
                    "right" => ObjectAlignment::Right,
                    "bottomleft" => ObjectAlignment::BottomLeft,
                    "bottom" => ObjectAlignment::Bottom,
                    "bottomright" => ObjectAlignment::BottomRight,
                    _ => ObjectAlignment::Unspecified,
                };
            }
            _ => {}
        }
        self.tileset = Some(tileset);
    }

    fn object_attribute(&mut self, name: &str, value: &str) {
        let Some(object) = self.object.as_mut() else {
            return;
        };
        match name {
            "id" => object.id = parse_u32(value),
            "name" => {
                object.name = value.to_owned();
                self.object_seen.name = true;
            }
            "type" | "class" => {
                object.class = value.to_owned();
                self.object_seen.class = true;
            }
            "x" => {
                object.x = parse_f64(value);
                self.object_seen.x = true;
            }
            "y" => {
                object.y = parse_f64(value);
                self.object_seen.y = true;
            }
            "width" => {
                object.width = parse_f64(value);
                self.object_seen.width = true;
            }
            "height" => {
                object.height = parse_f64(value);
                self.object_seen.height = true;
            }
            "rotation" => {
                object.rotation = parse_f64(value);
                self.object_seen.rotation = true;
            }
            "gid" => {
                // A gid also makes the object a tile object.
                object.shape = ObjectShape::Tile {
                    gid: parse_u32(value),
                };
                self.object_seen.shape = true;
            }
            "visible" => {
                object.visible = parse_bool(value);
                self.object_seen.visible = true;
            }
            "template" => object.template = Some(value.to_owned()),
            _ => {}
        }
    }

    fn points_attribute(&mut self, value: &str, line: u32) {
        let Some(object) = self.object.as_mut() else {
            return;
        };
        let existing = match &object.shape {
            ObjectShape::Polygon { points } | ObjectShape::Polyline { points } => {
                !points.is_empty()
            }
            _ => return,
        };
        if existing {
            tracing::warn!(
                "object \"{}\" has multiple 'points' attributes; points in any latter \
                 'points' attributes will be dropped",
                object.name
            );
            return;
        }
        // The value has the form "0,0 31.25,-0.75 ..."; coordinates are
        // relative to the object's position and may be negative.
        let mut points = Vec::new();
        for pair in value.split_ascii_whitespace() {
            let Some((x, y)) = pair.split_once(',') else {
                tracing::warn!(
                    "the 'points' attribute on line {line} has a malformed value; at least \
                     one point is lost as a result"
                );
                break;
            };
            points.push((parse_f64(x), parse_f64(y)));
        }
        match &mut object.shape {
            ObjectShape::Polygon { points: slot } | ObjectShape::Polyline { points: slot } => {
                *slot = points;
            }
            _ => {}
        }
    }

    fn text_attribute(&mut self, name: &str, value: &str) {
        let Some(Object {
            shape: ObjectShape::Text(text),
            ..
        }) = self.object.as_mut()
        else {
            return;
        };
        match name {
            "fontfamily" => text.font_family = value.to_owned(),
            "pixelsize" => text.pixel_size = parse_u32(value),
            "wrap" => text.wrap = parse_bool(value),
            "color" => text.color = Color::from_hex(value),
            "bold" => text.bold = parse_bool(value),
            "italic" => text.italic = parse_bool(value),
            "underline" => text.underline = parse_bool(value),
            "strikeout" => text.strikeout = parse_bool(value),
            "kerning" => text.kerning = parse_bool(value),
            "halign" => {
                text.halign = match value {
                    "center" => HorizontalAlign::Center,
                    "right" => HorizontalAlign::Right,
                    "justify" => HorizontalAlign::Justify,
                    _ => HorizontalAlign::Left,
                };
            }
            "valign" => {
                text.valign = match value {
                    "center" => VerticalAlign::Center,
                    "bottom" => VerticalAlign::Bottom,
                    _ => VerticalAlign::Top,
                };
            }
            _ => {}
        }
    }

    fn layer_common_attribute(&mut self, name: &str, value: &str) {
        let Some(layer) = self
            .layer
            .as_mut()
            .or_else(|| self.group_stack.last_mut())
        else {
            return;
        };
        match name {
            "id" => layer.id = parse_u32(value),
            "name" => layer.name = value.to_owned(),
            "class" => layer.class = value.to_owned(),
            "opacity" => layer.opacity = parse_f64(value),
            "visible" => layer.visible = parse_bool(value),
            "tintcolor" => layer.tint_color = Some(Color::from_hex(value)),
            "offsetx" => layer.offset_x = parse_i32(value),
            "offsety" => layer.offset_y = parse_i32(value),
            "parallaxx" => layer.parallax_x = parse_f64(value),
            "parallaxy" => layer.parallax_y = parse_f64(value),
            _ => {}
        }
    }

    fn current_tile_layer(&mut self) -> Option<&mut TileLayer> {
        match self.layer.as_mut().map(|l| &mut l.kind) {
            Some(LayerKind::Tile(tile_layer)) => Some(tile_layer),
            _ => None,
        }
    }

    // ---- element end -----------------------------------------------------

    fn element_end(&mut self, parser: &Parser) {
        let tag = parser.tag().unwrap_or("").to_owned();
        match tag.as_str() {
            "properties" => self.end_properties(),
            "property" => self.end_property(parser),
            "tileset" => self.end_tileset(),
            "image" => self.image_host = ImageHost::None,
            "animation" => {
                if self.in_animation {
                    if let Some(tile) = self.tileset_tile.as_mut() {
                        tile.animation = Some(crate::model::Animation {
                            frames: mem::take(&mut self.frames),
                        });
                    }
                    self.in_animation = false;
                }
            }
            "frame" => {
                if let Some(frame) = self.frame.take() {
                    self.frames.push(frame);
                }
            }
            "layer" => self.end_tile_layer(),
            "tile" => self.end_tileset_tile(),
            "data" => self.end_data(parser),
            "objectgroup" => self.end_object_group(),
            "object" => self.end_object(),
            "text" => {
                if let Some(Object {
                    shape: ObjectShape::Text(text),
                    ..
                }) = self.object.as_mut()
                {
                    if let Some(content) = parser.content() {
                        text.content = content.to_owned();
                    }
                    if text.font_family.is_empty() {
                        text.font_family = "sans-serif".to_owned();
                    }
                }
            }
            "imagelayer" => {
                if let Some(layer) = self.layer.take() {
                    self.attach_layer(layer);
                }
            }
            "group" => {
                // Groups nest; the closed one becomes a child of its parent
                // group, or a root layer.
                if let Some(group) = self.group_stack.pop() {
                    self.attach_layer(group);
                }
            }
            _ => {}
        }
    }

    fn end_properties(&mut self) {
        self.properties_depth = self.properties_depth.saturating_sub(1);
        if self.properties_depth > 0 || self.properties.is_empty() {
            return;
        }
        let properties = mem::take(&mut self.properties);
        // Attach to the innermost open record. Objects nest inside layers
        // and tiles nest inside tilesets, so the order matters.
        let target = if let Some(object) = self.object.as_mut() {
            &mut object.properties
        } else if let Some(tile) = self.tileset_tile.as_mut() {
            &mut tile.properties
        } else if let Some(tileset) = self.tileset.as_mut() {
            &mut tileset.properties
        } else if let Some(layer) = self.layer.as_mut().or_else(|| self.group_stack.last_mut()) {
            &mut layer.properties
        } else {
            &mut self.map.properties
        };
        target.extend(properties);
    }

    fn end_property(&mut self, parser: &Parser) {
        let Some(staged) = self.property.take() else {
            return;
        };
        let raw = staged.raw;
        let value = match staged.kind {
            PropertyType::String => {
                // Multi-line strings are written as element content instead
                // of a value attribute.
                let text = raw
                    .or_else(|| parser.content().map(str::to_owned))
                    .unwrap_or_default();
                PropertyValue::String(text)
            }
            PropertyType::Int => {
                PropertyValue::Int(raw.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0))
            }
            PropertyType::Object => {
                PropertyValue::Object(raw.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0))
            }
            PropertyType::Float => {
                PropertyValue::Float(raw.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0.0))
            }
            PropertyType::Bool => PropertyValue::Bool(raw.as_deref() == Some("true")),
            PropertyType::Color => PropertyValue::Color(
                raw.as_deref().map_or(Color::BLANK, Color::from_hex),
            ),
            PropertyType::File => PropertyValue::File(raw.unwrap_or_else(|| ".".to_owned())),
        };
        self.properties.push(Property {
            name: staged.name,
            value,
        });
    }

    fn end_tileset(&mut self) {
        let Some(mut tileset) = self.tileset.take() else {
            return;
        };
        if tileset.object_alignment == ObjectAlignment::Unspecified {
            // The default alignment depends on the map's orientation.
            tileset.object_alignment = match self.map.orientation {
                Orientation::Orthogonal => ObjectAlignment::BottomLeft,
                Orientation::Isometric => ObjectAlignment::Bottom,
                _ => ObjectAlignment::Unspecified,
            };
        }
        if !self.tileset_tiles.is_empty() {
            tileset.tiles = mem::take(&mut self.tileset_tiles);
        }
        self.tilesets.push(tileset);
    }

    fn end_tileset_tile(&mut self) {
        let Some(mut tile) = self.tileset_tile.take() else {
            return;
        };
        if let Some(image) = &tile.image {
            // Width and height default to the tile's own image size.
            if tile.width == 0 {
                tile.width = image.width;
            }
            if tile.height == 0 {
                tile.height = image.height;
            }
        }
        self.tileset_tiles.push(tile);
    }

    fn end_tile_layer(&mut self) {
        let Some(mut layer) = self.layer.take() else {
            return;
        };
        if let LayerKind::Tile(tile_layer) = &mut layer.kind {
            tile_layer.tiles = mem::take(&mut self.layer_gids);
        }
        self.attach_layer(layer);
    }

    fn end_data(&mut self, parser: &Parser) {
        if self.image_host != ImageHost::None {
            // <image><data> is mentioned by the format but produced by no
            // known writer.
            return;
        }
        let layer_name = self
            .layer
            .as_ref()
            .map(|l| l.name.clone())
            .unwrap_or_default();
        let content = parser.content().unwrap_or("").to_owned();
        let had_tiles = !self.layer_gids.is_empty();
        let Some(tile_layer) = self.current_tile_layer() else {
            return;
        };
        let encoding = tile_layer.encoding.clone();
        let compression = tile_layer.compression.clone();
        match encoding.as_deref() {
            None => {
                // Plain format: the GIDs arrived one-by-one as <tile>
                // children and are already staged.
                self.data_decoded = true;
            }
            Some(_) if self.data_decoded || had_tiles => {
                tracing::warn!(
                    "layer \"{layer_name}\" has more than one source of tile data - the latter \
                     tiles for this layer will be dropped"
                );
            }
            Some("csv") => {
                self.layer_gids = data::decode_csv(&content);
                self.data_decoded = true;
            }
            Some("base64") => match data::decode_base64(&content, compression.as_deref()) {
                Ok(gids) => {
                    self.layer_gids = gids;
                    self.data_decoded = true;
                }
                Err(e) => {
                    // Layer-scoped: this layer stays empty, the rest of the
                    // document still loads.
                    tracing::warn!("layer \"{layer_name}\" tile data cannot be decoded: {e}");
                }
            },
            Some(other) => {
                tracing::warn!(
                    "layer \"{layer_name}\" uses unsupported encoding \"{other}\"; the layer's \
                     tiles are dropped"
                );
            }
        }
    }

    fn end_object_group(&mut self) {
        let Some(mut group) = self.object_group.take() else {
            return;
        };
        group.objects = mem::take(&mut self.objects);
        match self.group_host {
            GroupHost::TilesetTile => {
                if let Some(tile) = self.tileset_tile.as_mut() {
                    tile.object_group = Some(group);
                }
            }
            GroupHost::Layer => {
                if let Some(mut layer) = self.layer.take() {
                    layer.kind = LayerKind::Objects(group);
                    self.attach_layer(layer);
                }
            }
        }
        self.group_host = GroupHost::Layer;
    }

    fn end_object(&mut self) {
        let Some(mut object) = self.object.take() else {
            return;
        };
        if let Some(template) = object.template.clone() {
            self.apply_template(&mut object, &template);
        }
        object.aabb = compute_aabb(&object);
        if self.object_group.is_some() {
            self.objects.push(object);
        } else {
            self.root_objects.push(object);
        }
    }

    /// Fill in everything the instance did not set from its template, and
    /// union the property lists with the instance winning name collisions.
    fn apply_template(&mut self, object: &mut Object, template: &str) {
        let Some(loaded) = self.ctx.load_template(&self.dir, template) else {
            tracing::warn!("unable to apply template to object ID {}", object.id);
            return;
        };
        let seen = self.object_seen;
        let source = &loaded.object;
        if !seen.name {
            object.name = source.name.clone();
        }
        if !seen.class {
            object.class = source.class.clone();
        }
        if !seen.x {
            object.x = source.x;
        }
        if !seen.y {
            object.y = source.y;
        }
        if !seen.width {
            object.width = source.width;
        }
        if !seen.height {
            object.height = source.height;
        }
        if !seen.rotation {
            object.rotation = source.rotation;
        }
        if !seen.visible {
            object.visible = source.visible;
        }
        if !seen.shape {
            object.shape = source.shape.clone();
        }
        for inherited in &source.properties {
            if object.property(&inherited.name).is_none() {
                object.properties.push(inherited.clone());
            }
        }
        // A template may bring its own tileset (for tile objects); adopt it
        // unless an equivalent one is already present.
        if let Some(template_tileset) = &loaded.tileset {
            let already_known = self.tilesets.iter().any(|existing| {
                (!existing.name.is_empty() && existing.name == template_tileset.name)
                    || (existing.source.is_some() && existing.source == template_tileset.source)
            });
            if !already_known {
                self.tilesets.push(template_tileset.clone());
            }
        }
    }

    fn attach_layer(&mut self, layer: Layer) {
        match self.group_stack.last_mut() {
            Some(group) => {
                if let LayerKind::Group(children) = &mut group.kind {
                    children.push(layer);
                }
            }
            None => self.root_layers.push(layer),
        }
    }
}

fn compute_aabb(object: &Object) -> Option<Rect> {
    match &object.shape {
        ObjectShape::Rectangle | ObjectShape::Ellipse | ObjectShape::Text(_) => Some(Rect {
            x: object.x as f32,
            y: object.y as f32,
            width: object.width as f32,
            height: object.height as f32,
        }),
        ObjectShape::Point => Some(Rect {
            x: object.x as f32,
            y: object.y as f32,
            width: 0.0,
            height: 0.0,
        }),
        ObjectShape::Polygon { points } | ObjectShape::Polyline { points } => {
            if points.is_empty() {
                return None;
            }
            let mut min = (f64::INFINITY, f64::INFINITY);
            let mut max = (f64::NEG_INFINITY, f64::NEG_INFINITY);
            for &(x, y) in points {
                min.0 = min.0.min(x);
                min.1 = min.1.min(y);
                max.0 = max.0.max(x);
                max.1 = max.1.max(y);
            }
            // Vertices are relative to the object's position; the box is
            // absolute.
            Some(Rect {
                x: (min.0 + object.x) as f32,
                y: (min.1 + object.y) as f32,
                width: (max.0 - min.0) as f32,
                height: (max.1 - min.1) as f32,
            })
        }
        // Tile objects take their size from the referenced tile, which may
        // come from a collection-of-images tileset; no box can be computed.
        ObjectShape::Tile { .. } => None,
    }
}

fn parse_u32(value: &str) -> u32 {
    value.trim().parse().unwrap_or(0)
}

fn parse_i32(value: &str) -> i32 {
    value.trim().parse().unwrap_or(0)
}

fn parse_f64(value: &str) -> f64 {
    value.trim().parse().unwrap_or(0.0)
}

fn parse_bool(value: &str) -> bool {
    parse_i32(value) != 0
}

/// Resolve a reference written in a document against that document's
/// directory, dropping a leading `./`.
pub(crate) fn resolve_reference(dir: &Path, reference: &str) -> PathBuf {
    let reference = reference.strip_prefix("./").unwrap_or(reference);
    dir.join(reference)
}
