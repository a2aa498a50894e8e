//! Human-readable summary of a loaded map, emitted through `tracing`.
//!
//! The counterpart of the original trace-log facility: a leveled dump of a
//! map's structure with a filter value suppressing categories of detail.
//! The filter travels with the call instead of living in process-global
//! state.

use crate::model::{Layer, LayerKind, Map, Object, ObjectShape, Orientation, Property, RenderOrder};

/// Which categories of detail [`trace_map`] should include.
#[derive(Debug, Clone, Copy)]
pub struct SummaryFilter {
    pub properties: bool,
    pub tilesets: bool,
    pub layers: bool,
    /// Per-tile GID counts of tile layers.
    pub tiles: bool,
    /// Objects of object layers.
    pub objects: bool,
}

impl Default for SummaryFilter {
    fn default() -> Self {
        SummaryFilter {
            properties: true,
            tilesets: true,
            layers: true,
            tiles: true,
            objects: true,
        }
    }
}

impl SummaryFilter {
    /// Everything included.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Only the map header: no tilesets, properties, or layers.
    #[must_use]
    pub fn header_only() -> Self {
        SummaryFilter {
            properties: false,
            tilesets: false,
            layers: false,
            tiles: false,
            objects: false,
        }
    }
}

/// Log a structural summary of `map` at info level.
pub fn trace_map(map: &Map, filter: SummaryFilter) {
    let orientation = match map.orientation {
        Orientation::None => "none",
        Orientation::Orthogonal => "orthogonal",
        Orientation::Isometric => "isometric",
        Orientation::Staggered => "staggered",
        Orientation::Hexagonal => "hexagonal",
    };
    let render_order = match map.render_order {
        RenderOrder::RightDown => "right-down",
        RenderOrder::RightUp => "right-up",
        RenderOrder::LeftDown => "left-down",
        RenderOrder::LeftUp => "left-up",
    };
    tracing::info!("map {:?}: orientation {orientation}, render order {render_order}", map.file_name);
    tracing::info!(
        "{}x{} tiles of {}x{} pixels, {} GID table entries",
        map.width,
        map.height,
        map.tile_width,
        map.tile_height,
        map.tiles.len()
    );
    if let Some(color) = map.background_color {
        tracing::info!(
            "background color: #{:02x}{:02x}{:02x}{:02x}",
            color.a,
            color.r,
            color.g,
            color.b
        );
    }

    if filter.tilesets {
        for tileset in &map.tilesets {
            tracing::info!(
                "tileset \"{}\": first GID {}, last GID {}, {} explicit tiles, {}",
                tileset.name,
                tileset.first_gid,
                tileset.last_gid(),
                tileset.tiles.len(),
                if tileset.image.is_some() {
                    "shared image"
                } else {
                    "collection of images"
                }
            );
            if filter.properties {
                trace_properties(&tileset.properties, 1);
            }
        }
    }
    if filter.properties {
        trace_properties(&map.properties, 0);
    }
    if filter.layers {
        trace_layers(&map.layers, &filter, 0);
    }
}

fn trace_properties(properties: &[Property], indent: usize) {
    let pad = Indent(indent);
    for property in properties {
        tracing::info!("{pad}property \"{}\" = {:?}", property.name, property.value);
    }
}

fn trace_layers(layers: &[Layer], filter: &SummaryFilter, indent: usize) {
    let pad = Indent(indent);
    for layer in layers {
        match &layer.kind {
            LayerKind::Tile(tile_layer) => {
                tracing::info!(
                    "{pad}tile layer \"{}\": {}x{}",
                    layer.name,
                    tile_layer.width,
                    tile_layer.height
                );
                if filter.tiles {
                    let placed = tile_layer.tiles.iter().filter(|&&gid| gid != 0).count();
                    tracing::info!("{pad}  {placed} of {} cells hold tiles", tile_layer.tiles.len());
                }
            }
            LayerKind::Objects(group) => {
                tracing::info!(
                    "{pad}object layer \"{}\": {} objects",
                    layer.name,
                    group.objects.len()
                );
                if filter.objects {
                    for object in &group.objects {
                        trace_object(object, indent + 1);
                    }
                }
            }
            LayerKind::Image(image_layer) => {
                tracing::info!(
                    "{pad}image layer \"{}\": {}",
                    layer.name,
                    image_layer
                        .image
                        .as_ref()
                        .map_or("<no image>", |image| image.source.as_str())
                );
            }
            LayerKind::Group(children) => {
                tracing::info!("{pad}group \"{}\": {} children", layer.name, children.len());
                trace_layers(children, filter, indent + 1);
            }
        }
        if filter.properties {
            trace_properties(&layer.properties, indent + 1);
        }
    }
}

fn trace_object(object: &Object, indent: usize) {
    let pad = Indent(indent);
    let shape = match &object.shape {
        ObjectShape::Rectangle => "rectangle",
        ObjectShape::Ellipse => "ellipse",
        ObjectShape::Point => "point",
        ObjectShape::Polygon { .. } => "polygon",
        ObjectShape::Polyline { .. } => "polyline",
        ObjectShape::Text(_) => "text",
        ObjectShape::Tile { .. } => "tile",
    };
    tracing::info!(
        "{pad}object {} \"{}\": {shape} at ({}, {})",
        object.id,
        object.name,
        object.x,
        object.y
    );
}

struct Indent(usize);

impl std::fmt::Display for Indent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for _ in 0..self.0 {
            f.write_str("  ")?;
        }
        Ok(())
    }
}
