//! The load pipeline: file → parser → builder → resolver.
//!
//! A load call owns a [`LoadContext`] holding the options and the path-keyed
//! caches of textures, external tilesets, and object templates. External
//! references load recursively through the same pipeline, depth-first,
//! before the referencing load returns; the caches guarantee each document
//! is parsed at most once per top-level load.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::builder::{resolve_reference, Builder, BuiltDocument, DocumentKind};
use crate::error::{Error, Result};
use crate::model::{Map, Object, Rect, TextureHandle, Tile, Tileset};
use crate::xml::{parser::DEFAULT_BUDGET, ParseCode, Parser};

/// Smallest parse budget a load will start with; tiny configured budgets
/// still work, they just grow immediately.
const MIN_PARSE_BUDGET: usize = 256;

/// Callback resolving an image path to an opaque texture handle.
pub type TextureLoader = Box<dyn FnMut(&Path) -> Option<TextureHandle>>;

/// Configuration threaded through one load call.
pub struct LoadOptions {
    /// Resolves image paths to texture handles. When absent, every distinct
    /// image path is interned and assigned a fresh handle, so models load
    /// and compare fine without any rendering backend.
    pub texture_loader: Option<TextureLoader>,
    /// Initial memory budget of each document's parser. The budget grows by
    /// doubling whenever the parser asks for more.
    pub parse_budget: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            texture_loader: None,
            parse_budget: DEFAULT_BUDGET,
        }
    }
}

impl LoadOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `loader` for image lookups instead of the interning default.
    #[must_use]
    pub fn with_texture_loader(
        mut self,
        loader: impl FnMut(&Path) -> Option<TextureHandle> + 'static,
    ) -> Self {
        self.texture_loader = Some(Box::new(loader));
        self
    }

    /// Start each parser with `budget` bytes instead of the default.
    #[must_use]
    pub fn with_parse_budget(mut self, budget: usize) -> Self {
        self.parse_budget = budget;
        self
    }
}

/// A loaded TX object template: one object and, for tile objects, the
/// tileset the tile comes from.
#[derive(Debug, Clone, Default)]
pub struct ObjectTemplate {
    pub object: Object,
    pub tileset: Option<Tileset>,
}

/// Load a map document with default options.
///
/// # Errors
///
/// Returns the fatal parser conditions, IO errors, and
/// [`Error::UnexpectedEof`] for truncated documents. Recoverable
/// per-element problems are logged as warnings and never fail the load.
pub fn load_map<P: AsRef<Path>>(path: P) -> Result<Map> {
    load_map_with(path, LoadOptions::default())
}

/// Load a map document.
///
/// # Errors
///
/// See [`load_map`].
pub fn load_map_with<P: AsRef<Path>>(path: P, options: LoadOptions) -> Result<Map> {
    let path = path.as_ref();
    let mut ctx = LoadContext::new(options);
    let built = ctx.parse_document(path, DocumentKind::Map)?;
    let mut map = built.map;
    map.file_name = path.file_name().map(PathBuf::from).unwrap_or_default();
    if map.tilesets.is_empty() {
        tracing::warn!("the map does not contain any tilesets");
    }
    if map.layers.is_empty() {
        tracing::warn!("the map does not contain any layers");
    }
    build_gid_table(&mut map);
    Ok(map)
}

/// Load an external tileset (TSX) document with default options.
///
/// # Errors
///
/// As [`load_map`], plus [`Error::MissingRoot`] when the document defines
/// no tileset.
pub fn load_tileset<P: AsRef<Path>>(path: P) -> Result<Tileset> {
    load_tileset_with(path, LoadOptions::default())
}

/// Load an external tileset (TSX) document.
///
/// # Errors
///
/// See [`load_tileset`].
pub fn load_tileset_with<P: AsRef<Path>>(path: P, options: LoadOptions) -> Result<Tileset> {
    let path = path.as_ref();
    let mut ctx = LoadContext::new(options);
    let built = ctx.parse_document(path, DocumentKind::Tileset)?;
    built
        .map
        .tilesets
        .into_iter()
        .next()
        .ok_or_else(|| Error::MissingRoot {
            expected: "tileset",
            path: path.to_path_buf(),
        })
}

/// Load an object template (TX) document with default options.
///
/// # Errors
///
/// As [`load_map`], plus [`Error::MissingRoot`] when the document defines
/// no object.
pub fn load_template<P: AsRef<Path>>(path: P) -> Result<ObjectTemplate> {
    load_template_with(path, LoadOptions::default())
}

/// Load an object template (TX) document.
///
/// # Errors
///
/// See [`load_template`].
pub fn load_template_with<P: AsRef<Path>>(path: P, options: LoadOptions) -> Result<ObjectTemplate> {
    let path = path.as_ref();
    let mut ctx = LoadContext::new(options);
    ctx.template_document(path)
}

/// Per-load state: options plus the caches external references go through.
pub(crate) struct LoadContext {
    options: LoadOptions,
    textures: HashMap<PathBuf, Option<TextureHandle>>,
    tilesets: HashMap<PathBuf, Option<Tileset>>,
    templates: HashMap<PathBuf, Option<ObjectTemplate>>,
    /// Next handle for the interning default texture loader.
    next_handle: u64,
}

impl LoadContext {
    fn new(options: LoadOptions) -> Self {
        LoadContext {
            options,
            textures: HashMap::new(),
            tilesets: HashMap::new(),
            templates: HashMap::new(),
            next_handle: 1,
        }
    }

    /// Parse one document through the incremental parser, growing its
    /// budget on demand, and build the staging model from its events.
    fn parse_document(&mut self, path: &Path, kind: DocumentKind) -> Result<BuiltDocument> {
        let bytes = fs::read(path)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        let mut parser = Parser::with_budget(self.options.parse_budget.max(MIN_PARSE_BUDGET));
        let mut builder = Builder::new(kind, dir, self);
        loop {
            match parser.parse(&bytes)? {
                ParseCode::DocumentEnd => break,
                ParseCode::NeedMoreInput => {
                    // The whole file was handed over in one chunk, so there
                    // is no more input to supply.
                    return Err(Error::UnexpectedEof);
                }
                ParseCode::NeedMoreMemory => {
                    let budget = parser.budget();
                    tracing::debug!(
                        "growing the XML parse budget of {} to {} bytes",
                        path.display(),
                        budget * 2
                    );
                    parser.grow(budget * 2);
                }
                code => builder.handle(&parser, code)?,
            }
        }
        Ok(builder.finish())
    }

    fn template_document(&mut self, path: &Path) -> Result<ObjectTemplate> {
        let built = self.parse_document(path, DocumentKind::Template)?;
        let tileset = built.map.tilesets.into_iter().next();
        let object = built
            .objects
            .into_iter()
            .next()
            .ok_or_else(|| Error::MissingRoot {
                expected: "object",
                path: path.to_path_buf(),
            })?;
        Ok(ObjectTemplate { object, tileset })
    }

    /// Resolve and load a texture through the cache. Failures are warned
    /// about once and remembered.
    pub(crate) fn load_texture(&mut self, dir: &Path, source: &str) -> Option<TextureHandle> {
        let path = resolve_reference(dir, source);
        let key = cache_key(&path);
        if let Some(&cached) = self.textures.get(&key) {
            return cached;
        }
        let handle = match self.options.texture_loader.as_mut() {
            Some(loader) => {
                let handle = loader(&path);
                if handle.is_none() {
                    tracing::warn!("unable to load texture \"{}\"", path.display());
                }
                handle
            }
            None => {
                let handle = TextureHandle(self.next_handle);
                self.next_handle += 1;
                Some(handle)
            }
        };
        self.textures.insert(key, handle);
        handle
    }

    /// Load the external tileset a `<tileset source="...">` points at, at
    /// most once per top-level load.
    pub(crate) fn load_external_tileset(&mut self, dir: &Path, source: &str) -> Option<Tileset> {
        let path = resolve_reference(dir, source);
        let key = cache_key(&path);
        if let Some(cached) = self.tilesets.get(&key) {
            return cached.clone();
        }
        // Mark in-flight so a self-referencing document cannot recurse.
        self.tilesets.insert(key.clone(), None);
        let loaded = match self.parse_document(&path, DocumentKind::Tileset) {
            Ok(built) => {
                let tileset = built.map.tilesets.into_iter().next();
                if tileset.is_none() {
                    tracing::warn!(
                        "TSX file (external tileset) \"{}\" does not contain any tilesets",
                        path.display()
                    );
                }
                tileset
            }
            Err(e) => {
                tracing::warn!("unable to load external tileset \"{}\": {e}", path.display());
                None
            }
        };
        self.tilesets.insert(key, loaded.clone());
        loaded
    }

    /// Load the template an `<object template="...">` points at, at most
    /// once per top-level load.
    pub(crate) fn load_template(&mut self, dir: &Path, source: &str) -> Option<ObjectTemplate> {
        let path = resolve_reference(dir, source);
        let key = cache_key(&path);
        if let Some(cached) = self.templates.get(&key) {
            return cached.clone();
        }
        self.templates.insert(key.clone(), None);
        let loaded = match self.template_document(&path) {
            Ok(template) => Some(template),
            Err(e) => {
                tracing::warn!("unable to load template \"{}\": {e}", path.display());
                None
            }
        };
        self.templates.insert(key, loaded.clone());
        loaded
    }
}

fn cache_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Build the dense GID→tile table: one entry per GID across all tilesets,
/// index 0 left as the sentinel.
fn build_gid_table(map: &mut Map) {
    let table_len = map
        .tilesets
        .iter()
        .map(|tileset| tileset.last_gid() as usize + 1)
        .max()
        .unwrap_or(0);
    if table_len == 0 {
        return;
    }
    let mut tiles = vec![Tile::default(); table_len];

    for tileset in &map.tilesets {
        if let Some(shared_image) = &tileset.image {
            // Shared image: every tile index exists implicitly; explicit
            // entries contribute animations, source-rect overrides, and
            // collision shapes.
            let columns = tileset.columns.max(1);
            for id in 0..tileset.tile_count {
                let gid = tileset.first_gid + id;
                let Some(entry) = tiles.get_mut(gid as usize) else {
                    continue;
                };
                entry.gid = gid;
                let column = id % columns;
                let row = id / columns;
                let mut explicit_rect = false;
                if let Some(tile) = tileset.tiles.iter().find(|tile| tile.id == id) {
                    if let Some(animation) = &tile.animation {
                        entry.animation = Some(animation.clone());
                        // Frames name local tile ids; storing the first GID
                        // here lets a renderer rebase them by addition.
                        entry.gid = tileset.first_gid;
                    } else if tile.x != 0 || tile.y != 0 || tile.width != 0 || tile.height != 0 {
                        explicit_rect = true;
                        entry.source_rect = Rect {
                            x: tile.x as f32,
                            y: tile.y as f32,
                            width: tile.width as f32,
                            height: tile.height as f32,
                        };
                    }
                    entry.object_group = tile.object_group.clone();
                }
                if entry.animation.is_none() {
                    if !explicit_rect {
                        entry.source_rect = Rect {
                            x: (tileset.margin + column * tileset.tile_width
                                + column * tileset.spacing) as f32,
                            y: (tileset.margin + row * tileset.tile_height + row * tileset.spacing)
                                as f32,
                            width: tileset.tile_width as f32,
                            height: tileset.tile_height as f32,
                        };
                    }
                    entry.texture = shared_image.texture;
                    entry.offset_x = tileset.offset_x as f32;
                    entry.offset_y = tileset.offset_y as f32;
                }
            }
        } else {
            // Collection of images: only the explicit tiles exist, each with
            // its own image and rectangle.
            for tile in &tileset.tiles {
                let Some(image) = &tile.image else {
                    tracing::warn!(
                        "skipping tile {} of image collection tileset \"{}\" because it has \
                         no image",
                        tile.id,
                        tileset.name
                    );
                    continue;
                };
                let gid = tileset.first_gid + tile.id;
                let Some(entry) = tiles.get_mut(gid as usize) else {
                    continue;
                };
                entry.gid = gid;
                let width = if tile.width != 0 { tile.width } else { image.width };
                let height = if tile.height != 0 { tile.height } else { image.height };
                entry.source_rect = Rect {
                    x: tile.x as f32,
                    y: tile.y as f32,
                    width: width as f32,
                    height: height as f32,
                };
                entry.texture = image.texture;
            }
        }
    }

    map.tiles = tiles;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Animation, Frame, Image, TilesetTile};

    fn shared_tileset(first_gid: u32, count: u32, columns: u32) -> Tileset {
        Tileset {
            first_gid,
            tile_count: count,
            columns,
            tile_width: 16,
            tile_height: 16,
            image: Some(Image {
                texture: Some(TextureHandle(7)),
                ..Image::default()
            }),
            ..Tileset::default()
        }
    }

    #[test]
    fn adjacent_tilesets_resolve_without_gaps_or_overlaps() {
        let mut map = Map {
            tilesets: vec![shared_tileset(1, 4, 2), shared_tileset(5, 6, 3)],
            ..Map::default()
        };
        build_gid_table(&mut map);
        assert_eq!(map.tiles.len(), 11);
        // Every GID in [1, 10] resolves to exactly one tileset's tile.
        for gid in 1..=10u32 {
            let owners = map
                .tilesets
                .iter()
                .filter(|tileset| tileset.contains(gid))
                .count();
            assert_eq!(owners, 1, "gid {gid}");
            assert_eq!(map.tiles[gid as usize].gid, gid);
        }
        assert!(map.tile(0).is_none());
    }

    #[test]
    fn source_rects_use_margin_and_spacing() {
        let mut tileset = shared_tileset(1, 4, 2);
        tileset.margin = 2;
        tileset.spacing = 1;
        let mut map = Map {
            tilesets: vec![tileset],
            ..Map::default()
        };
        build_gid_table(&mut map);
        // Tile id 3 sits at column 1, row 1.
        let tile = map.tile(4).unwrap();
        assert_eq!(tile.source_rect.x, (2 + 16 + 1) as f32);
        assert_eq!(tile.source_rect.y, (2 + 16 + 1) as f32);
        assert_eq!(tile.source_rect.width, 16.0);
        assert_eq!(tile.source_rect.height, 16.0);
    }

    #[test]
    fn animated_tiles_store_the_first_gid_for_rebasing() {
        let mut tileset = shared_tileset(10, 2, 2);
        tileset.tiles = vec![TilesetTile {
            id: 1,
            animation: Some(Animation {
                frames: vec![Frame {
                    tile_id: 0,
                    duration: 0.1,
                }],
            }),
            ..TilesetTile::default()
        }];
        let mut map = Map {
            tilesets: vec![tileset],
            ..Map::default()
        };
        build_gid_table(&mut map);
        let animated = map.tile(11).unwrap();
        assert!(animated.animation.is_some());
        assert_eq!(animated.gid, 10);
        // Plain tiles still carry their own GID and a texture.
        let plain = map.tile(10).unwrap();
        assert_eq!(plain.gid, 10);
        assert_eq!(plain.texture, Some(TextureHandle(7)));
    }

    #[test]
    fn collection_tiles_default_to_their_image_bounds() {
        let tileset = Tileset {
            first_gid: 1,
            tiles: vec![TilesetTile {
                id: 2,
                image: Some(Image {
                    width: 24,
                    height: 32,
                    texture: Some(TextureHandle(9)),
                    ..Image::default()
                }),
                width: 24,
                height: 32,
                ..TilesetTile::default()
            }],
            ..Tileset::default()
        };
        let mut map = Map {
            tilesets: vec![tileset],
            ..Map::default()
        };
        build_gid_table(&mut map);
        assert_eq!(map.tiles.len(), 4);
        let tile = map.tile(3).unwrap();
        assert_eq!(tile.source_rect.width, 24.0);
        assert_eq!(tile.source_rect.height, 32.0);
        assert_eq!(tile.texture, Some(TextureHandle(9)));
    }
}
