//! End-to-end tests through the public load API, with documents written to
//! a temporary directory the way an editor would lay them out on disk.

use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use tilemx::prelude::*;

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

const TERRAIN_TSX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tileset name="terrain" tilewidth="16" tileheight="16" tilecount="4" columns="2">
 <image source="terrain.png" width="33" height="33"/>
</tileset>
"#;

#[test]
fn full_map_loads_with_external_tileset_and_csv_layer() {
    let dir = tempdir().unwrap();
    write(dir.path(), "terrain.tsx", TERRAIN_TSX);
    let map_path = write(
        dir.path(),
        "level.tmx",
        r##"<?xml version="1.0" encoding="UTF-8"?>
<map version="1.10" orientation="orthogonal" renderorder="right-down"
     width="2" height="2" tilewidth="16" tileheight="16" backgroundcolor="#402030">
 <properties>
  <property name="music" value="overworld.ogg" type="file"/>
  <property name="darkness" type="float" value="0.25"/>
 </properties>
 <tileset firstgid="1" source="terrain.tsx"/>
 <layer id="1" name="ground" width="2" height="2">
  <data encoding="csv">
1,2,
3,4
  </data>
 </layer>
 <objectgroup id="2" name="things">
  <object id="7" name="spawn" x="8" y="12"><point/></object>
  <object id="8" name="zone" x="0" y="0" width="32" height="16"/>
 </objectgroup>
</map>
"##,
    );

    let map = load_map(&map_path).unwrap();
    assert_eq!(map.width, 2);
    assert_eq!(map.height, 2);
    assert_eq!(map.tile_width, 16);
    assert!(map.background_color.is_some());

    // The external tileset merged in, keeping the local firstgid and source.
    assert_eq!(map.tilesets.len(), 1);
    let tileset = &map.tilesets[0];
    assert_eq!(tileset.name, "terrain");
    assert_eq!(tileset.first_gid, 1);
    assert_eq!(tileset.source.as_deref(), Some("terrain.tsx"));
    assert_eq!(tileset.tile_count, 4);
    assert!(tileset.image.is_some());

    // Map properties, typed.
    assert_eq!(map.properties.len(), 2);
    assert_eq!(
        map.properties[0].value,
        PropertyValue::File("overworld.ogg".to_owned())
    );
    assert_eq!(map.properties[1].value, PropertyValue::Float(0.25));

    // The CSV layer decoded to a dense width x height array.
    let ground = map.layers[0].as_tile_layer().unwrap();
    assert_eq!(ground.tiles, vec![1, 2, 3, 4]);
    assert_eq!(
        ground.tiles.len() as u32,
        ground.width * ground.height
    );

    // Objects with defaults and shapes.
    let things = map.layers[1].as_object_group().unwrap();
    assert_eq!(things.objects.len(), 2);
    assert!(matches!(things.objects[0].shape, ObjectShape::Point));
    assert!(things.objects[0].visible);
    assert!(matches!(things.objects[1].shape, ObjectShape::Rectangle));

    // GID table: one entry per GID plus the sentinel.
    assert_eq!(map.tiles.len(), 5);
    assert!(map.tile(0).is_none());
    for gid in 1..=4 {
        assert_eq!(map.tile(gid).unwrap().gid, gid);
    }
    // Tile 4 sits at column 1, row 1 of the shared image.
    let last = map.tile(4).unwrap();
    assert_eq!(last.source_rect.x, 16.0);
    assert_eq!(last.source_rect.y, 16.0);
}

#[test]
fn decoder_equivalence_across_payload_encodings() {
    let gids: [u32; 4] = [1, 2, 3, 4];
    let mut bytes = Vec::new();
    for gid in gids {
        bytes.extend_from_slice(&gid.to_le_bytes());
    }
    let raw = BASE64.encode(&bytes);
    let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
    zlib.write_all(&bytes).unwrap();
    let zlib = BASE64.encode(zlib.finish().unwrap());
    let mut gzip = GzEncoder::new(Vec::new(), Compression::default());
    gzip.write_all(&bytes).unwrap();
    let gzip = BASE64.encode(gzip.finish().unwrap());

    let variants = [
        ("csv.tmx", "<data encoding=\"csv\">1,2,3,4</data>".to_owned()),
        (
            "plain.tmx",
            "<data><tile gid=\"1\"/><tile gid=\"2\"/><tile gid=\"3\"/><tile gid=\"4\"/></data>"
                .to_owned(),
        ),
        ("raw.tmx", format!("<data encoding=\"base64\">{raw}</data>")),
        (
            "zlib.tmx",
            format!("<data encoding=\"base64\" compression=\"zlib\">{zlib}</data>"),
        ),
        (
            "gzip.tmx",
            format!("<data encoding=\"base64\" compression=\"gzip\">{gzip}</data>"),
        ),
    ];

    let dir = tempdir().unwrap();
    for (file, data) in variants {
        let path = write(
            dir.path(),
            file,
            &format!(
                r#"<map width="2" height="2" tilewidth="8" tileheight="8">
 <layer name="l" width="2" height="2">{data}</layer>
</map>"#
            ),
        );
        let map = load_map(&path).unwrap();
        let layer = map.layers[0].as_tile_layer().unwrap();
        assert_eq!(layer.tiles, gids.to_vec(), "{file}");
    }
}

#[test]
fn bad_compression_stream_is_layer_scoped() {
    let dir = tempdir().unwrap();
    // Valid Base64, but not a zlib stream.
    let bogus = BASE64.encode(b"definitely not deflate");
    let path = write(
        dir.path(),
        "broken.tmx",
        &format!(
            r#"<map width="1" height="1" tilewidth="8" tileheight="8">
 <layer name="broken" width="1" height="1">
  <data encoding="base64" compression="zlib">{bogus}</data>
 </layer>
 <layer name="fine" width="1" height="1"><data encoding="csv">1</data></layer>
</map>"#
        ),
    );
    let map = load_map(&path).unwrap();
    // The broken layer is empty; the rest of the document still loaded.
    assert!(map.layers[0].as_tile_layer().unwrap().tiles.is_empty());
    assert_eq!(map.layers[1].as_tile_layer().unwrap().tiles, vec![1]);
}

#[test]
fn unsupported_compression_name_is_layer_scoped() {
    let dir = tempdir().unwrap();
    let payload = BASE64.encode(1u32.to_le_bytes());
    let path = write(
        dir.path(),
        "zstd.tmx",
        &format!(
            r#"<map width="1" height="1" tilewidth="8" tileheight="8">
 <layer name="l" width="1" height="1">
  <data encoding="base64" compression="zstd">{payload}</data>
 </layer>
</map>"#
        ),
    );
    let map = load_map(&path).unwrap();
    assert!(map.layers[0].as_tile_layer().unwrap().tiles.is_empty());
}

#[test]
fn template_properties_and_scalars_merge_with_instance_precedence() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "cactus.tx",
        r#"<?xml version="1.0" encoding="UTF-8"?>
<template>
 <object name="cactus" type="decor" y="7" width="16" height="20" rotation="45">
  <properties>
   <property name="hp" type="int" value="10"/>
   <property name="prickly" type="bool" value="true"/>
  </properties>
 </object>
</template>
"#,
    );
    let path = write(
        dir.path(),
        "desert.tmx",
        r#"<map width="1" height="1" tilewidth="8" tileheight="8">
 <objectgroup name="objects">
  <object id="1" template="cactus.tx" x="5" y="0">
   <properties><property name="hp" type="int" value="5"/></properties>
  </object>
 </objectgroup>
</map>"#,
    );
    let map = load_map(&path).unwrap();
    let object = &map.layers[0].as_object_group().unwrap().objects[0];

    // Scalars the instance never wrote come from the template.
    assert_eq!(object.name, "cactus");
    assert_eq!(object.class, "decor");
    assert_eq!(object.width, 16.0);
    assert_eq!(object.height, 20.0);
    assert_eq!(object.rotation, 45.0);
    // The instance wrote x=5 and an explicit y=0; both survive, even though
    // zero is the default value.
    assert_eq!(object.x, 5.0);
    assert_eq!(object.y, 0.0);

    // Properties union, instance winning on name collision.
    assert_eq!(
        object.property("hp").unwrap().value,
        PropertyValue::Int(5)
    );
    assert_eq!(
        object.property("prickly").unwrap().value,
        PropertyValue::Bool(true)
    );
}

#[test]
fn templates_and_tilesets_are_parsed_once_per_load() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "box.tx",
        r#"<template><object name="box" width="4" height="4"/></template>"#,
    );
    let path = write(
        dir.path(),
        "boxes.tmx",
        r#"<map width="1" height="1" tilewidth="8" tileheight="8">
 <objectgroup name="a">
  <object id="1" template="box.tx" x="1"/>
  <object id="2" template="box.tx" x="2"/>
 </objectgroup>
</map>"#,
    );
    // Observable through the filesystem: deleting the template after load
    // would be flaky, so instead count texture-loader calls for the same
    // trick on images below, and assert the template applied to both.
    let map = load_map(&path).unwrap();
    let objects = &map.layers[0].as_object_group().unwrap().objects;
    assert_eq!(objects.len(), 2);
    assert!(objects.iter().all(|o| o.name == "box" && o.width == 4.0));
}

#[test]
fn texture_loader_is_called_once_per_distinct_image() {
    let dir = tempdir().unwrap();
    write(dir.path(), "terrain.tsx", TERRAIN_TSX);
    // Two tilesets referencing the same TSX (hence the same image), plus the
    // map itself referencing it again.
    let path = write(
        dir.path(),
        "level.tmx",
        r#"<map width="1" height="1" tilewidth="16" tileheight="16">
 <tileset firstgid="1" source="terrain.tsx"/>
 <imagelayer name="backdrop"><image source="terrain.png" width="33" height="33"/></imagelayer>
 <layer name="l" width="1" height="1"><data encoding="csv">1</data></layer>
</map>"#,
    );

    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&calls);
    let options = LoadOptions::new().with_texture_loader(move |path| {
        seen.lock().unwrap().push(path.to_path_buf());
        Some(TextureHandle(1234))
    });
    let map = load_map_with(&path, options).unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1, "calls: {calls:?}");
    assert!(calls[0].ends_with("terrain.png"));
    assert_eq!(
        map.tilesets[0].image.as_ref().unwrap().texture,
        Some(TextureHandle(1234))
    );
    assert_eq!(map.tile(1).unwrap().texture, Some(TextureHandle(1234)));
}

#[test]
fn failed_texture_load_leaves_the_handle_empty_but_loads_the_map() {
    let dir = tempdir().unwrap();
    write(dir.path(), "terrain.tsx", TERRAIN_TSX);
    let path = write(
        dir.path(),
        "level.tmx",
        r#"<map width="1" height="1" tilewidth="16" tileheight="16">
 <tileset firstgid="1" source="terrain.tsx"/>
 <layer name="l" width="1" height="1"><data encoding="csv">1</data></layer>
</map>"#,
    );
    let options = LoadOptions::new().with_texture_loader(|_| None);
    let map = load_map_with(&path, options).unwrap();
    assert_eq!(map.tilesets[0].image.as_ref().unwrap().texture, None);
    assert_eq!(map.tile(1).unwrap().texture, None);
}

#[test]
fn nested_groups_form_a_tree() {
    let dir = tempdir().unwrap();
    let path = write(
        dir.path(),
        "groups.tmx",
        r#"<map width="1" height="1" tilewidth="8" tileheight="8">
 <group name="outer" opacity="0.5">
  <layer name="inner-tiles" width="1" height="1"><data encoding="csv">0</data></layer>
  <group name="middle">
   <imagelayer name="deep"><image source="bg.png" width="8" height="8"/></imagelayer>
  </group>
 </group>
 <layer name="top" width="1" height="1"><data encoding="csv">0</data></layer>
</map>"#,
    );
    let map = load_map(&path).unwrap();
    assert_eq!(map.layers.len(), 2);
    let outer = &map.layers[0];
    assert_eq!(outer.name, "outer");
    assert_eq!(outer.opacity, 0.5);
    let children = outer.children().unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].name, "inner-tiles");
    let middle = children[1].children().unwrap();
    assert_eq!(middle.len(), 1);
    assert_eq!(middle[0].name, "deep");
    assert_eq!(map.layers[1].name, "top");
}

#[test]
fn tileset_tiles_carry_animation_and_collision_into_the_gid_table() {
    let dir = tempdir().unwrap();
    let path = write(
        dir.path(),
        "anim.tmx",
        r#"<map orientation="orthogonal" width="1" height="1" tilewidth="16" tileheight="16">
 <tileset firstgid="1" name="t" tilewidth="16" tileheight="16" tilecount="4" columns="2">
  <image source="t.png" width="32" height="32"/>
  <tile id="0">
   <animation>
    <frame tileid="0" duration="100"/>
    <frame tileid="1" duration="250"/>
   </animation>
  </tile>
  <tile id="1">
   <objectgroup>
    <object id="1" x="0" y="0" width="16" height="8"/>
   </objectgroup>
  </tile>
 </tileset>
 <layer name="l" width="1" height="1"><data encoding="csv">1</data></layer>
</map>"#,
    );
    let map = load_map(&path).unwrap();

    let animated = map.tile(1).unwrap();
    let animation = animated.animation.as_ref().unwrap();
    assert_eq!(animation.frames.len(), 2);
    assert_eq!(animation.frames[0].tile_id, 0);
    assert!((animation.frames[1].duration - 0.25).abs() < 1e-6);
    // Animated entries store the tileset's first GID for frame rebasing.
    assert_eq!(animated.gid, 1);

    let solid = map.tile(2).unwrap();
    let group = solid.object_group.as_ref().unwrap();
    assert_eq!(group.objects.len(), 1);
    assert_eq!(group.objects[0].aabb.unwrap().width, 16.0);
}

#[test]
fn polygon_objects_keep_relative_points_and_get_an_aabb() {
    let dir = tempdir().unwrap();
    let path = write(
        dir.path(),
        "poly.tmx",
        r#"<map width="1" height="1" tilewidth="8" tileheight="8">
 <objectgroup name="shapes">
  <object id="1" x="10" y="20">
   <polygon points="0,0 16,-8 32,4"/>
  </object>
 </objectgroup>
</map>"#,
    );
    let map = load_map(&path).unwrap();
    let object = &map.layers[0].as_object_group().unwrap().objects[0];
    let ObjectShape::Polygon { points } = &object.shape else {
        panic!("expected a polygon");
    };
    assert_eq!(points, &vec![(0.0, 0.0), (16.0, -8.0), (32.0, 4.0)]);
    let aabb = object.aabb.unwrap();
    assert_eq!(aabb.x, 10.0);
    assert_eq!(aabb.y, 12.0);
    assert_eq!(aabb.width, 32.0);
    assert_eq!(aabb.height, 12.0);
}

#[test]
fn mismatched_close_tag_fails_the_load() {
    let dir = tempdir().unwrap();
    let path = write(dir.path(), "bad.tmx", "<map><layer></map></layer>");
    match load_map(&path) {
        Err(Error::TagMismatch { .. }) => {}
        other => panic!("expected a tag mismatch, got {other:?}"),
    }
}

#[test]
fn truncated_document_fails_the_load() {
    let dir = tempdir().unwrap();
    let path = write(dir.path(), "cut.tmx", "<map width=\"4\"><layer");
    assert!(matches!(load_map(&path), Err(Error::UnexpectedEof)));
}

#[test]
fn utf16le_document_loads_like_its_utf8_form() {
    let dir = tempdir().unwrap();
    let source = r#"<?xml version="1.0" encoding="UTF-16"?><map width="2" height="1" tilewidth="8" tileheight="8">
 <layer name="gröund" width="2" height="1"><data encoding="csv">1,2</data></layer>
</map>"#;
    let utf8_path = write(
        dir.path(),
        "plain.tmx",
        &source.replace(r#" encoding="UTF-16""#, ""),
    );
    let mut utf16: Vec<u8> = vec![0xFF, 0xFE];
    for unit in source.encode_utf16() {
        utf16.extend_from_slice(&unit.to_le_bytes());
    }
    let utf16_path = dir.path().join("wide.tmx");
    fs::write(&utf16_path, utf16).unwrap();

    let narrow = load_map(&utf8_path).unwrap();
    let wide = load_map(&utf16_path).unwrap();
    assert_eq!(narrow.layers[0].name, "gröund");
    assert_eq!(wide.layers[0].name, narrow.layers[0].name);
    assert_eq!(
        wide.layers[0].as_tile_layer().unwrap().tiles,
        narrow.layers[0].as_tile_layer().unwrap().tiles
    );
}

#[test]
fn tiny_parse_budget_produces_the_same_model() {
    let dir = tempdir().unwrap();
    write(dir.path(), "terrain.tsx", TERRAIN_TSX);
    let path = write(
        dir.path(),
        "level.tmx",
        r#"<map orientation="orthogonal" width="2" height="2" tilewidth="16" tileheight="16">
 <tileset firstgid="1" source="terrain.tsx"/>
 <layer name="ground" width="2" height="2"><data encoding="csv">1,2,3,4</data></layer>
</map>"#,
    );
    let comfortable = load_map(&path).unwrap();
    let cramped = load_map_with(&path, LoadOptions::new().with_parse_budget(1)).unwrap();
    // Serialize both; byte-identical JSON means identical models.
    assert_eq!(
        serde_json::to_string(&comfortable).unwrap(),
        serde_json::to_string(&cramped).unwrap()
    );
}

#[test]
fn second_data_block_is_dropped_with_the_first_kept() {
    let dir = tempdir().unwrap();
    let path = write(
        dir.path(),
        "double.tmx",
        r#"<map width="2" height="1" tilewidth="8" tileheight="8">
 <layer name="l" width="2" height="1">
  <data encoding="csv">1,2</data>
  <data encoding="csv">8,9</data>
 </layer>
</map>"#,
    );
    let map = load_map(&path).unwrap();
    assert_eq!(map.layers[0].as_tile_layer().unwrap().tiles, vec![1, 2]);
}

#[test]
fn external_tileset_without_a_tileset_is_an_error() {
    let dir = tempdir().unwrap();
    let path = write(dir.path(), "empty.tsx", "<notatileset/>");
    assert!(matches!(
        load_tileset(&path),
        Err(Error::MissingRoot {
            expected: "tileset",
            ..
        })
    ));
}

#[test]
fn standalone_template_load() {
    let dir = tempdir().unwrap();
    let path = write(
        dir.path(),
        "tree.tx",
        r#"<template>
 <tileset firstgid="1" name="flora" tilewidth="16" tileheight="16" tilecount="1" columns="1">
  <image source="flora.png" width="16" height="16"/>
 </tileset>
 <object name="tree" gid="1" width="16" height="16"/>
</template>"#,
    );
    let template = load_template(&path).unwrap();
    assert_eq!(template.object.name, "tree");
    assert!(matches!(
        template.object.shape,
        ObjectShape::Tile { gid: 1 }
    ));
    let tileset = template.tileset.unwrap();
    assert_eq!(tileset.name, "flora");
}

#[test]
fn summary_runs_over_a_loaded_map() {
    let dir = tempdir().unwrap();
    let path = write(
        dir.path(),
        "small.tmx",
        r#"<map width="1" height="1" tilewidth="8" tileheight="8">
 <layer name="l" width="1" height="1"><data encoding="csv">0</data></layer>
</map>"#,
    );
    let map = load_map(&path).unwrap();
    // Exercise both filter shapes; output goes to whatever subscriber the
    // test harness installed, if any.
    trace_map(&map, SummaryFilter::all());
    trace_map(&map, SummaryFilter::header_only());
}
