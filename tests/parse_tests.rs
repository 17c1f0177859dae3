//! End-to-end tests over in-memory files: header validation, chunk dispatch,
//! BSP reconstruction, repair, pruning, and mesh extraction.

use std::io::Cursor;

use byteorder::{WriteBytesExt, LE};
use pof_core::{
    extract_mesh, sanitize, validate, BspNode, CancelToken, Category, ErrorRecorder, Model,
    ObjectId, ParseOutcome, Parser, Severity, TextureId, Texturing,
};

const ENDOFBRANCH: u32 = 0;
const DEFPOINTS: u32 = 1;
const TMAPPOLY: u32 = 3;
const BOUNDBOX: u32 = 5;

fn push_vec(buf: &mut Vec<u8>, v: [f32; 3]) {
    for f in v {
        buf.write_f32::<LE>(f).unwrap();
    }
}

fn push_string(buf: &mut Vec<u8>, s: &str) {
    buf.write_i32::<LE>(s.len() as i32).unwrap();
    buf.extend(s.as_bytes());
}

struct FileBuilder {
    buf: Vec<u8>,
}

impl FileBuilder {
    fn new(version: i32) -> FileBuilder {
        let mut buf = b"PSPO".to_vec();
        buf.write_i32::<LE>(version).unwrap();
        FileBuilder { buf }
    }

    fn chunk(mut self, id: &[u8; 4], payload: &[u8]) -> FileBuilder {
        self.buf.extend(id);
        self.buf.write_i32::<LE>(payload.len() as i32).unwrap();
        self.buf.extend(payload);
        self
    }

    fn parse(self) -> ParseOutcome {
        Parser::new(Cursor::new(self.buf), "test.pof").unwrap().parse()
    }

    fn parse_cancelled(self) -> ParseOutcome {
        let cancel = CancelToken::new();
        cancel.cancel();
        Parser::new(Cursor::new(self.buf), "test.pof")
            .unwrap()
            .with_cancel(cancel)
            .parse()
    }
}

/// OHDR payload for a version >= 2100 file.
fn ohdr(num_subobjects: u32) -> Vec<u8> {
    let mut buf = vec![];
    buf.write_f32::<LE>(10.0).unwrap(); // max radius
    buf.write_u32::<LE>(0).unwrap(); // flags
    buf.write_u32::<LE>(num_subobjects).unwrap();
    push_vec(&mut buf, [-10.0, -10.0, -10.0]);
    push_vec(&mut buf, [10.0, 10.0, 10.0]);
    buf.write_u32::<LE>(0).unwrap(); // detail levels
    buf.write_u32::<LE>(0).unwrap(); // debris pieces
    buf.write_f32::<LE>(1.0).unwrap(); // mass
    push_vec(&mut buf, [0.0, 0.0, 0.0]); // center of mass
    for row in [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]] {
        push_vec(&mut buf, row); // moment of inertia
    }
    buf.write_u32::<LE>(0).unwrap(); // cross sections
    buf.write_u32::<LE>(0).unwrap(); // lights
    buf
}

fn txtr(names: &[&str]) -> Vec<u8> {
    let mut buf = vec![];
    buf.write_u32::<LE>(names.len() as u32).unwrap();
    for name in names {
        push_string(&mut buf, name);
    }
    buf
}

/// OBJ2 payload wrapping a BSP stream.
fn obj2(id: u32, parent: u32, bsp: &[u8]) -> Vec<u8> {
    let mut buf = vec![];
    buf.write_u32::<LE>(id).unwrap();
    buf.write_f32::<LE>(2.0).unwrap(); // radius
    buf.write_u32::<LE>(parent).unwrap();
    push_vec(&mut buf, [0.0, 0.0, 0.0]); // offset
    push_vec(&mut buf, [0.0, 0.0, 0.0]); // geometric center
    push_vec(&mut buf, [-1.0, -1.0, -1.0]);
    push_vec(&mut buf, [1.0, 1.0, 1.0]);
    push_string(&mut buf, &format!("subobj{id}"));
    push_string(&mut buf, "");
    buf.write_i32::<LE>(-1).unwrap(); // movement kind
    buf.write_i32::<LE>(-1).unwrap(); // movement axis
    buf.write_i32::<LE>(0).unwrap(); // reserved
    buf.write_u32::<LE>(bsp.len() as u32).unwrap();
    buf.extend(bsp);
    buf
}

/// A BSP stream: DEFPOINTS over `verts` (one shared +Z normal each), then a
/// BOUNDBOX leaf holding one TMAPPOLY per `(texture slot, vertex ids, uvs)`.
fn bsp_stream(verts: &[[f32; 3]], polys: &[(u32, &[u16], &[(f32, f32)])]) -> Vec<u8> {
    let mut buf = vec![];

    buf.write_u32::<LE>(DEFPOINTS).unwrap();
    let size_at = buf.len();
    buf.write_u32::<LE>(0).unwrap();
    buf.write_u32::<LE>(verts.len() as u32).unwrap(); // n_verts
    buf.write_u32::<LE>(verts.len() as u32).unwrap(); // n_norms
    let data_off_at = buf.len();
    buf.write_u32::<LE>(0).unwrap();
    buf.extend(std::iter::repeat(1u8).take(verts.len()));
    let data_off = buf.len() as u32;
    buf[data_off_at..data_off_at + 4].copy_from_slice(&data_off.to_le_bytes());
    for &pos in verts {
        push_vec(&mut buf, pos);
        push_vec(&mut buf, [0.0, 0.0, 1.0]);
    }
    let size = buf.len() as u32;
    buf[size_at..size_at + 4].copy_from_slice(&size.to_le_bytes());

    buf.write_u32::<LE>(BOUNDBOX).unwrap();
    buf.write_u32::<LE>(8 + 24).unwrap();
    push_vec(&mut buf, [-1.0, -1.0, -1.0]);
    push_vec(&mut buf, [1.0, 1.0, 1.0]);

    for &(slot, ids, uvs) in polys {
        let poly_start = buf.len();
        buf.write_u32::<LE>(TMAPPOLY).unwrap();
        let poly_size_at = buf.len();
        buf.write_u32::<LE>(0).unwrap();
        push_vec(&mut buf, [0.0, 0.0, 1.0]); // normal
        push_vec(&mut buf, [0.0, 0.0, 0.0]); // center
        buf.write_f32::<LE>(1.0).unwrap(); // radius
        buf.write_u32::<LE>(ids.len() as u32).unwrap();
        buf.write_u32::<LE>(slot).unwrap();
        for (&id, &(u, v)) in ids.iter().zip(uvs) {
            buf.write_u16::<LE>(id).unwrap();
            buf.write_u16::<LE>(id).unwrap(); // normal index
            buf.write_f32::<LE>(u).unwrap();
            buf.write_f32::<LE>(v).unwrap();
        }
        let poly_size = (buf.len() - poly_start) as u32;
        buf[poly_size_at..poly_size_at + 4].copy_from_slice(&poly_size.to_le_bytes());
    }

    buf.write_u32::<LE>(ENDOFBRANCH).unwrap();
    buf.write_u32::<LE>(0).unwrap();
    buf
}

fn triangle_stream(slot: u32) -> Vec<u8> {
    bsp_stream(
        &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        &[(slot, &[0, 1, 2], &[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)])],
    )
}

fn finish(outcome: ParseOutcome) -> (Model, ErrorRecorder) {
    let mut recorder = outcome.recorder;
    let mut model = outcome.model.expect("expected a model");
    sanitize(&mut model, &mut recorder, &CancelToken::new());
    (model, recorder)
}

#[test]
fn wrong_magic_is_critical() {
    let mut buf = b"XXXX".to_vec();
    buf.write_i32::<LE>(2117).unwrap();
    let outcome = Parser::new(Cursor::new(buf), "bad.pof").unwrap().parse();
    assert!(outcome.model.is_none());
    assert_eq!(outcome.recorder.worst_severity(), Some(Severity::Critical));
}

#[test]
fn pre_1800_version_is_refused() {
    let outcome = FileBuilder::new(1799).chunk(b"OHDR", &ohdr(0)).parse();
    assert!(outcome.model.is_none());
    let critical = outcome
        .recorder
        .events()
        .iter()
        .find(|e| e.severity == Severity::Critical)
        .expect("expected a critical event");
    assert!(critical.message.contains("1799"));
}

#[test]
fn minimal_file_parses_without_errors() {
    let outcome = FileBuilder::new(2100).chunk(b"OHDR", &ohdr(0)).parse();
    let model = outcome.model.expect("expected a model");
    assert_eq!(model.sub_objects.len(), 0);
    assert!(!outcome.recorder.has_errors(Severity::Error));
}

#[test]
fn missing_header_is_critical() {
    let outcome = FileBuilder::new(2117).chunk(b"TXTR", &txtr(&["a"])).parse();
    assert!(outcome.model.is_none());
    assert_eq!(outcome.recorder.worst_severity(), Some(Severity::Critical));
}

#[test]
fn leaf_triangle_extracts_three_vertices() {
    let outcome = FileBuilder::new(2117)
        .chunk(b"OHDR", &ohdr(1))
        .chunk(b"TXTR", &txtr(&["hull"]))
        .chunk(b"OBJ2", &obj2(0, u32::MAX, &triangle_stream(0)))
        .parse();
    let (model, recorder) = finish(outcome);
    assert!(!recorder.has_errors(Severity::Error));

    let bsp = model.sub_objects[ObjectId(0)].bsp_data.as_ref().expect("tree should be parsed");
    match &bsp.tree {
        BspNode::Leaf { poly_list, .. } => assert_eq!(poly_list.len(), 1),
        other => panic!("expected a leaf, got {other:?}"),
    }

    let mesh = extract_mesh(bsp);
    assert_eq!(mesh.vertices.len(), 3);
    assert_eq!(mesh.index_buffers.len(), 1);
    assert_eq!(mesh.index_buffers[&Texturing::Texture(TextureId(0))], vec![0, 1, 2]);
}

#[test]
fn quad_fans_into_two_triangles() {
    let stream = bsp_stream(
        &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
        &[(0, &[0, 1, 2, 3], &[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)])],
    );
    let outcome = FileBuilder::new(2117)
        .chunk(b"OHDR", &ohdr(1))
        .chunk(b"TXTR", &txtr(&["hull"]))
        .chunk(b"OBJ2", &obj2(0, u32::MAX, &stream))
        .parse();
    let (model, _) = finish(outcome);

    let mesh = extract_mesh(model.sub_objects[ObjectId(0)].bsp_data.as_ref().unwrap());
    assert_eq!(mesh.vertices.len(), 4);
    assert_eq!(
        mesh.index_buffers[&Texturing::Texture(TextureId(0))],
        vec![0, 1, 2, 0, 2, 3]
    );
}

#[test]
fn dangling_parent_is_repaired() {
    let outcome = FileBuilder::new(2117)
        .chunk(b"OHDR", &ohdr(2))
        .chunk(b"TXTR", &txtr(&["hull"]))
        .chunk(b"OBJ2", &obj2(0, u32::MAX, &triangle_stream(0)))
        .chunk(b"OBJ2", &obj2(1, 42, &triangle_stream(0)))
        .parse();
    let (model, recorder) = finish(outcome);

    assert_eq!(model.sub_objects[ObjectId(1)].parent, None);
    let repairs = recorder
        .events()
        .iter()
        .filter(|e| e.severity == Severity::Warning && e.category == Category::DataIntegrity)
        .count();
    assert_eq!(repairs, 1);
}

#[test]
fn unreferenced_textures_are_pruned_and_remapped() {
    let stream = bsp_stream(
        &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        &[
            (0, &[0, 1, 2], &[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)]),
            (3, &[0, 2, 1], &[(0.0, 0.0), (0.0, 1.0), (1.0, 0.0)]),
        ],
    );
    let outcome = FileBuilder::new(2117)
        .chunk(b"OHDR", &ohdr(1))
        .chunk(b"TXTR", &txtr(&["a", "b", "c", "d"]))
        .chunk(b"OBJ2", &obj2(0, u32::MAX, &stream))
        .parse();
    let (model, _) = finish(outcome);

    // names gain the default extension during parsing
    assert_eq!(model.textures, vec!["a.dds".to_string(), "d.dds".to_string()]);

    let bsp = model.sub_objects[ObjectId(0)].bsp_data.as_ref().unwrap();
    let slots: Vec<_> = bsp.tree.leaves().flat_map(|(_, polys)| polys.iter().map(|p| p.texture)).collect();
    assert_eq!(slots, vec![Texturing::Texture(TextureId(0)), Texturing::Texture(TextureId(1))]);

    let mesh = extract_mesh(bsp);
    assert_eq!(mesh.index_buffers.len(), 2);
}

#[test]
fn validation_passes_on_a_clean_model() {
    let outcome = FileBuilder::new(2117)
        .chunk(b"OHDR", &ohdr(1))
        .chunk(b"TXTR", &txtr(&["hull"]))
        .chunk(b"OBJ2", &obj2(0, u32::MAX, &triangle_stream(0)))
        .parse();
    let (model, mut recorder) = finish(outcome);
    let report = validate(&model, &mut recorder);
    assert!(report.passed);
    assert_eq!(report.num_sub_objects, 1);
    assert_eq!(report.num_polygons, 1);
}

#[test]
fn subobject_count_mismatch_fails_validation() {
    let outcome = FileBuilder::new(2117)
        .chunk(b"OHDR", &ohdr(3))
        .chunk(b"TXTR", &txtr(&["hull"]))
        .chunk(b"OBJ2", &obj2(0, u32::MAX, &triangle_stream(0)))
        .parse();
    let (model, mut recorder) = finish(outcome);
    let report = validate(&model, &mut recorder);
    assert!(!report.passed);
    assert!(recorder.has_errors(Severity::Error));
}

#[test]
fn dangling_dock_path_fails_validation() {
    // one dock referencing path 3, no PATH chunk in the file
    let mut dock = vec![];
    dock.write_u32::<LE>(1).unwrap(); // dock count
    push_string(&mut dock, "$name=port");
    dock.write_u32::<LE>(1).unwrap(); // path count
    dock.write_u32::<LE>(3).unwrap(); // path id
    dock.write_u32::<LE>(1).unwrap(); // point count
    push_vec(&mut dock, [0.0, 0.0, 0.0]);
    push_vec(&mut dock, [0.0, 0.0, 1.0]);

    let outcome = FileBuilder::new(2117)
        .chunk(b"OHDR", &ohdr(1))
        .chunk(b"TXTR", &txtr(&["hull"]))
        .chunk(b"OBJ2", &obj2(0, u32::MAX, &triangle_stream(0)))
        .chunk(b"DOCK", &dock)
        .parse();
    let (model, mut recorder) = finish(outcome);
    let report = validate(&model, &mut recorder);
    assert!(!report.passed);
    assert!(recorder.has_errors(Severity::Error));
}

#[test]
fn unknown_chunk_is_skipped_with_a_warning() {
    let outcome = FileBuilder::new(2100)
        .chunk(b"ZZZZ", &[1, 2, 3, 4])
        .chunk(b"OHDR", &ohdr(0))
        .parse();
    assert!(outcome.model.is_some());
    assert!(outcome
        .recorder
        .events()
        .iter()
        .any(|e| e.severity == Severity::Warning && e.message.contains("unknown chunk")));
}

#[test]
fn duplicate_singleton_chunk_keeps_the_first() {
    let outcome = FileBuilder::new(2117)
        .chunk(b"OHDR", &ohdr(0))
        .chunk(b"TXTR", &txtr(&["first"]))
        .chunk(b"TXTR", &txtr(&["second", "third"]))
        .parse();
    let model = outcome.model.unwrap();
    assert_eq!(model.textures, vec!["first.dds".to_string()]);
    assert!(outcome.recorder.events().iter().any(|e| e.message.contains("duplicate")));
}

#[test]
fn unsupported_chunk_at_old_version_is_skipped() {
    // SLDC only exists from 2117 on
    let outcome = FileBuilder::new(2100)
        .chunk(b"OHDR", &ohdr(0))
        .chunk(b"SLDC", &[0, 0, 0, 0])
        .parse();
    let model = outcome.model.unwrap();
    assert!(model.shield_data.is_none());
    assert!(outcome
        .recorder
        .events()
        .iter()
        .any(|e| e.category == Category::Compatibility));
}

#[test]
fn truncated_chunk_records_an_error_but_keeps_the_model() {
    let mut builder = FileBuilder::new(2100).chunk(b"OHDR", &ohdr(0));
    // declare a chunk longer than the remaining bytes
    builder.buf.extend(b"SPCL");
    builder.buf.write_i32::<LE>(1000).unwrap();
    builder.buf.extend([0u8; 4]);
    let outcome = builder.parse();
    assert!(outcome.model.is_some());
    assert!(outcome.recorder.has_errors(Severity::Error));
}

#[test]
fn cancellation_discards_the_model() {
    let outcome = FileBuilder::new(2117)
        .chunk(b"OHDR", &ohdr(1))
        .chunk(b"OBJ2", &obj2(0, u32::MAX, &triangle_stream(0)))
        .parse_cancelled();
    assert!(outcome.model.is_none());
    assert_eq!(outcome.recorder.worst_severity(), Some(Severity::Critical));
}

#[test]
fn parse_sanitize_extract_is_deterministic() {
    let build = || {
        FileBuilder::new(2117)
            .chunk(b"OHDR", &ohdr(1))
            .chunk(b"TXTR", &txtr(&["a", "b"]))
            .chunk(b"OBJ2", &obj2(0, u32::MAX, &triangle_stream(1)))
            .parse()
    };
    let (model_a, _) = finish(build());
    let (model_b, _) = finish(build());
    let mesh_a = extract_mesh(model_a.sub_objects[ObjectId(0)].bsp_data.as_ref().unwrap());
    let mesh_b = extract_mesh(model_b.sub_objects[ObjectId(0)].bsp_data.as_ref().unwrap());
    assert_eq!(mesh_a, mesh_b);
    assert_eq!(model_a.textures, model_b.textures);
}

#[test]
fn shield_mesh_and_collision_tree_parse() {
    // SHLD: a single triangle
    let mut shld = vec![];
    shld.write_u32::<LE>(3).unwrap();
    for pos in [[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [0.0, 1.0, 1.0]] {
        push_vec(&mut shld, pos);
    }
    shld.write_u32::<LE>(1).unwrap();
    push_vec(&mut shld, [0.0, 0.0, 1.0]);
    for id in [0u32, 1, 2] {
        shld.write_u32::<LE>(id).unwrap();
    }
    for _ in 0..3 {
        shld.write_i32::<LE>(-1).unwrap();
    }

    // SLDC: a byte-buffer-wrapped stream with one BOUNDBOX leaf over the
    // shield's own vertex table
    let mut tree = vec![];
    tree.write_u32::<LE>(BOUNDBOX).unwrap();
    tree.write_u32::<LE>(8 + 24).unwrap();
    push_vec(&mut tree, [-1.0, -1.0, -1.0]);
    push_vec(&mut tree, [1.0, 1.0, 1.0]);
    let poly_start = tree.len();
    tree.write_u32::<LE>(TMAPPOLY).unwrap();
    let poly_size_at = tree.len();
    tree.write_u32::<LE>(0).unwrap();
    push_vec(&mut tree, [0.0, 0.0, 1.0]);
    push_vec(&mut tree, [0.3, 0.3, 1.0]);
    tree.write_f32::<LE>(1.0).unwrap();
    tree.write_u32::<LE>(3).unwrap();
    tree.write_u32::<LE>(0).unwrap();
    for id in [0u16, 1, 2] {
        tree.write_u16::<LE>(id).unwrap();
        tree.write_u16::<LE>(id).unwrap();
        tree.write_f32::<LE>(0.0).unwrap();
        tree.write_f32::<LE>(0.0).unwrap();
    }
    let poly_size = (tree.len() - poly_start) as u32;
    tree[poly_size_at..poly_size_at + 4].copy_from_slice(&poly_size.to_le_bytes());
    tree.write_u32::<LE>(ENDOFBRANCH).unwrap();
    tree.write_u32::<LE>(0).unwrap();

    let mut sldc = vec![];
    sldc.write_u32::<LE>(tree.len() as u32).unwrap();
    sldc.extend(&tree);

    let outcome = FileBuilder::new(2117)
        .chunk(b"OHDR", &ohdr(0))
        .chunk(b"SHLD", &shld)
        .chunk(b"SLDC", &sldc)
        .parse();
    let model = outcome.model.expect("expected a model");
    let shield = model.shield_data.as_ref().expect("expected shield data");
    assert_eq!(shield.verts.len(), 3);
    assert_eq!(shield.polygons.len(), 1);
    match shield.collision_tree.as_ref().expect("expected a collision tree") {
        BspNode::Leaf { poly_list, .. } => assert_eq!(poly_list.len(), 1),
        other => panic!("expected a leaf, got {other:?}"),
    }
    assert!(!outcome.recorder.has_errors(Severity::Error));
}

#[test]
fn metadata_chunks_round_into_the_model() {
    // SPCL with one named point
    let mut spcl = vec![];
    spcl.write_u32::<LE>(1).unwrap();
    push_string(&mut spcl, "$engine01");
    push_string(&mut spcl, "");
    push_vec(&mut spcl, [0.0, 0.0, -4.0]);
    spcl.write_f32::<LE>(0.5).unwrap();

    // PATH with one two-point path
    let mut path = vec![];
    path.write_u32::<LE>(1).unwrap();
    push_string(&mut path, "$path01");
    path.write_i32::<LE>(-1).unwrap();
    path.write_u32::<LE>(2).unwrap();
    for pos in [[0.0, 0.0, 5.0], [0.0, 0.0, 10.0]] {
        push_vec(&mut path, pos);
        path.write_f32::<LE>(1.0).unwrap();
    }

    // ACEN
    let mut acen = vec![];
    push_vec(&mut acen, [0.0, 1.0, 2.0]);

    let outcome = FileBuilder::new(2117)
        .chunk(b"OHDR", &ohdr(0))
        .chunk(b"SPCL", &spcl)
        .chunk(b"PATH", &path)
        .chunk(b"ACEN", &acen)
        .parse();
    let model = outcome.model.unwrap();
    assert_eq!(model.special_points.len(), 1);
    assert_eq!(model.special_points[0].name, "$engine01");
    assert_eq!(model.paths.len(), 1);
    assert_eq!(model.paths[0].points.len(), 2);
    assert!(model.auto_center.is_some());
    assert!(!outcome.recorder.has_errors(Severity::Error));
}
