//! Reconstructs a recursive [`BspNode`] graph from a subobject's opcode
//! stream. The stream is itself a sequence of inner chunks (u32 id, u32 size,
//! size including the 8-byte header); child offsets are absolute within the
//! stream. A DEFPOINTS opcode at the start declares the vertex/normal pool
//! every later polygon indexes into.

use crate::error::{CancelToken, Category, ErrorRecorder};
use crate::read::{ReadError, SliceCursor};
use crate::types::{BBox, BspData, BspNode, NormalId, PolyVertex, Polygon, Texturing, TextureId, Vec3d, VertexId};
use crate::version::Version;

pub const ENDOFBRANCH: u32 = 0;
pub const DEFPOINTS: u32 = 1;
pub const FLATPOLY: u32 = 2;
pub const TMAPPOLY: u32 = 3;
pub const SORTNORM: u32 = 4;
pub const BOUNDBOX: u32 = 5;
pub const TMAPPOLY2: u32 = 6;
pub const SORTNORM2: u32 = 7;

// guards against cyclic child offsets
const MAX_DEPTH: usize = 500;

struct Cancelled;

/// Parses a full BSP stream, pool included. `None` means the stream was
/// unusable (or the parse was cancelled); partial damage comes back as a
/// truncated tree plus recorded events.
pub fn parse_bsp_data(stream: &[u8], version: Version, recorder: &mut ErrorRecorder, cancel: &CancelToken) -> Option<BspData> {
    if stream.is_empty() {
        recorder.warning(Category::Parsing, "subobject has an empty BSP stream");
        return Some(BspData { verts: vec![], norms: vec![], tree: BspNode::Empty });
    }

    let mut cursor = SliceCursor::new(stream);
    let first_op = match cursor.read_u32("BSP opcode") {
        Ok(op) => op,
        Err(e) => {
            recorder.error(Category::Parsing, format!("BSP stream too short for an opcode: {e}"));
            return None;
        }
    };

    match first_op {
        DEFPOINTS => {
            let chunk_size = match cursor.read_u32("DEFPOINTS size") {
                Ok(n) => n as usize,
                Err(e) => {
                    recorder.error(Category::Parsing, format!("truncated DEFPOINTS header: {e}"));
                    return None;
                }
            };
            let (verts, norms) = match parse_defpoints(&mut cursor) {
                Ok(pool) => pool,
                Err(e) => {
                    recorder.error(Category::Parsing, format!("malformed DEFPOINTS pool: {e}"));
                    return None;
                }
            };
            if chunk_size < 8 || chunk_size > stream.len() {
                recorder.error(Category::Parsing, format!("DEFPOINTS declares bad chunk size {chunk_size}"));
                return None;
            }
            let mut parser = BspParser { stream, version, verts, norms, recorder, cancel };
            let tree = match parser.parse_node(chunk_size, 0) {
                Ok(tree) => tree,
                Err(Cancelled) => return None,
            };
            Some(BspData { verts: parser.verts, norms: parser.norms, tree })
        }
        SORTNORM | SORTNORM2 => {
            // a tree with no pool; every polygon will be dropped as
            // out-of-bounds, but the structure is still recovered
            recorder.warning(Category::Parsing, "BSP stream has tree opcodes but no DEFPOINTS pool");
            let mut parser = BspParser { stream, version, verts: vec![], norms: vec![], recorder, cancel };
            let tree = match parser.parse_node(0, 0) {
                Ok(tree) => tree,
                Err(Cancelled) => return None,
            };
            Some(BspData { verts: parser.verts, norms: parser.norms, tree })
        }
        _ => parse_legacy_poly_list(stream, version, recorder, cancel),
    }
}

/// Parses a BSP stream whose pool is supplied by the caller instead of a
/// DEFPOINTS opcode; the shield collision tree works this way, indexing the
/// shield mesh's vertex table.
pub fn parse_tree_with_pool(
    stream: &[u8], version: Version, verts: Vec<Vec3d>, norms: Vec<Vec3d>, recorder: &mut ErrorRecorder, cancel: &CancelToken,
) -> Option<BspNode> {
    if stream.is_empty() {
        recorder.warning(Category::Parsing, "empty shield collision tree stream");
        return Some(BspNode::Empty);
    }
    let mut parser = BspParser { stream, version, verts, norms, recorder, cancel };
    match parser.parse_node(0, 0) {
        Ok(tree) => Some(tree),
        Err(Cancelled) => None,
    }
}

/// DEFPOINTS: n_verts, n_norms, data offset, per-vertex normal counts, then at
/// the data offset one position and its run of normals per vertex. Only the
/// first normal per vertex is kept, so the pool stays rectangular.
fn parse_defpoints(cursor: &mut SliceCursor<'_>) -> Result<(Vec<Vec3d>, Vec<Vec3d>), ReadError> {
    let num_verts = cursor.read_u32("DEFPOINTS vertex count")? as usize;
    let _num_norms = cursor.read_u32("DEFPOINTS normal count")?;
    let data_offset = cursor.read_u32("DEFPOINTS data offset")? as usize;

    if num_verts > cursor.len() {
        return Err(ReadError::UnexpectedEof { what: "DEFPOINTS vertex count", position: cursor.pos() as u64 });
    }
    let mut norm_counts = Vec::with_capacity(num_verts);
    for _ in 0..num_verts {
        norm_counts.push(cursor.read_u8("DEFPOINTS normal count byte")?);
    }

    if data_offset > cursor.len() {
        return Err(ReadError::UnexpectedEof { what: "DEFPOINTS data offset", position: data_offset as u64 });
    }
    let mut data = SliceCursor::at(cursor.stream(), data_offset);

    let mut verts = Vec::with_capacity(num_verts);
    let mut norms = Vec::with_capacity(num_verts);
    for &count in &norm_counts {
        verts.push(data.read_vec3d("pool vertex")?);
        if count > 0 {
            norms.push(data.read_vec3d("pool normal")?);
            data.skip((count as usize - 1) * 12, "pool normal run")?;
        } else {
            norms.push(Vec3d::ZERO);
        }
    }
    Ok((verts, norms))
}

struct BspParser<'a, 'r> {
    stream: &'a [u8],
    version: Version,
    verts: Vec<Vec3d>,
    norms: Vec<Vec3d>,
    recorder: &'r mut ErrorRecorder,
    cancel: &'r CancelToken,
}

impl<'a, 'r> BspParser<'a, 'r> {
    /// Parses the node starting at `offset`. Malformed data truncates the
    /// branch (recording a parsing event) rather than failing the tree.
    fn parse_node(&mut self, offset: usize, depth: usize) -> Result<BspNode, Cancelled> {
        if self.cancel.is_cancelled() {
            return Err(Cancelled);
        }
        if depth > MAX_DEPTH {
            self.recorder
                .error(Category::Parsing, format!("BSP recursion deeper than {MAX_DEPTH} nodes; child offsets likely cyclic"));
            return Ok(BspNode::Empty);
        }
        if offset >= self.stream.len() {
            self.recorder
                .error(Category::Parsing, format!("BSP child offset {offset} is past the end of the stream"));
            return Ok(BspNode::Empty);
        }

        let mut cursor = SliceCursor::at(self.stream, offset);
        let (op, chunk_end) = match read_opcode_header(&mut cursor, self.stream.len()) {
            Ok(header) => header,
            Err(msg) => {
                self.recorder.error(Category::Parsing, msg);
                return Ok(BspNode::Empty);
            }
        };

        match op {
            ENDOFBRANCH => Ok(BspNode::Empty),
            SORTNORM | SORTNORM2 => self.parse_sortnorm(&mut cursor, op, depth),
            BOUNDBOX => {
                let bbox = match cursor.read_bbox("BOUNDBOX bounds") {
                    Ok(bbox) => bbox,
                    Err(e) => {
                        self.recorder.error(Category::Parsing, format!("truncated BOUNDBOX: {e}"));
                        return Ok(BspNode::Empty);
                    }
                };
                let polys = self.parse_poly_list(chunk_end)?;
                if polys.is_empty() {
                    self.recorder.warning(Category::Parsing, "BSP leaf contains no usable polygons");
                    Ok(BspNode::Empty)
                } else {
                    Ok(BspNode::Leaf { bbox, poly_list: polys })
                }
            }
            TMAPPOLY | TMAPPOLY2 | FLATPOLY => {
                // a branch that goes straight to polygons, with no stated
                // bounds; wrap it in a leaf and compute the box ourselves
                let polys = self.parse_poly_list(offset)?;
                if polys.is_empty() {
                    Ok(BspNode::Empty)
                } else {
                    let bbox = BBox::from_vectors(
                        polys
                            .iter()
                            .flat_map(|poly| poly.verts.iter())
                            .map(|vert| self.verts[vert.vertex_id.0 as usize]),
                    );
                    Ok(BspNode::Leaf { bbox, poly_list: polys })
                }
            }
            DEFPOINTS => {
                self.recorder.error(Category::Parsing, "DEFPOINTS opcode found after the start of the stream");
                Ok(BspNode::Empty)
            }
            _ => {
                self.recorder.error(Category::Parsing, format!("unknown BSP opcode {op} at offset {offset}"));
                Ok(BspNode::Empty)
            }
        }
    }

    /// SORT_NORM carries a split plane and five child offsets, evaluated
    /// back-to-front: pre, back, on, front, post. They project into the
    /// binary split as back = pre + back and front = on + front + post.
    fn parse_sortnorm(&mut self, cursor: &mut SliceCursor<'a>, op: u32, depth: usize) -> Result<BspNode, Cancelled> {
        if op == SORTNORM2 && self.version < Version::V21_17 {
            self.recorder
                .warning(Category::Compatibility, format!("SORTNORM2 opcode in a version {} stream", self.version));
        }

        let parsed = (|| -> Result<_, ReadError> {
            let normal = cursor.read_vec3d("SORTNORM plane normal")?;
            let point = cursor.read_vec3d("SORTNORM plane point")?;
            let _reserved = cursor.read_u32("SORTNORM reserved")?;
            let front = cursor.read_u32("SORTNORM front offset")?;
            let back = cursor.read_u32("SORTNORM back offset")?;
            let prelist = cursor.read_u32("SORTNORM prelist offset")?;
            let postlist = cursor.read_u32("SORTNORM postlist offset")?;
            let onlist = cursor.read_u32("SORTNORM onlist offset")?;
            let bbox = cursor.read_bbox("SORTNORM bounds")?;
            Ok((normal, point, front, back, prelist, postlist, onlist, bbox))
        })();
        let (normal, point, front, back, prelist, postlist, onlist, bbox) = match parsed {
            Ok(fields) => fields,
            Err(e) => {
                self.recorder.error(Category::Parsing, format!("truncated SORTNORM: {e}"));
                return Ok(BspNode::Empty);
            }
        };

        let mut child = |this: &mut Self, offset: u32| -> Result<BspNode, Cancelled> {
            if offset == 0 {
                Ok(BspNode::Empty)
            } else {
                this.parse_node(offset as usize, depth + 1)
            }
        };

        // traversal order: pre, back, on, front, post
        let pre_node = child(self, prelist)?;
        let back_node = child(self, back)?;
        let on_node = child(self, onlist)?;
        let front_node = child(self, front)?;
        let post_node = child(self, postlist)?;

        for (name, node) in [("pre", &pre_node), ("on", &on_node), ("post", &post_node)] {
            if !matches!(node, BspNode::Empty) {
                self.recorder.warning(
                    Category::Compatibility,
                    format!("SORTNORM {name}-plane branch is non-empty; folding it into the binary split"),
                );
            }
        }

        let back = merge_branches(vec![pre_node, back_node], normal, point);
        let front = merge_branches(vec![on_node, front_node, post_node], normal, point);

        if matches!(back, BspNode::Empty) && matches!(front, BspNode::Empty) {
            return Ok(BspNode::Empty);
        }
        Ok(BspNode::Split { normal, point, bbox, front: Box::new(front), back: Box::new(back) })
    }

    /// Reads a sibling list of polygon opcodes starting at `offset`, up to
    /// END_OF_BRANCH. Bad polygons are dropped; a malformed opcode truncates
    /// the list and keeps what was read.
    fn parse_poly_list(&mut self, mut offset: usize) -> Result<Vec<Polygon>, Cancelled> {
        let mut polys = vec![];
        loop {
            if self.cancel.is_cancelled() {
                return Err(Cancelled);
            }
            if offset >= self.stream.len() {
                self.recorder.error(Category::Parsing, "polygon list ran past the end of the stream without END_OF_BRANCH");
                break;
            }
            let mut cursor = SliceCursor::at(self.stream, offset);
            let (op, chunk_end) = match read_opcode_header(&mut cursor, self.stream.len()) {
                Ok(header) => header,
                Err(msg) => {
                    self.recorder.error(Category::Parsing, msg);
                    break;
                }
            };
            match op {
                ENDOFBRANCH => break,
                TMAPPOLY | TMAPPOLY2 | FLATPOLY => match self.parse_polygon(&mut cursor, op) {
                    Ok(Some(poly)) => polys.push(poly),
                    Ok(None) => {} // dropped, already recorded
                    Err(e) => {
                        self.recorder.error(Category::Parsing, format!("truncated polygon opcode: {e}"));
                        break;
                    }
                },
                _ => {
                    self.recorder
                        .error(Category::Parsing, format!("unexpected opcode {op} inside a polygon list"));
                    break;
                }
            }
            offset = chunk_end;
        }
        Ok(polys)
    }

    fn parse_polygon(&mut self, cursor: &mut SliceCursor<'a>, op: u32) -> Result<Option<Polygon>, ReadError> {
        if op == TMAPPOLY2 && self.version < Version::V21_17 {
            self.recorder
                .warning(Category::Compatibility, format!("TMAPPOLY2 opcode in a version {} stream", self.version));
        }

        let normal = cursor.read_vec3d("polygon normal")?;
        let center = cursor.read_vec3d("polygon center")?;
        let radius = cursor.read_f32("polygon radius")?;
        let num_verts = cursor.read_u32("polygon vertex count")? as usize;
        let texture = match op {
            FLATPOLY => {
                // flat-shaded color, unused by the typed model
                cursor.skip(4, "flat polygon color")?;
                Texturing::Untextured
            }
            _ => Texturing::Texture(TextureId(cursor.read_u32("polygon texture")?)),
        };

        if num_verts < 3 {
            self.recorder
                .warning(Category::Parsing, format!("polygon with {num_verts} vertices dropped"));
            return Ok(None);
        }
        if num_verts > cursor.remaining() / 4 {
            return Err(ReadError::UnexpectedEof { what: "polygon vertex list", position: cursor.pos() as u64 });
        }

        let mut verts = Vec::with_capacity(num_verts);
        for _ in 0..num_verts {
            let (vertex_id, normal_id) = if op == TMAPPOLY2 {
                (cursor.read_u32("vertex index")?, cursor.read_u32("normal index")?)
            } else {
                (cursor.read_u16("vertex index")? as u32, cursor.read_u16("normal index")? as u32)
            };
            let uv = if op == FLATPOLY {
                (0.0, 0.0)
            } else {
                (cursor.read_f32("vertex u")?, cursor.read_f32("vertex v")?)
            };
            verts.push(PolyVertex { vertex_id: VertexId(vertex_id), normal_id: NormalId(normal_id), uv });
        }

        for vert in &verts {
            if vert.vertex_id.0 as usize >= self.verts.len() || vert.normal_id.0 as usize >= self.norms.len() {
                self.recorder.warning(
                    Category::Parsing,
                    format!(
                        "polygon references vertex {}/normal {} outside the {}-vertex pool; dropped",
                        vert.vertex_id, vert.normal_id,
                        self.verts.len()
                    ),
                );
                return Ok(None);
            }
        }

        Ok(Some(Polygon { normal, center, radius, texture, verts }))
    }
}

fn read_opcode_header(cursor: &mut SliceCursor<'_>, stream_len: usize) -> Result<(u32, usize), String> {
    let start = cursor.pos();
    let op = cursor
        .read_u32("BSP opcode")
        .map_err(|e| format!("truncated BSP opcode header: {e}"))?;
    let size = cursor
        .read_u32("BSP opcode size")
        .map_err(|e| format!("truncated BSP opcode header: {e}"))?
        as usize;
    // size includes the 8-byte header
    if op != ENDOFBRANCH && size < 8 {
        return Err(format!("BSP opcode {op} at offset {start} declares impossible size {size}"));
    }
    let chunk_end = start.saturating_add(size.max(8));
    if chunk_end > stream_len {
        return Err(format!("BSP opcode {op} at offset {start} overruns the stream (size {size})"));
    }
    Ok((op, chunk_end))
}

/// Folds sibling branches into one node. More than one survivor nests into
/// `Split` nodes sharing the parent plane; their box is the union.
fn merge_branches(nodes: Vec<BspNode>, normal: Vec3d, point: Vec3d) -> BspNode {
    let mut live: Vec<BspNode> = nodes.into_iter().filter(|node| !matches!(node, BspNode::Empty)).collect();
    match live.len() {
        0 => BspNode::Empty,
        1 => live.pop().unwrap(),
        _ => {
            let mut iter = live.into_iter();
            let first = iter.next().unwrap();
            iter.fold(first, |acc, node| {
                let mut bbox = acc.bbox().copied().unwrap_or_default();
                if let Some(other) = node.bbox() {
                    bbox.expand_bbox(other);
                }
                BspNode::Split { normal, point, bbox, front: Box::new(acc), back: Box::new(node) }
            })
        }
    }
}

/// Version-1800 fallback: no tree opcodes, just a count-prefixed list of flat
/// polygon records with inline positions. Synthesizes a pool and one leaf.
fn parse_legacy_poly_list(stream: &[u8], _version: Version, recorder: &mut ErrorRecorder, cancel: &CancelToken) -> Option<BspData> {
    recorder.warning(Category::Compatibility, "BSP stream has no tree opcodes; reading it as a legacy flat polygon list");

    let mut cursor = SliceCursor::new(stream);
    let mut verts: Vec<Vec3d> = vec![];
    let mut norms: Vec<Vec3d> = vec![];
    let mut polys: Vec<Polygon> = vec![];

    let result = (|| -> Result<(), ReadError> {
        let count = cursor.read_u32("legacy polygon count")? as usize;
        if count > cursor.remaining() / 16 {
            return Err(ReadError::UnexpectedEof { what: "legacy polygon count", position: 0 });
        }
        for _ in 0..count {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let normal = cursor.read_vec3d("legacy polygon normal")?;
            let num_verts = cursor.read_u32("legacy polygon vertex count")? as usize;
            if num_verts > cursor.remaining() / 12 {
                return Err(ReadError::UnexpectedEof { what: "legacy polygon vertex list", position: cursor.pos() as u64 });
            }
            let first_id = verts.len() as u32;
            let mut positions = Vec::with_capacity(num_verts);
            for _ in 0..num_verts {
                positions.push(cursor.read_vec3d("legacy polygon vertex")?);
            }
            if num_verts < 3 {
                recorder.warning(Category::Parsing, format!("legacy polygon with {num_verts} vertices dropped"));
                continue;
            }
            let mut center = Vec3d::ZERO;
            for &pos in &positions {
                center += pos;
            }
            center /= num_verts as f32;
            let radius = positions.iter().map(|&pos| (pos - center).magnitude()).fold(0.0, f32::max);

            let poly_verts = positions
                .iter()
                .enumerate()
                .map(|(i, _)| PolyVertex {
                    vertex_id: VertexId(first_id + i as u32),
                    normal_id: NormalId(first_id + i as u32),
                    uv: (0.0, 0.0),
                })
                .collect();
            for pos in positions {
                verts.push(pos);
                norms.push(normal);
            }
            polys.push(Polygon { normal, center, radius, texture: Texturing::Untextured, verts: poly_verts });
        }
        Ok(())
    })();
    if cancel.is_cancelled() {
        return None;
    }
    if let Err(e) = result {
        recorder.error(Category::Parsing, format!("legacy polygon list truncated: {e}"));
    }

    let tree = if polys.is_empty() {
        BspNode::Empty
    } else {
        let bbox = BBox::from_vectors(verts.iter().copied());
        BspNode::Leaf { bbox, poly_list: polys }
    };
    Some(BspData { verts, norms, tree })
}
