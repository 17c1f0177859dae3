//! Flattens a subobject's BSP into an indexed triangle list: one vertex
//! buffer of (position, normal, uv) and one index buffer per texture slot.
//! Coordinates pass through untouched; axis conventions are the consumer's
//! concern.

use std::collections::{BTreeMap, HashMap};

use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshVertex {
    pub position: Vec3d,
    pub normal: Vec3d,
    pub uv: (f32, f32),
}

#[derive(Debug, Default, PartialEq)]
pub struct SubObjectMesh {
    pub vertices: Vec<MeshVertex>,
    pub index_buffers: BTreeMap<Texturing, Vec<u32>>,
}

impl SubObjectMesh {
    pub fn triangle_count(&self) -> usize {
        self.index_buffers.values().map(|buf| buf.len() / 3).sum()
    }
}

// UVs are interned after rounding to five decimal places, so near-identical
// coordinates from different polygons collapse to one vertex and the output
// is stable across runs
const UV_SCALE: f32 = 100_000.0;

fn uv_key(uv: (f32, f32)) -> (i64, i64) {
    ((uv.0 * UV_SCALE).round() as i64, (uv.1 * UV_SCALE).round() as i64)
}

/// Walks the tree front-to-back, fan-triangulating each leaf polygon from its
/// first vertex and interning (vertex id, normal id, rounded uv) triples.
pub fn extract_mesh(bsp: &BspData) -> SubObjectMesh {
    let mut mesh = SubObjectMesh::default();
    let mut interned: HashMap<(VertexId, NormalId, (i64, i64)), u32> = HashMap::new();

    for (_, polys) in bsp.tree.leaves() {
        for poly in polys {
            if poly.verts.len() < 3 {
                continue;
            }
            // check every pool reference before interning anything, so a bad
            // polygon leaves no stray vertices behind
            let resolvable = poly.verts.iter().all(|vert| {
                (vert.vertex_id.0 as usize) < bsp.verts.len()
                    && (vert.normal_id.0 as usize) < bsp.norms.len()
            });
            if !resolvable {
                // pool reference outside the table; the parser warned already
                continue;
            }
            let indices: Vec<u32> = poly
                .verts
                .iter()
                .map(|vert| intern_vertex(bsp, vert, &mut mesh.vertices, &mut interned))
                .collect();

            let buffer = mesh.index_buffers.entry(poly.texture).or_default();
            for i in 1..indices.len() - 1 {
                buffer.push(indices[0]);
                buffer.push(indices[i]);
                buffer.push(indices[i + 1]);
            }
        }
    }
    mesh
}

/// Caller has already bounds-checked both pool references.
fn intern_vertex(
    bsp: &BspData, vert: &PolyVertex, vertices: &mut Vec<MeshVertex>,
    interned: &mut HashMap<(VertexId, NormalId, (i64, i64)), u32>,
) -> u32 {
    let key = (vert.vertex_id, vert.normal_id, uv_key(vert.uv));
    if let Some(&index) = interned.get(&key) {
        return index;
    }
    let position = bsp.verts[vert.vertex_id.0 as usize];
    let normal = bsp.norms[vert.normal_id.0 as usize];
    let index = vertices.len() as u32;
    vertices.push(MeshVertex { position, normal, uv: vert.uv });
    interned.insert(key, index);
    index
}

/// Meshes for every subobject whose tree is parsed, in id order.
pub fn extract_meshes(model: &Model) -> Vec<(ObjectId, SubObjectMesh)> {
    model
        .sub_objects
        .iter()
        .filter_map(|subobj| {
            let bsp = subobj.bsp_data.as_ref()?;
            Some((subobj.obj_id, extract_mesh(bsp)))
        })
        .collect()
}
