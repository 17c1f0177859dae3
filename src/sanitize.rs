//! Post-parse repair pass. Runs once per model, in a fixed order: parent
//! links, then the detail/debris tables, then texture pruning. Every fix is
//! recorded as a data-integrity warning; the pass never escalates severity
//! and running it a second time changes nothing.

use crate::error::{CancelToken, Category, ErrorRecorder};
use crate::types::*;

/// Counts of what one sanitize pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SanitizeSummary {
    pub parents_repaired: usize,
    pub detail_entries_repaired: usize,
    pub debris_entries_repaired: usize,
    pub textures_pruned: usize,
}

pub fn sanitize(model: &mut Model, recorder: &mut ErrorRecorder, cancel: &CancelToken) -> SanitizeSummary {
    let mut summary = SanitizeSummary::default();

    repair_parents(model, recorder, &mut summary);
    repair_ref_tables(model, recorder, &mut summary);

    // pruning needs every tree materialized; a cancelled materialization
    // leaves the texture list alone rather than pruning from partial data
    if model.ensure_bsp_trees(recorder, cancel) {
        prune_textures(model, recorder, &mut summary);
    }

    model.rebuild_children();
    summary
}

fn repair_parents(model: &mut Model, recorder: &mut ErrorRecorder, summary: &mut SanitizeSummary) {
    let num_subobjects = model.sub_objects.len();
    for subobj in &mut model.sub_objects {
        let Some(parent) = subobj.parent else { continue };
        if parent == subobj.obj_id || parent.0 as usize >= num_subobjects {
            recorder.warning(
                Category::DataIntegrity,
                format!("subobject {} ({}) has parent {parent} which does not resolve; detached", subobj.obj_id, subobj.name),
            );
            subobj.parent = None;
            summary.parents_repaired += 1;
        }
    }
}

fn repair_ref_tables(model: &mut Model, recorder: &mut ErrorRecorder, summary: &mut SanitizeSummary) {
    let num_subobjects = model.sub_objects.len();

    for (i, entry) in model.header.detail_levels.iter_mut().enumerate() {
        if let Some(id) = *entry {
            if id.0 as usize >= num_subobjects {
                recorder.warning(
                    Category::DataIntegrity,
                    format!("detail level {i} points at missing subobject {id}; cleared"),
                );
                *entry = None;
                summary.detail_entries_repaired += 1;
            }
        }
    }
    for (i, entry) in model.header.debris_pieces.iter_mut().enumerate() {
        if let Some(id) = *entry {
            if id.0 as usize >= num_subobjects {
                recorder.warning(
                    Category::DataIntegrity,
                    format!("debris piece {i} points at missing subobject {id}; cleared"),
                );
                *entry = None;
                summary.debris_entries_repaired += 1;
            }
        }
    }

    // re-derive debris flags from the repaired table
    for subobj in &mut model.sub_objects {
        subobj.is_debris_model = false;
    }
    for entry in model.header.debris_pieces {
        if let Some(id) = entry {
            model.sub_objects[id].is_debris_model = true;
        }
    }
}

/// Drops textures no polygon references, keeping the survivors in their
/// original relative order, and remaps every polygon's slot. References that
/// fall outside the texture list become untextured.
fn prune_textures(model: &mut Model, recorder: &mut ErrorRecorder, summary: &mut SanitizeSummary) {
    let (used, bad) = model.referenced_textures();
    if !bad.is_empty() {
        recorder.warning(
            Category::DataIntegrity,
            format!("polygons reference texture slots {bad:?} outside the texture list; marked untextured"),
        );
    }

    let mut remap: Vec<Option<u32>> = vec![None; model.textures.len()];
    let mut kept = Vec::with_capacity(used.len());
    for (old_slot, texture) in model.textures.drain(..).enumerate() {
        if used.contains_key(&(old_slot as u32)) {
            remap[old_slot] = Some(kept.len() as u32);
            kept.push(texture);
        } else {
            summary.textures_pruned += 1;
        }
    }
    model.textures = kept;

    for subobj in &mut model.sub_objects {
        let Some(bsp) = &mut subobj.bsp_data else { continue };
        bsp.tree.for_each_polygon_mut(&mut |poly| {
            if let Texturing::Texture(id) = poly.texture {
                poly.texture = match remap.get(id.0 as usize) {
                    Some(Some(new_slot)) => Texturing::Texture(TextureId(*new_slot)),
                    _ => Texturing::Untextured,
                };
            }
        });
    }
}
