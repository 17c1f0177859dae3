//! Structural and semantic checks over a sanitized model. The checks only
//! read the model; every finding goes through the recorder, and the report
//! carries the counts plus a verdict.

use crate::error::{Category, ErrorRecorder, Severity};
use crate::types::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub num_sub_objects: usize,
    pub num_polygons: usize,
    pub num_textures: usize,
    /// Individual checks that produced at least one finding.
    pub checks_failed: usize,
    /// False when any check recorded an error-severity event.
    pub passed: bool,
}

pub fn validate(model: &Model, recorder: &mut ErrorRecorder) -> ValidationReport {
    let events_before = recorder.events().len();
    let mut checks_failed = 0;

    checks_failed += check_subobject_count(model, recorder) as usize;
    checks_failed += check_geometric_centers(model, recorder) as usize;
    checks_failed += check_header_bbox(model, recorder) as usize;
    checks_failed += check_texture_slots(model, recorder) as usize;
    checks_failed += check_tree_shape(model, recorder) as usize;
    checks_failed += check_dock_paths(model, recorder) as usize;

    let passed = !recorder.events()[events_before..]
        .iter()
        .any(|event| event.severity >= Severity::Error);

    ValidationReport {
        num_sub_objects: model.sub_objects.len(),
        num_polygons: model.polygon_count(),
        num_textures: model.textures.len(),
        checks_failed,
        passed,
    }
}

fn check_subobject_count(model: &Model, recorder: &mut ErrorRecorder) -> bool {
    let declared = model.header.num_subobjects as usize;
    let actual = model.sub_objects.len();
    if declared != actual {
        recorder.error(
            Category::Validation,
            format!("header declares {declared} subobjects but {actual} were parsed"),
        );
        return true;
    }
    false
}

fn check_geometric_centers(model: &Model, recorder: &mut ErrorRecorder) -> bool {
    let mut failed = false;
    for subobj in &model.sub_objects {
        if !subobj.bbox.contains_point(subobj.geo_center) {
            recorder.warning(
                Category::Validation,
                format!("subobject {} ({}) has its geometric center outside its bounding box", subobj.obj_id, subobj.name),
            );
            failed = true;
        }
    }
    failed
}

/// Some source files ship header boxes smaller than their geometry; the
/// downstream tolerates it, so this stays a warning.
fn check_header_bbox(model: &Model, recorder: &mut ErrorRecorder) -> bool {
    let mut failed = false;
    for subobj in &model.sub_objects {
        let world_box = subobj.bbox.translate(model.get_total_subobj_offset(subobj.obj_id));
        if !model.header.bounding_box.encloses(&world_box) {
            recorder.warning(
                Category::Validation,
                format!("model bounding box does not enclose subobject {} ({})", subobj.obj_id, subobj.name),
            );
            failed = true;
        }
    }
    failed
}

fn check_texture_slots(model: &Model, recorder: &mut ErrorRecorder) -> bool {
    let (_, bad) = model.referenced_textures();
    if !bad.is_empty() {
        recorder.error(
            Category::Validation,
            format!("polygons reference texture slots {bad:?} outside the {}-entry texture list", model.textures.len()),
        );
        return true;
    }
    false
}

fn check_tree_shape(model: &Model, recorder: &mut ErrorRecorder) -> bool {
    let mut failed = false;
    for subobj in &model.sub_objects {
        let Some(bsp) = &subobj.bsp_data else {
            recorder.warning(
                Category::Validation,
                format!("subobject {} ({}) has no parsed geometry", subobj.obj_id, subobj.name),
            );
            failed = true;
            continue;
        };
        let mut findings = TreeFindings::default();
        inspect_node(&bsp.tree, true, &mut findings);
        if findings.empty_leaves > 0 {
            recorder.warning(
                Category::Validation,
                format!("subobject {} ({}) has {} leaves with no polygons", subobj.obj_id, subobj.name, findings.empty_leaves),
            );
            failed = true;
        }
        if findings.dangling_splits > 0 {
            recorder.warning(
                Category::Validation,
                format!("subobject {} ({}) has {} split nodes missing a child", subobj.obj_id, subobj.name, findings.dangling_splits),
            );
            failed = true;
        }
    }
    failed
}

#[derive(Default)]
struct TreeFindings {
    empty_leaves: usize,
    dangling_splits: usize,
}

fn inspect_node(node: &BspNode, is_root: bool, findings: &mut TreeFindings) {
    match node {
        // an Empty root is a deliberate placeholder (an empty stream);
        // an Empty child means a split lost half its geometry
        BspNode::Empty => {
            if !is_root {
                findings.dangling_splits += 1;
            }
        }
        BspNode::Split { front, back, .. } => {
            inspect_node(front, false, findings);
            inspect_node(back, false, findings);
        }
        BspNode::Leaf { poly_list, .. } => {
            if poly_list.is_empty() {
                findings.empty_leaves += 1;
            }
        }
    }
}

fn check_dock_paths(model: &Model, recorder: &mut ErrorRecorder) -> bool {
    let mut failed = false;
    for (i, dock) in model.docking_bays.iter().enumerate() {
        for path in &dock.paths {
            if path.0 as usize >= model.paths.len() {
                recorder.error(
                    Category::Validation,
                    format!("docking bay {i} references path {path} but the model has {} paths", model.paths.len()),
                );
                failed = true;
            }
        }
    }
    failed
}
