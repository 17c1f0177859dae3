use std::collections::BTreeMap;
use std::fmt::{Debug, Display};
use std::ops::{Add, AddAssign, Deref, DerefMut, Div, DivAssign, Index, IndexMut, Mul, MulAssign, Neg, Sub, SubAssign};

use crate::version::Version;

macro_rules! id_type {
    ($name:ident, $type:ty) => {
        #[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub $type);
        impl Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_fmt(format_args!("{}", &self.0))
            }
        }
        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_fmt(format_args!("{}", &self.0))
            }
        }
    };
}

id_type! {ObjectId, u32}
id_type! {TextureId, u32}
id_type! {VertexId, u32}
id_type! {NormalId, u32}
id_type! {PolygonId, u32}
id_type! {PathId, u32}

/// A vector of subobjects indexable by [`ObjectId`]. Subobject ids are dense
/// and assigned in file order, so id and position coincide.
#[derive(Debug, Default)]
pub struct ObjVec<T>(pub Vec<T>);
impl<T> Index<ObjectId> for ObjVec<T> {
    type Output = T;

    fn index(&self, index: ObjectId) -> &Self::Output {
        &self.0[index.0 as usize]
    }
}
impl<T> IndexMut<ObjectId> for ObjVec<T> {
    fn index_mut(&mut self, index: ObjectId) -> &mut Self::Output {
        &mut self.0[index.0 as usize]
    }
}
impl<'a, T> IntoIterator for &'a ObjVec<T> {
    type Item = &'a T;

    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
impl<'a, T> IntoIterator for &'a mut ObjVec<T> {
    type Item = &'a mut T;

    type IntoIter = std::slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter_mut()
    }
}
impl<T> Deref for ObjVec<T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl<T> DerefMut for ObjVec<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Axis {
    X,
    Y,
    Z,
}

#[derive(Clone, Copy, Default)]
pub struct Vec3d {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}
impl Eq for Vec3d {}
impl PartialEq for Vec3d {
    // bitwise, so NaN == NaN and the type can key a hash map
    fn eq(&self, other: &Self) -> bool {
        self.x.to_bits() == other.x.to_bits() && self.y.to_bits() == other.y.to_bits() && self.z.to_bits() == other.z.to_bits()
    }
}
impl std::hash::Hash for Vec3d {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.x.to_bits().hash(state);
        self.y.to_bits().hash(state);
        self.z.to_bits().hash(state);
    }
}
impl Debug for Vec3d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", &self.x, &self.y, &self.z)
    }
}
impl From<[f32; 3]> for Vec3d {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Vec3d { x, y, z }
    }
}
impl From<Vec3d> for [f32; 3] {
    fn from(Vec3d { x, y, z }: Vec3d) -> Self {
        [x, y, z]
    }
}
impl Vec3d {
    pub const ZERO: Vec3d = Vec3d { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Vec3d { x, y, z }
    }
    pub fn magnitude(self) -> f32 {
        f32::sqrt(self.dot(self))
    }
    pub fn dot(self, rhs: Vec3d) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }
    pub fn cross(self, rhs: Vec3d) -> Vec3d {
        Vec3d {
            x: self.y * rhs.z - self.z * rhs.y,
            y: self.z * rhs.x - self.x * rhs.z,
            z: self.x * rhs.y - self.y * rhs.x,
        }
    }
    /// Normalizes to unit length. Degenerate (zero-length) vectors come back
    /// zero rather than NaN; some models in the wild contain them.
    pub fn normalize(self) -> Vec3d {
        let mag = self.magnitude();
        if mag <= f32::EPSILON {
            Vec3d::ZERO
        } else {
            self / mag
        }
    }
    pub fn is_null(self) -> bool {
        self.x.abs() <= 0.000001 && self.y.abs() <= 0.000001 && self.z.abs() <= 0.000001
    }
}
impl Add for Vec3d {
    type Output = Vec3d;

    fn add(self, rhs: Self) -> Self::Output {
        Vec3d { x: self.x + rhs.x, y: self.y + rhs.y, z: self.z + rhs.z }
    }
}
impl AddAssign for Vec3d {
    fn add_assign(&mut self, rhs: Vec3d) {
        *self = *self + rhs;
    }
}
impl Sub for Vec3d {
    type Output = Vec3d;

    fn sub(self, rhs: Self) -> Self::Output {
        Vec3d { x: self.x - rhs.x, y: self.y - rhs.y, z: self.z - rhs.z }
    }
}
impl SubAssign for Vec3d {
    fn sub_assign(&mut self, rhs: Vec3d) {
        *self = *self - rhs;
    }
}
impl Mul<f32> for Vec3d {
    type Output = Vec3d;

    fn mul(self, rhs: f32) -> Vec3d {
        Vec3d { x: self.x * rhs, y: self.y * rhs, z: self.z * rhs }
    }
}
impl MulAssign<f32> for Vec3d {
    fn mul_assign(&mut self, rhs: f32) {
        *self = *self * rhs;
    }
}
impl Div<f32> for Vec3d {
    type Output = Vec3d;

    fn div(self, rhs: f32) -> Vec3d {
        Vec3d { x: self.x / rhs, y: self.y / rhs, z: self.z / rhs }
    }
}
impl DivAssign<f32> for Vec3d {
    fn div_assign(&mut self, rhs: f32) {
        *self = *self / rhs;
    }
}
impl Neg for Vec3d {
    type Output = Vec3d;

    fn neg(self) -> Self::Output {
        Vec3d { x: -self.x, y: -self.y, z: -self.z }
    }
}
impl Index<Axis> for Vec3d {
    type Output = f32;

    fn index(&self, index: Axis) -> &Self::Output {
        match index {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }
}
impl Display for Vec3d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}, {}", &self.x, &self.y, &self.z)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Mat3d {
    pub rvec: Vec3d,
    pub uvec: Vec3d,
    pub fvec: Vec3d,
}
impl Mat3d {
    pub const IDENTITY: Mat3d = Mat3d {
        rvec: Vec3d { x: 1.0, y: 0.0, z: 0.0 },
        uvec: Vec3d { x: 0.0, y: 1.0, z: 0.0 },
        fvec: Vec3d { x: 0.0, y: 0.0, z: 1.0 },
    };
}

#[derive(Default, Clone, Copy)]
pub struct BBox {
    pub min: Vec3d,
    pub max: Vec3d,
}
impl Debug for BBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:?}, {:?}", &self.min, &self.max))
    }
}
impl BBox {
    pub fn center(&self) -> Vec3d {
        (self.min + self.max) / 2.0
    }
    pub fn size(&self) -> Vec3d {
        self.max - self.min
    }
    pub fn contains_point(&self, point: Vec3d) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }
    pub fn intersects(&self, other: &BBox) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }
    pub fn encloses(&self, other: &BBox) -> bool {
        self.contains_point(other.min) && self.contains_point(other.max)
    }
    pub fn expand_vec(&mut self, vec: Vec3d) {
        self.min.x = self.min.x.min(vec.x);
        self.min.y = self.min.y.min(vec.y);
        self.min.z = self.min.z.min(vec.z);
        self.max.x = self.max.x.max(vec.x);
        self.max.y = self.max.y.max(vec.y);
        self.max.z = self.max.z.max(vec.z);
    }
    pub fn expand_bbox(&mut self, bbox: &BBox) {
        self.expand_vec(bbox.min);
        self.expand_vec(bbox.max);
    }
    pub fn from_vectors(mut iter: impl Iterator<Item = Vec3d>) -> BBox {
        if let Some(vec) = iter.next() {
            iter.fold(BBox { min: vec, max: vec }, |mut bbox, vec| {
                bbox.expand_vec(vec);
                bbox
            })
        } else {
            BBox::default()
        }
    }
    pub fn from_bboxes<'a>(mut iter: impl Iterator<Item = &'a Self>) -> BBox {
        if let Some(bbox) = iter.next() {
            iter.fold(*bbox, |mut acc_bbox, bbox| {
                acc_bbox.expand_bbox(bbox);
                acc_bbox
            })
        } else {
            BBox::default()
        }
    }
    pub fn translate(&self, offset: Vec3d) -> BBox {
        BBox { min: self.min + offset, max: self.max + offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BspLightKind {
    Muzzle,
    Thruster,
}

#[derive(Debug, Clone, Copy)]
pub struct BspLight {
    pub location: Vec3d,
    pub kind: BspLightKind,
}

pub const MAX_DETAIL_LEVELS: usize = 8;
pub const MAX_DEBRIS_OBJECTS: usize = 32;

#[derive(Debug)]
pub struct ObjHeader {
    pub max_radius: f32,
    pub obj_flags: u32,
    pub num_subobjects: u32,
    pub bounding_box: BBox,
    pub detail_levels: [Option<ObjectId>; MAX_DETAIL_LEVELS],
    pub debris_pieces: [Option<ObjectId>; MAX_DEBRIS_OBJECTS],
    pub mass: f32,
    pub center_of_mass: Vec3d,
    pub moment_of_inertia: Mat3d,
    pub cross_sections: Vec<(f32, f32)>, // depth, radius
    pub bsp_lights: Vec<BspLight>,
}
impl Default for ObjHeader {
    fn default() -> Self {
        ObjHeader {
            max_radius: 0.0,
            obj_flags: 0,
            num_subobjects: 0,
            bounding_box: BBox::default(),
            detail_levels: [None; MAX_DETAIL_LEVELS],
            debris_pieces: [None; MAX_DEBRIS_OBJECTS],
            mass: 0.0,
            center_of_mass: Vec3d::ZERO,
            moment_of_inertia: Mat3d::IDENTITY,
            cross_sections: vec![],
            bsp_lights: vec![],
        }
    }
}

/// Whether a polygon is mapped to a slot of the model's texture list or is
/// flat-shaded / pruned. Chosen over a sentinel index so `slot < textures.len()`
/// stays a correctness predicate after sanitization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Texturing {
    Texture(TextureId),
    Untextured,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolyVertex {
    pub vertex_id: VertexId,
    pub normal_id: NormalId,
    pub uv: (f32, f32),
}

#[derive(Clone, Debug)]
pub struct Polygon {
    pub normal: Vec3d,
    pub center: Vec3d,
    pub radius: f32,
    pub texture: Texturing,
    pub verts: Vec<PolyVertex>,
}
impl Default for Polygon {
    fn default() -> Self {
        Polygon {
            normal: Vec3d::ZERO,
            center: Vec3d::ZERO,
            radius: 0.0,
            texture: Texturing::Untextured,
            verts: vec![],
        }
    }
}
impl Polygon {
    /// Distance of the polygon's plane from the origin along its normal.
    pub fn plane_distance(&self) -> f32 {
        self.normal.dot(self.center)
    }
}

#[derive(Debug, Default)]
pub enum BspNode {
    /// Terminator / pruned branch.
    #[default]
    Empty,
    Split {
        normal: Vec3d,
        point: Vec3d,
        bbox: BBox,
        front: Box<BspNode>,
        back: Box<BspNode>,
    },
    Leaf {
        bbox: BBox,
        poly_list: Vec<Polygon>,
    },
}
impl BspNode {
    pub fn bbox(&self) -> Option<&BBox> {
        match self {
            BspNode::Empty => None,
            BspNode::Split { bbox, .. } | BspNode::Leaf { bbox, .. } => Some(bbox),
        }
    }

    /// Iterates over leaves, front before back.
    pub fn leaves(&self) -> BspNodeIter<'_> {
        BspNodeIter { stack: vec![self] }
    }

    pub fn for_each_polygon_mut(&mut self, f: &mut impl FnMut(&mut Polygon)) {
        match self {
            BspNode::Empty => {}
            BspNode::Split { front, back, .. } => {
                front.for_each_polygon_mut(f);
                back.for_each_polygon_mut(f);
            }
            BspNode::Leaf { poly_list, .. } => {
                for poly in poly_list {
                    f(poly);
                }
            }
        }
    }

    pub fn polygon_count(&self) -> usize {
        self.leaves().map(|(_, polys)| polys.len()).sum()
    }
}

pub struct BspNodeIter<'a> {
    stack: Vec<&'a BspNode>,
}

impl<'a> Iterator for BspNodeIter<'a> {
    type Item = (&'a BBox, &'a Vec<Polygon>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.stack.pop()? {
                BspNode::Empty => {}
                BspNode::Split { front, back, .. } => {
                    self.stack.push(back);
                    self.stack.push(front);
                }
                BspNode::Leaf { bbox, poly_list } => {
                    return Some((bbox, poly_list));
                }
            }
        }
    }
}

/// A subobject's reconstructed BSP tree together with the vertex/normal pool
/// declared by the stream's leading DEFPOINTS opcode.
#[derive(Debug, Default)]
pub struct BspData {
    pub verts: Vec<Vec3d>,
    pub norms: Vec<Vec3d>,
    pub tree: BspNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementKind {
    None,
    Rotation,
    Translation,
    Both,
}
impl Default for MovementKind {
    fn default() -> Self {
        Self::None
    }
}
impl MovementKind {
    pub fn from_raw(val: i32) -> MovementKind {
        match val {
            0 => MovementKind::Translation,
            1 => MovementKind::Rotation,
            2 => MovementKind::Both,
            _ => MovementKind::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementAxis {
    None,
    X,
    Y,
    Z,
}
impl Default for MovementAxis {
    fn default() -> Self {
        Self::None
    }
}
impl MovementAxis {
    // 1 is Z and 2 is Y; matches what files in the wild actually encode
    pub fn from_raw(val: i32) -> MovementAxis {
        match val {
            0 => MovementAxis::X,
            1 => MovementAxis::Z,
            2 => MovementAxis::Y,
            _ => MovementAxis::None,
        }
    }
}

#[derive(Debug, Default)]
pub struct SubObject {
    pub obj_id: ObjectId,
    pub radius: f32,
    pub parent: Option<ObjectId>,
    pub offset: Vec3d,
    pub geo_center: Vec3d,
    pub bbox: BBox,
    pub name: String,
    pub properties: String,
    pub movement_kind: MovementKind,
    pub movement_axis: MovementAxis,
    /// Byte range in the source file where this subobject's BSP stream lived.
    pub bsp_offset: u64,
    /// The raw BSP stream, kept so the tree can be parsed lazily after the
    /// source is gone.
    pub bsp_bytes: Box<[u8]>,
    /// Populated on first use; see [`crate::Model::ensure_bsp_trees`].
    pub bsp_data: Option<BspData>,
    /// Set when the stream turned out to be unusable, so reruns skip it.
    pub bsp_parse_failed: bool,

    pub children: Vec<ObjectId>,
    pub is_debris_model: bool,
}
impl SubObject {
    pub fn bsp_size(&self) -> u32 {
        self.bsp_bytes.len() as u32
    }

    /// Looks up `$key=value` entries in the free-form properties string.
    pub fn property(&self, key: &str) -> Option<&str> {
        property_lookup(&self.properties, key)
    }
}

fn property_lookup<'a>(properties: &'a str, key: &str) -> Option<&'a str> {
    for line in properties.split('\n') {
        if let Some(rest) = line.trim().strip_prefix('$') {
            if let Some((k, v)) = rest.split_once('=') {
                if k.trim().eq_ignore_ascii_case(key) {
                    return Some(v.trim());
                }
            }
        }
    }
    None
}

#[derive(Debug, Clone, Default)]
pub struct SpecialPoint {
    pub name: String,
    pub properties: String,
    pub position: Vec3d,
    pub radius: f32,
}

#[derive(Debug, Clone, Default)]
pub struct PathPoint {
    pub position: Vec3d,
    pub radius: f32,
}

#[derive(Clone, Default)]
pub struct Path {
    pub name: String,
    pub parent: Option<ObjectId>,
    pub points: Vec<PathPoint>,
}
impl Debug for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Path")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("points", &self.points.len())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WeaponHardpoint {
    pub position: Vec3d,
    pub normal: Vec3d,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DockingPoint {
    pub position: Vec3d,
    pub normal: Vec3d,
}

#[derive(Debug, Clone, Default)]
pub struct Dock {
    pub properties: String,
    pub paths: Vec<PathId>,
    pub points: Vec<DockingPoint>,
}
impl Dock {
    pub fn get_name(&self) -> Option<&str> {
        property_lookup(&self.properties, "name")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ThrusterGlow {
    pub position: Vec3d,
    pub normal: Vec3d,
    pub radius: f32,
}

#[derive(Debug, Clone, Default)]
pub struct ThrusterBank {
    pub properties: String,
    pub glows: Vec<ThrusterGlow>,
}

#[derive(Debug, Clone, Default)]
pub struct EyePoint {
    pub attached_subobj: ObjectId,
    pub offset: Vec3d,
    pub normal: Vec3d,
}

#[derive(Debug, Clone, Copy)]
pub struct InsigniaVertex {
    pub vertex_id: VertexId,
    pub uv: (f32, f32),
}

/// A decal projected onto model faces, not independent geometry.
#[derive(Debug)]
pub struct Insignia {
    pub detail_level: u32,
    pub vertices: Vec<Vec3d>,
    pub offset: Vec3d,
    pub faces: Vec<[InsigniaVertex; 3]>,
}

#[derive(Debug, Clone, Default)]
pub struct GlowPoint {
    pub position: Vec3d,
    pub normal: Vec3d,
    pub radius: f32,
}

#[derive(Debug, Default, Clone)]
pub struct GlowPointBank {
    pub disp_time: i32,
    pub on_time: u32,
    pub off_time: u32,
    pub obj_parent: ObjectId,
    pub lod: u32,
    pub glow_type: u32,
    pub properties: String,
    pub glow_points: Vec<GlowPoint>,
}

#[derive(Clone, Copy)]
pub struct ShieldPolygon {
    pub normal: Vec3d,
    pub verts: [VertexId; 3],
    pub neighbors: [Option<PolygonId>; 3],
}
impl Debug for ShieldPolygon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ShieldPolygon: {:?}, verts: {:?}, neighbors: {:?}",
            self.normal, self.verts, self.neighbors
        )
    }
}

/// The shield mesh is a flat triangle list, not a BSP; the collision tree over
/// it arrives in a separate chunk and shares the mesh's vertex table.
#[derive(Debug)]
pub struct ShieldData {
    pub verts: Vec<Vec3d>,
    pub polygons: Vec<ShieldPolygon>,
    pub collision_tree: Option<BspNode>,
}

#[derive(Debug)]
pub struct Model {
    pub filename: String,
    pub version: Version,
    pub header: ObjHeader,
    pub textures: Vec<String>,
    pub sub_objects: ObjVec<SubObject>,
    pub special_points: Vec<SpecialPoint>,
    pub paths: Vec<Path>,
    pub gun_points: Vec<Vec<WeaponHardpoint>>,
    pub missile_points: Vec<Vec<WeaponHardpoint>>,
    pub docking_bays: Vec<Dock>,
    pub thruster_banks: Vec<ThrusterBank>,
    pub eye_points: Vec<EyePoint>,
    pub insignias: Vec<Insignia>,
    pub auto_center: Option<Vec3d>,
    pub glow_banks: Vec<GlowPointBank>,
    pub shield_data: Option<ShieldData>,
}
impl Model {
    pub fn new(filename: String, version: Version) -> Model {
        Model {
            filename,
            version,
            header: ObjHeader::default(),
            textures: vec![],
            sub_objects: ObjVec::default(),
            special_points: vec![],
            paths: vec![],
            gun_points: vec![],
            missile_points: vec![],
            docking_bays: vec![],
            thruster_banks: vec![],
            eye_points: vec![],
            insignias: vec![],
            auto_center: None,
            glow_banks: vec![],
            shield_data: None,
        }
    }

    pub fn has_sub_object(&self, id: ObjectId) -> bool {
        self.sub_objects.iter().any(|subobj| subobj.obj_id == id)
    }

    pub fn get_sub_object(&self, id: ObjectId) -> Option<&SubObject> {
        self.sub_objects.iter().find(|subobj| subobj.obj_id == id)
    }

    /// Sums a subobject's offset with those of all its ancestors, yielding its
    /// position in model space.
    pub fn get_total_subobj_offset(&self, mut id: ObjectId) -> Vec3d {
        let mut out = Vec3d::ZERO;
        loop {
            let Some(subobj) = self.get_sub_object(id) else { break out };
            out += subobj.offset;
            if let Some(parent) = subobj.parent {
                if parent == subobj.obj_id {
                    break out;
                }
                id = parent;
            } else {
                break out;
            }
        }
    }

    pub fn num_debris_objects(&self) -> u32 {
        self.sub_objects.iter().filter(|sobj| sobj.is_debris_model).count() as u32
    }

    /// Rebuilds every subobject's child list from the parent links.
    pub fn rebuild_children(&mut self) {
        for subobj in &mut self.sub_objects {
            subobj.children.clear();
        }
        for i in 0..self.sub_objects.len() {
            let id = self.sub_objects.0[i].obj_id;
            if let Some(parent) = self.sub_objects.0[i].parent {
                if parent != id && (parent.0 as usize) < self.sub_objects.len() {
                    self.sub_objects[parent].children.push(id);
                }
            }
        }
    }

    /// Total polygons across all parsed BSP trees.
    pub fn polygon_count(&self) -> usize {
        self.sub_objects
            .iter()
            .filter_map(|subobj| subobj.bsp_data.as_ref())
            .map(|bsp| bsp.tree.polygon_count())
            .sum()
    }

    /// Texture slots referenced by at least one polygon, in slot order.
    /// Out-of-range references are collected separately.
    pub fn referenced_textures(&self) -> (BTreeMap<u32, usize>, Vec<u32>) {
        let mut used = BTreeMap::new();
        let mut bad = vec![];
        for subobj in &self.sub_objects {
            let Some(bsp) = &subobj.bsp_data else { continue };
            for (_, polys) in bsp.tree.leaves() {
                for poly in polys {
                    if let Texturing::Texture(id) = poly.texture {
                        if (id.0 as usize) < self.textures.len() {
                            *used.entry(id.0).or_insert(0) += 1;
                        } else if !bad.contains(&id.0) {
                            bad.push(id.0);
                        }
                    }
                }
            }
        }
        (used, bad)
    }
}
