use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read, Seek};

use crate::bsp;
use crate::error::{CancelToken, Category, ErrorRecorder};
use crate::read::{ChunkId, ReadError, Reader};
use crate::types::*;
use crate::version::{ChunkKind, Support, Version};

const DEFAULT_TEXTURE_EXTENSION: &str = ".dds";

/// What one parse produced: possibly a model, always a report.
#[derive(Debug)]
pub struct ParseOutcome {
    pub model: Option<Model>,
    pub recorder: ErrorRecorder,
}

/// Per-chunk progress, handed to the optional progress callback as each
/// top-level chunk header is read.
#[derive(Debug, Clone)]
pub struct ChunkInfo {
    pub id: ChunkId,
    pub kind: Option<ChunkKind>,
    pub offset: u64,
    pub len: u32,
}

pub struct Parser<R> {
    reader: Reader<R>,
    filename: String,
    recorder: ErrorRecorder,
    cancel: CancelToken,
    progress: Option<Box<dyn FnMut(&ChunkInfo)>>,
}

/// Convenience wrapper: open `path` and parse it.
pub fn parse_file(path: impl AsRef<std::path::Path>) -> io::Result<ParseOutcome> {
    let path = path.as_ref();
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let file = File::open(path)?;
    Ok(Parser::new(file, filename)?.parse())
}

impl<R: Read + Seek> Parser<R> {
    pub fn new(file: R, filename: impl Into<String>) -> io::Result<Parser<R>> {
        Ok(Parser {
            reader: Reader::new(file)?,
            filename: filename.into(),
            recorder: ErrorRecorder::new(),
            cancel: CancelToken::new(),
            progress: None,
        })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, f: impl FnMut(&ChunkInfo) + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    /// Validates the file header, loops over top-level chunks dispatching to
    /// the chunk parsers, then resolves the cross-chunk pieces (shield tree,
    /// debris flags, child links). BSP trees stay lazy.
    pub fn parse(mut self) -> ParseOutcome {
        let mut model = match self.parse_file_header() {
            Some(model) => model,
            None => return ParseOutcome { model: None, recorder: self.recorder },
        };

        let mut seen: HashSet<ChunkKind> = HashSet::new();
        let mut shield_tree_chunk: Option<Box<[u8]>> = None;

        loop {
            if self.cancel.is_cancelled() {
                self.recorder.critical(Category::Parsing, "parse cancelled");
                return ParseOutcome { model: None, recorder: self.recorder };
            }

            let header_pos = self.reader.position();
            let (id, len) = match self.reader.read_chunk_header() {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(e) => {
                    self.recorder.error(Category::Parsing, format!("truncated chunk header: {e}"));
                    break;
                }
            };
            self.recorder.set_chunk(Some(id.to_string()));
            self.recorder.set_position(header_pos);

            if len < 0 {
                self.recorder.error(Category::Parsing, format!("chunk declares negative length {len}"));
                break;
            }
            let chunk_end = self.reader.position() + len as u64;
            if chunk_end > self.reader.len() {
                self.recorder
                    .error(Category::Parsing, format!("chunk length {len} overruns the end of the file"));
                break;
            }

            let kind = ChunkKind::from_id(&id.0);
            if let Some(f) = &mut self.progress {
                f(&ChunkInfo { id, kind, offset: header_pos, len: len as u32 });
            }

            match kind {
                None => {
                    self.recorder.warning(Category::Parsing, format!("unknown chunk id {id}, skipped"));
                }
                Some(kind) => match kind.support_at(model.version) {
                    Support::Unsupported => {
                        self.recorder.warning(
                            Category::Compatibility,
                            format!("chunk {id} is not supported at version {}, skipped", model.version),
                        );
                    }
                    Support::Required | Support::Optional => {
                        // only OBJ2 repeats; everything else is a singleton
                        if kind != ChunkKind::SubObject && !seen.insert(kind) {
                            self.recorder.warning(Category::Parsing, format!("duplicate {id} chunk, ignored"));
                        } else {
                            seen.insert(kind);
                            if let Err(e) = self.dispatch_chunk(kind, &mut model, &mut shield_tree_chunk) {
                                self.recorder.error(Category::Parsing, format!("failed to parse {id} chunk: {e}"));
                            }
                        }
                    }
                },
            }

            self.recorder.set_sub_object(None);
            if let Err(e) = self.reader.seek(chunk_end) {
                self.recorder.error(Category::Io, format!("cannot seek to next chunk: {e}"));
                break;
            }
        }
        self.recorder.set_chunk(None);

        if !seen.contains(&ChunkKind::Header) {
            self.recorder.critical(Category::Validation, "no OHDR header chunk found; model unusable");
            return ParseOutcome { model: None, recorder: self.recorder };
        }
        if model.header.num_subobjects > 0 && !seen.contains(&ChunkKind::Textures) {
            self.recorder.warning(Category::Validation, "no TXTR chunk found");
        }

        self.resolve_shield_tree(&mut model, shield_tree_chunk);

        for entry in model.header.debris_pieces {
            if let Some(id) = entry {
                if (id.0 as usize) < model.sub_objects.len() {
                    model.sub_objects[id].is_debris_model = true;
                }
                // dangling entries are the sanitizer's problem
            }
        }
        model.rebuild_children();

        ParseOutcome { model: Some(model), recorder: self.recorder }
    }

    fn parse_file_header(&mut self) -> Option<Model> {
        let magic = match self.reader.read_bytes(4, "file magic") {
            Ok(magic) => magic,
            Err(e) => {
                self.recorder.critical(Category::Io, format!("cannot read file header: {e}"));
                return None;
            }
        };
        if &*magic != b"PSPO" {
            self.recorder
                .critical(Category::Validation, format!("bad magic {magic:x?}; not a POF file"));
            return None;
        }
        let raw_version = match self.reader.read_i32("file version") {
            Ok(raw) => raw,
            Err(e) => {
                self.recorder.critical(Category::Io, format!("cannot read file version: {e}"));
                return None;
            }
        };
        self.recorder.set_version(raw_version);
        let Some(version) = Version::from_raw(raw_version) else {
            self.recorder
                .critical(Category::Validation, format!("version {raw_version} is below the supported floor of 1800"));
            return None;
        };
        Some(Model::new(std::mem::take(&mut self.filename), version))
    }

    fn dispatch_chunk(&mut self, kind: ChunkKind, model: &mut Model, shield_tree_chunk: &mut Option<Box<[u8]>>) -> Result<(), ReadError> {
        match kind {
            ChunkKind::Header => model.header = self.parse_header(model.version)?,
            ChunkKind::SubObject => {
                let subobj = self.parse_subobject()?;
                if subobj.obj_id.0 as usize != model.sub_objects.len() {
                    self.recorder.warning(
                        Category::DataIntegrity,
                        format!("subobject id {} is not dense (expected {})", subobj.obj_id, model.sub_objects.len()),
                    );
                }
                model.sub_objects.push(subobj);
            }
            ChunkKind::Textures => {
                model.textures = self.read_list("texture count", |this| {
                    let raw = this.reader.read_string("texture name")?;
                    Ok(normalize_texture_name(&raw))
                })?;
            }
            ChunkKind::SpecialPoints => {
                model.special_points = self.read_list("special point count", |this| {
                    Ok(SpecialPoint {
                        name: this.reader.read_string("special point name")?,
                        properties: this.reader.read_string("special point properties")?,
                        position: this.reader.read_vec3d("special point position")?,
                        radius: this.reader.read_f32("special point radius")?,
                    })
                })?;
            }
            ChunkKind::Paths => {
                model.paths = self.read_list("path count", |this| {
                    Ok(Path {
                        name: this.reader.read_string("path name")?,
                        parent: match this.reader.read_i32("path parent")? {
                            -1 => None,
                            parent => Some(ObjectId(parent as u32)),
                        },
                        points: this.read_list("path point count", |this| {
                            Ok(PathPoint {
                                position: this.reader.read_vec3d("path point position")?,
                                radius: this.reader.read_f32("path point radius")?,
                            })
                        })?,
                    })
                })?;
            }
            ChunkKind::GunPoints => model.gun_points = self.parse_weapon_banks()?,
            ChunkKind::MissilePoints => model.missile_points = self.parse_weapon_banks()?,
            ChunkKind::Docks => {
                model.docking_bays = self.read_list("dock count", |this| {
                    Ok(Dock {
                        properties: this.reader.read_string("dock properties")?,
                        paths: this.read_list("dock path count", |this| Ok(PathId(this.reader.read_u32("dock path id")?)))?,
                        points: this.read_list("dock point count", |this| {
                            Ok(DockingPoint {
                                position: this.reader.read_vec3d("dock point position")?,
                                normal: this.reader.read_vec3d("dock point normal")?,
                            })
                        })?,
                    })
                })?;
            }
            ChunkKind::Thrusters => {
                let version = model.version;
                model.thruster_banks = self.read_list("thruster bank count", |this| {
                    let num_glows = this.reader.read_u32("thruster glow count")?;
                    Ok(ThrusterBank {
                        properties: if version >= Version::V21_17 {
                            this.reader.read_string("thruster properties")?
                        } else {
                            String::new()
                        },
                        glows: this.read_list_n(num_glows as usize, |this| {
                            Ok(ThrusterGlow {
                                position: this.reader.read_vec3d("thruster glow position")?,
                                normal: this.reader.read_vec3d("thruster glow normal")?,
                                radius: this.reader.read_f32("thruster glow radius")?,
                            })
                        })?,
                    })
                })?;
            }
            ChunkKind::ShieldMesh => model.shield_data = Some(self.parse_shield_mesh()?),
            ChunkKind::EyePoints => {
                model.eye_points = self.read_list("eye point count", |this| {
                    Ok(EyePoint {
                        attached_subobj: ObjectId(this.reader.read_u32("eye point subobject")?),
                        offset: this.reader.read_vec3d("eye point offset")?,
                        normal: this.reader.read_vec3d("eye point normal")?,
                    })
                })?;
            }
            ChunkKind::Insignia => {
                model.insignias = self.read_list("insignia count", |this| {
                    let detail_level = this.reader.read_u32("insignia detail level")?;
                    let num_faces = this.reader.read_u32("insignia face count")?;
                    let vertices = this.read_list("insignia vertex count", |this| this.reader.read_vec3d("insignia vertex"))?;
                    let offset = this.reader.read_vec3d("insignia offset")?;
                    let faces = this.read_list_n(num_faces as usize, |this| {
                        let mut face = [InsigniaVertex { vertex_id: VertexId(0), uv: (0.0, 0.0) }; 3];
                        for corner in &mut face {
                            *corner = InsigniaVertex {
                                vertex_id: VertexId(this.reader.read_u32("insignia face vertex")?),
                                uv: (this.reader.read_f32("insignia face u")?, this.reader.read_f32("insignia face v")?),
                            };
                        }
                        Ok(face)
                    })?;
                    Ok(Insignia { detail_level, vertices, offset, faces })
                })?;
            }
            ChunkKind::AutoCenter => model.auto_center = Some(self.reader.read_vec3d("autocenter point")?),
            ChunkKind::GlowBanks => {
                model.glow_banks = self.read_list("glow bank count", |this| {
                    let disp_time = this.reader.read_i32("glow disp time")?;
                    let on_time = this.reader.read_u32("glow on time")?;
                    let off_time = this.reader.read_u32("glow off time")?;
                    let obj_parent = ObjectId(this.reader.read_u32("glow parent")?);
                    let lod = this.reader.read_u32("glow lod")?;
                    let glow_type = this.reader.read_u32("glow type")?;
                    let num_glow_points = this.reader.read_u32("glow point count")?;
                    let properties = this.reader.read_string("glow properties")?;
                    Ok(GlowPointBank {
                        disp_time,
                        on_time,
                        off_time,
                        obj_parent,
                        lod,
                        glow_type,
                        properties,
                        glow_points: this.read_list_n(num_glow_points as usize, |this| {
                            Ok(GlowPoint {
                                position: this.reader.read_vec3d("glow point position")?,
                                normal: this.reader.read_vec3d("glow point normal")?,
                                radius: this.reader.read_f32("glow point radius")?,
                            })
                        })?,
                    })
                })?;
            }
            ChunkKind::ShieldCollision => {
                // held until the chunk loop is done, so SHLD is certain to
                // have arrived (or not) before the tree is resolved
                *shield_tree_chunk = Some(self.reader.read_byte_buffer("shield collision tree")?);
            }
        }
        Ok(())
    }

    fn parse_header(&mut self, version: Version) -> Result<ObjHeader, ReadError> {
        let max_radius = self.reader.read_f32("max_radius")?;
        let obj_flags = self.reader.read_u32("object_flags")?;
        let num_subobjects = self.reader.read_u32("num_subobjects")?;
        let bounding_box = self.reader.read_bbox("model bounding box")?;

        let detail = self.read_list("detail level count", |this| this.reader.read_i32("detail level"))?;
        let debris = self.read_list("debris count", |this| this.reader.read_i32("debris piece"))?;

        let mut header = ObjHeader {
            max_radius,
            obj_flags,
            num_subobjects,
            bounding_box,
            ..ObjHeader::default()
        };
        self.fill_ref_table(&mut header.detail_levels, &detail, "detail levels");
        self.fill_ref_table(&mut header.debris_pieces, &debris, "debris pieces");

        if version >= Version::V21_00 {
            header.mass = self.reader.read_f32("mass")?;
            header.center_of_mass = self.reader.read_vec3d("center of mass")?;
            header.moment_of_inertia = Mat3d {
                rvec: self.reader.read_vec3d("moment of inertia")?,
                uvec: self.reader.read_vec3d("moment of inertia")?,
                fvec: self.reader.read_vec3d("moment of inertia")?,
            };

            let num_cross_sections = match self.reader.read_u32("cross section count")? {
                u32::MAX => 0,
                n => n,
            };
            header.cross_sections = self.read_list_n(num_cross_sections as usize, |this| {
                Ok((this.reader.read_f32("cross section depth")?, this.reader.read_f32("cross section radius")?))
            })?;

            header.bsp_lights = self
                .read_list("light count", |this| {
                    let location = this.reader.read_vec3d("light location")?;
                    let kind = this.reader.read_u32("light kind")?;
                    Ok((location, kind))
                })?
                .into_iter()
                .filter_map(|(location, kind)| match kind {
                    1 => Some(BspLight { location, kind: BspLightKind::Muzzle }),
                    2 => Some(BspLight { location, kind: BspLightKind::Thruster }),
                    _ => {
                        self.recorder
                            .warning(Category::Parsing, format!("unknown light kind {kind}, light dropped"));
                        None
                    }
                })
                .collect();
        }
        // older files stop after the debris table; the defaults from
        // ObjHeader::default() stand in for the missing fields

        Ok(header)
    }

    fn fill_ref_table(&mut self, table: &mut [Option<ObjectId>], values: &[i32], what: &str) {
        if values.len() > table.len() {
            self.recorder.warning(
                Category::DataIntegrity,
                format!("{what} table has {} entries; keeping the first {}", values.len(), table.len()),
            );
        }
        for (slot, &value) in table.iter_mut().zip(values) {
            *slot = (value >= 0).then(|| ObjectId(value as u32));
        }
    }

    /// Produces one subobject. The BSP bytes are copied into an owned buffer
    /// and not parsed here; the tree is reconstructed lazily.
    fn parse_subobject(&mut self) -> Result<SubObject, ReadError> {
        let obj_id = ObjectId(self.reader.read_u32("subobject id")?);
        self.recorder.set_sub_object(Some(obj_id));

        let radius = self.reader.read_f32("subobject radius")?;
        let parent = match self.reader.read_u32("subobject parent")? {
            u32::MAX => None,
            parent_id => Some(ObjectId(parent_id)),
        };
        let offset = self.reader.read_vec3d("subobject offset")?;
        let geo_center = self.reader.read_vec3d("subobject geometric center")?;
        let bbox = self.reader.read_bbox("subobject bounding box")?;
        let name = self.reader.read_string("subobject name")?;
        let properties = self.reader.read_string("subobject properties")?;
        let movement_kind = MovementKind::from_raw(self.reader.read_i32("subobject movement kind")?);
        let movement_axis = MovementAxis::from_raw(self.reader.read_i32("subobject movement axis")?);
        let _reserved = self.reader.read_i32("subobject reserved field")?;

        let bsp_size = self.reader.read_u32("BSP data size")?;
        let bsp_offset = self.reader.position();
        let bsp_bytes = self.reader.read_bytes(bsp_size as usize, "BSP data")?;

        Ok(SubObject {
            obj_id,
            radius,
            parent,
            offset,
            geo_center,
            bbox,
            name,
            properties,
            movement_kind,
            movement_axis,
            bsp_offset,
            bsp_bytes,
            bsp_data: None,
            bsp_parse_failed: false,
            children: vec![],
            is_debris_model: false,
        })
    }

    fn parse_weapon_banks(&mut self) -> Result<Vec<Vec<WeaponHardpoint>>, ReadError> {
        self.read_list("weapon bank count", |this| {
            this.read_list("weapon point count", |this| {
                Ok(WeaponHardpoint {
                    position: this.reader.read_vec3d("weapon point position")?,
                    normal: this.reader.read_vec3d("weapon point normal")?,
                })
            })
        })
    }

    fn parse_shield_mesh(&mut self) -> Result<ShieldData, ReadError> {
        let verts = self.read_list("shield vertex count", |this| this.reader.read_vec3d("shield vertex"))?;
        let polygons = self.read_list("shield triangle count", |this| {
            let normal = this.reader.read_vec3d("shield triangle normal")?;
            let mut tri_verts = [VertexId(0); 3];
            for vert in &mut tri_verts {
                *vert = VertexId(this.reader.read_u32("shield triangle vertex")?);
            }
            let mut neighbors = [None; 3];
            for neighbor in &mut neighbors {
                *neighbor = match this.reader.read_i32("shield triangle neighbor")? {
                    n if n < 0 => None,
                    n => Some(PolygonId(n as u32)),
                };
            }
            Ok(ShieldPolygon { normal, verts: tri_verts, neighbors })
        })?;
        Ok(ShieldData { verts, polygons, collision_tree: None })
    }

    fn resolve_shield_tree(&mut self, model: &mut Model, shield_tree_chunk: Option<Box<[u8]>>) {
        let Some(chunk) = shield_tree_chunk else { return };
        let Some(shield) = &mut model.shield_data else {
            self.recorder
                .warning(Category::DataIntegrity, "SLDC collision tree without a SHLD shield mesh, ignored");
            return;
        };

        // per-vertex normals for the pool, averaged from adjacent faces
        let mut norms = vec![Vec3d::ZERO; shield.verts.len()];
        let mut bad_vert = false;
        for poly in &shield.polygons {
            for vert in poly.verts {
                match norms.get_mut(vert.0 as usize) {
                    Some(norm) => *norm += poly.normal,
                    None => bad_vert = true,
                }
            }
        }
        if bad_vert {
            self.recorder
                .warning(Category::DataIntegrity, "shield triangles reference vertices outside the shield vertex table");
        }
        for norm in &mut norms {
            *norm = norm.normalize();
        }

        self.recorder.set_chunk(Some("SLDC".into()));
        shield.collision_tree =
            bsp::parse_tree_with_pool(&chunk, model.version, shield.verts.clone(), norms, &mut self.recorder, &self.cancel);
        self.recorder.set_chunk(None);
    }

    fn read_list<T>(&mut self, what: &'static str, f: impl FnMut(&mut Self) -> Result<T, ReadError>) -> Result<Vec<T>, ReadError> {
        let n = self.reader.read_u32(what)? as usize;
        self.read_list_n(n, f)
    }

    fn read_list_n<T>(&mut self, n: usize, mut f: impl FnMut(&mut Self) -> Result<T, ReadError>) -> Result<Vec<T>, ReadError> {
        (0..n).map(|_| f(self)).collect()
    }
}

impl Model {
    /// Parses every still-lazy BSP tree in place. Returns false if cancelled.
    pub fn ensure_bsp_trees(&mut self, recorder: &mut ErrorRecorder, cancel: &CancelToken) -> bool {
        let version = self.version;
        for subobj in &mut self.sub_objects {
            if subobj.bsp_data.is_some() || subobj.bsp_parse_failed {
                continue;
            }
            recorder.set_sub_object(Some(subobj.obj_id));
            match bsp::parse_bsp_data(&subobj.bsp_bytes, version, recorder, cancel) {
                Some(bsp_data) => subobj.bsp_data = Some(bsp_data),
                None => {
                    if cancel.is_cancelled() {
                        recorder.set_sub_object(None);
                        return false;
                    }
                    // unusable stream; already recorded, don't retry on reruns
                    subobj.bsp_parse_failed = true;
                }
            }
        }
        recorder.set_sub_object(None);
        true
    }
}

fn normalize_texture_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let base = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}.{}", ext.to_ascii_lowercase()),
        _ => format!("{base}{DEFAULT_TEXTURE_EXTENSION}"),
    }
}
