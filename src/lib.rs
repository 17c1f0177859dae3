//! Parsing and mesh-extraction core for POF (Parallax Object Format) model
//! files: a chunked binary container holding a subobject hierarchy, per
//! subobject a BSP tree of textured polygons, and attachment metadata.

mod bsp;
mod error;
mod mesh;
mod parse;
mod read;
mod sanitize;
mod types;
mod validate;
mod version;

pub use bsp::{parse_bsp_data, parse_tree_with_pool};
pub use error::{CancelToken, Category, ErrorRecorder, Event, EventContext, Severity};
pub use mesh::{extract_mesh, extract_meshes, MeshVertex, SubObjectMesh};
pub use parse::{parse_file, ChunkInfo, ParseOutcome, Parser};
pub use read::{ChunkId, ReadError, Reader};
pub use sanitize::{sanitize, SanitizeSummary};
pub use types::*;
pub use validate::{validate, ValidationReport};
pub use version::{ChunkKind, Support, Version};
