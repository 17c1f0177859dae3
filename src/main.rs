use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::LevelFilter;
use simplelog::{Config, SimpleLogger};

use pof_core::{
    extract_meshes, parse_file, sanitize, validate, CancelToken, ChunkKind, ErrorRecorder, Model,
    Severity, Support, Texturing,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "POF model inspection and mesh extraction", long_about = None)]
struct Args {
    /// Print debug-level log output
    #[clap(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a file and report its chunk inventory and compatibility
    Analyze { path: PathBuf },
    /// Parse, sanitize and validate a file, then dump the typed model
    Extract { path: PathBuf },
    /// Parse a file and report the extracted triangle meshes
    Mesh { path: PathBuf },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Warn };
    let _ = SimpleLogger::init(level, Config::default());

    let result = match args.command {
        Command::Analyze { path } => analyze(path),
        Command::Extract { path } => extract(path),
        Command::Mesh { path } => mesh(path),
    };

    match result {
        Ok(recorder) => {
            if !recorder.events().is_empty() {
                eprint!("{}", recorder.format_report());
            }
            match recorder.worst_severity() {
                Some(Severity::Critical) => ExitCode::from(2),
                Some(Severity::Error) => ExitCode::from(1),
                _ => ExitCode::SUCCESS,
            }
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(2)
        }
    }
}

fn analyze(path: PathBuf) -> Result<ErrorRecorder, std::io::Error> {
    let file = std::fs::File::open(&path)?;
    let filename = path.display().to_string();
    let parser = pof_core::Parser::new(file, filename)?.with_progress(|chunk| {
        let kind = match chunk.kind {
            Some(_) => "known",
            None => "unknown",
        };
        println!("{:#010x}  {}  {:>10} bytes  ({kind})", chunk.offset, chunk.id, chunk.len);
    });
    let outcome = parser.parse();

    if let Some(model) = &outcome.model {
        println!();
        println!("version:      {}", model.version);
        println!("subobjects:   {}", model.sub_objects.len());
        println!("textures:     {}", model.textures.len());
        for kind in [ChunkKind::ShieldCollision, ChunkKind::Thrusters] {
            if kind.support_at(model.version) == Support::Unsupported {
                println!("note: {kind:?} chunks are not supported at this version");
            }
        }
    }
    Ok(outcome.recorder)
}

fn extract(path: PathBuf) -> Result<ErrorRecorder, std::io::Error> {
    let outcome = parse_file(&path)?;
    let mut recorder = outcome.recorder;
    let Some(mut model) = outcome.model else { return Ok(recorder) };

    let summary = sanitize(&mut model, &mut recorder, &CancelToken::new());
    if summary != Default::default() {
        log::warn!(
            "sanitizer repaired {} parents, {} detail entries, {} debris entries; pruned {} textures",
            summary.parents_repaired,
            summary.detail_entries_repaired,
            summary.debris_entries_repaired,
            summary.textures_pruned
        );
    }
    let report = validate(&model, &mut recorder);

    dump_model(&model);
    println!();
    println!(
        "validation: {} ({} checks flagged, {} polygons)",
        if report.passed { "passed" } else { "FAILED" },
        report.checks_failed,
        report.num_polygons
    );
    Ok(recorder)
}

fn mesh(path: PathBuf) -> Result<ErrorRecorder, std::io::Error> {
    let outcome = parse_file(&path)?;
    let mut recorder = outcome.recorder;
    let Some(mut model) = outcome.model else { return Ok(recorder) };
    sanitize(&mut model, &mut recorder, &CancelToken::new());

    for (id, mesh) in extract_meshes(&model) {
        let name = &model.sub_objects[id].name;
        println!("subobject {id} ({name}): {} vertices, {} triangles", mesh.vertices.len(), mesh.triangle_count());
        for (texturing, buffer) in &mesh.index_buffers {
            let label = match texturing {
                Texturing::Texture(slot) => model
                    .textures
                    .get(slot.0 as usize)
                    .cloned()
                    .unwrap_or_else(|| format!("slot {slot}")),
                Texturing::Untextured => "(untextured)".to_string(),
            };
            println!("  {label}: {} triangles", buffer.len() / 3);
        }
    }
    Ok(recorder)
}

fn dump_model(model: &Model) {
    println!("{}  (version {})", model.filename, model.version);
    println!("radius {:.3}, {} polygons", model.header.max_radius, model.polygon_count());
    println!();
    println!("textures:");
    for (i, texture) in model.textures.iter().enumerate() {
        println!("  [{i}] {texture}");
    }
    println!();
    println!("subobjects:");
    for subobj in &model.sub_objects {
        let parent = match subobj.parent {
            Some(parent) => format!("parent {parent}"),
            None => "root".to_string(),
        };
        let polys = subobj.bsp_data.as_ref().map_or(0, |bsp| bsp.tree.polygon_count());
        let debris = if subobj.is_debris_model { ", debris" } else { "" };
        println!("  {} ({}): {parent}, {polys} polygons{debris}", subobj.obj_id, subobj.name);
    }
    if !model.special_points.is_empty() {
        println!();
        println!("special points: {}", model.special_points.len());
    }
    if !model.paths.is_empty() {
        println!("paths: {}", model.paths.len());
    }
    if !model.docking_bays.is_empty() {
        println!("docking bays: {}", model.docking_bays.len());
    }
    if !model.thruster_banks.is_empty() {
        println!("thruster banks: {}", model.thruster_banks.len());
    }
    if let Some(shield) = &model.shield_data {
        println!("shield: {} triangles", shield.polygons.len());
    }
}
