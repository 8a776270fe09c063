use std::error::Error;
use std::fs::File;
use std::io::Write as _;
use std::time::Duration;

use clap::Parser;

mod bounds;
mod curve;
mod engine;
mod export;
mod grid;
mod mask;
mod oplog;
mod placement;
mod snapshot;
mod stamp;
mod storage;
mod task;
mod tile;
mod world;

use engine::StampRun;
use mask::{MaskSource, NoiseMaskParams};
use oplog::{OperationEntry, OperationKind, OperationSink, VecSink};
use placement::{PlacementState, StampOperation};
use stamp::StampSource;
use storage::{FileTileStorage, TileId, TileRecord, TileStorage};
use task::{StepOutcome, FRAME_BUDGET};
use world::{FlattenRun, SmoothRun, TileDescriptor, WorldManager};

#[derive(Parser, Debug)]
#[command(name = "terrain_stamp")]
#[command(about = "Stamp pre-scanned height patterns onto a tiled terrain world")]
struct Args {
    /// World directory holding the tile files
    #[arg(short = 'w', long)]
    world_dir: String,

    /// Vertical range of the world in world units
    #[arg(long, default_value = "200.0")]
    world_height: f32,

    /// Create a fresh demo world in the world directory before editing
    #[arg(long)]
    create_demo: bool,

    /// Demo world: tiles along each axis
    #[arg(long, default_value = "2")]
    demo_tiles: usize,

    /// Demo world: samples per tile side
    #[arg(long, default_value = "128")]
    demo_resolution: usize,

    /// Demo world: tile edge length in world units
    #[arg(long, default_value = "100.0")]
    demo_tile_size: f32,

    /// Demo world: initial normalized height
    #[arg(long, default_value = "0.25")]
    demo_height: f32,

    /// Stamp record to apply
    #[arg(short = 's', long)]
    stamp: Option<String>,

    /// Invert the stamp buffer before applying
    #[arg(long)]
    invert_stamp: bool,

    /// Normalize the stamp buffer to the full [0,1] range before applying
    #[arg(long)]
    normalize_stamp: bool,

    /// Placement X in world units
    #[arg(short = 'x', long, default_value = "0.0")]
    x: f32,

    /// Placement Y (base elevation offset) in world units
    #[arg(short = 'y', long, default_value = "0.0")]
    y: f32,

    /// Placement Z in world units
    #[arg(short = 'z', long, default_value = "0.0")]
    z: f32,

    /// Rotation around the vertical axis in degrees
    #[arg(short = 'r', long, default_value = "0.0")]
    rotation: f32,

    /// Horizontal footprint scale
    #[arg(long, default_value = "1.0")]
    width_scale: f32,

    /// Vertical scale
    #[arg(long, default_value = "1.0")]
    height_scale: f32,

    /// Blend operation: raise, lower, blend, difference, stencil
    #[arg(short = 'o', long, default_value = "raise")]
    operation: String,

    /// Mix factor for the blend operation (0-1)
    #[arg(long, default_value = "0.5")]
    blend_strength: f32,

    /// Physical offset for the stencil operation in world units
    #[arg(long, default_value = "0.0")]
    stencil_height: f32,

    /// Distance falloff: constant, linear, smooth
    #[arg(long, default_value = "constant")]
    falloff: String,

    /// Grayscale image used as a stamp mask
    #[arg(long)]
    mask_image: Option<String>,

    /// Seed for a procedural noise mask (used when no mask image is given)
    #[arg(long)]
    mask_noise_seed: Option<u32>,

    /// Flatten the whole world to this normalized height
    #[arg(long)]
    flatten: Option<f32>,

    /// Apply one 3x3 box smoothing pass to the whole world
    #[arg(long)]
    smooth: bool,

    /// Export the height map to this PNG path
    #[arg(long)]
    export_height: Option<String>,

    /// Use the spectral colormap for the height export
    #[arg(long)]
    export_colored: bool,

    /// Export a normal map to this PNG path
    #[arg(long)]
    export_normals: Option<String>,

    /// Export a shoreline mask to this PNG path
    #[arg(long)]
    export_shoreline: Option<String>,

    /// Normalized water level for the shoreline mask
    #[arg(long, default_value = "0.2")]
    water_level: f32,

    /// Shoreline falloff width in samples
    #[arg(long, default_value = "16.0")]
    shore_falloff: f32,

    /// Export the layer blend weights to this PNG path
    #[arg(long)]
    export_layers: Option<String>,

    /// Append the session's operation log entries to this JSON-lines file
    #[arg(long)]
    oplog: Option<String>,
}

fn parse_operation(name: &str) -> Result<StampOperation, String> {
    match name {
        "raise" => Ok(StampOperation::Raise),
        "lower" => Ok(StampOperation::Lower),
        "blend" => Ok(StampOperation::Blend),
        "difference" => Ok(StampOperation::Difference),
        "stencil" => Ok(StampOperation::Stencil),
        other => Err(format!("unknown operation '{}'", other)),
    }
}

fn parse_falloff(name: &str) -> Result<curve::Curve, String> {
    match name {
        "constant" => Ok(curve::Curve::Constant(1.0)),
        "linear" => Ok(curve::Curve::LinearFade),
        "smooth" => Ok(curve::Curve::SmoothFade),
        other => Err(format!("unknown falloff '{}'", other)),
    }
}

/// Write a dense grid of flat tiles centered on the origin.
fn create_demo_world(args: &Args) -> Result<(), Box<dyn Error>> {
    let mut storage = FileTileStorage::new(&args.world_dir);
    let tiles = args.demo_tiles;
    let size = args.demo_tile_size;
    let min = -(tiles as f32) * size * 0.5;

    for gz in 0..tiles {
        for gx in 0..tiles {
            let id = TileId::new(gx as u32, gz as u32);
            let record = TileRecord::flat(
                (min + gx as f32 * size, min + gz as f32 * size),
                size,
                args.demo_resolution,
                args.demo_height,
            );
            storage.write_record(id, &record)?;
        }
    }

    println!(
        "Created {}x{} demo world ({} samples per tile side) in {}",
        tiles, tiles, args.demo_resolution, args.world_dir
    );
    Ok(())
}

fn open_world(args: &Args) -> Result<WorldManager<FileTileStorage>, Box<dyn Error>> {
    let storage = FileTileStorage::new(&args.world_dir);
    let ids = storage.list_tiles()?;
    let mut descriptors = Vec::with_capacity(ids.len());
    for id in ids {
        let record = storage.load_tile(id)?;
        descriptors.push(TileDescriptor::from_record(id, &record));
    }

    let world = WorldManager::new(storage, &descriptors, args.world_height)?;
    let (tx, tz) = world.tile_count();
    let (sx, sz) = world.total_samples();
    println!("Opened world: {}x{} tiles, {}x{} samples", tx, tz, sx, sz);
    Ok(world)
}

fn build_placement(args: &Args) -> Result<PlacementState, Box<dyn Error>> {
    let mut placement =
        PlacementState::new([args.x, args.y, args.z], parse_operation(&args.operation)?);
    placement.rotation_deg = args.rotation;
    placement.width_scale = args.width_scale;
    placement.height_scale = args.height_scale;
    placement.blend_strength = args.blend_strength;
    placement.stencil_height_wu = args.stencil_height;
    placement.falloff = parse_falloff(&args.falloff)?;

    if let Some(path) = &args.mask_image {
        placement.mask = Some(MaskSource::Image(path.into()).resolve()?);
        println!("Resolved mask from {}", path);
    } else if let Some(seed) = args.mask_noise_seed {
        let params = NoiseMaskParams {
            seed,
            ..NoiseMaskParams::default()
        };
        placement.mask = Some(MaskSource::Noise(params).resolve()?);
        println!("Resolved noise mask (seed {})", seed);
    }

    Ok(placement)
}

fn apply_stamp(
    world: &mut WorldManager<FileTileStorage>,
    path: &str,
    args: &Args,
    sink: &mut VecSink,
) -> Result<(), Box<dyn Error>> {
    let mut stamp = StampSource::load(path)?;
    println!(
        "Loaded stamp: {} samples/side, {:.1}x{:.1} wu",
        stamp.resolution(),
        stamp.scan_width_wu,
        stamp.scan_depth_wu
    );
    if args.invert_stamp {
        stamp.invert();
    }
    if args.normalize_stamp {
        stamp.normalize();
    }

    let placement = build_placement(args)?;
    let mut run = StampRun::new(world, &stamp, placement, sink)?;
    loop {
        match run.step(FRAME_BUDGET)? {
            StepOutcome::Complete => break,
            StepOutcome::InProgress => {
                println!("Stamping... {:.0}%", run.progress() * 100.0);
            }
            StepOutcome::Cancelled => {
                println!("Stamping cancelled");
                return Ok(());
            }
        }
    }
    println!("Stamp applied");
    Ok(())
}

fn run_session(args: &Args) -> Result<(), Box<dyn Error>> {
    if args.create_demo {
        create_demo_world(args)?;
    }

    let mut world = open_world(args)?;
    let mut sink = VecSink::new();

    if let Some(path) = &args.stamp {
        world.load_from_world()?;
        apply_stamp(&mut world, path, args, &mut sink)?;
    }

    if let Some(height) = args.flatten {
        world.load_from_world()?;
        sink.record(OperationEntry::new(
            OperationKind::Flatten,
            format!("flatten to {}", height),
        ));
        let mut run = FlattenRun::new(&mut world, height);
        while run.step(Duration::from_millis(100)) == StepOutcome::InProgress {}
        world.save_to_world(false)?;
        println!("Flattened world to {}", height);
    }

    if args.smooth {
        world.load_from_world()?;
        sink.record(OperationEntry::new(OperationKind::Smooth, "3x3 box smooth"));
        let mut run = SmoothRun::new(&mut world);
        while run.step(Duration::from_millis(100)) == StepOutcome::InProgress {}
        world.save_to_world(false)?;
        println!("Smoothed world");
    }

    if args.export_height.is_some()
        || args.export_normals.is_some()
        || args.export_shoreline.is_some()
        || args.export_layers.is_some()
    {
        world.load_from_world()?;
    }

    if let Some(path) = &args.export_height {
        sink.record(OperationEntry::new(
            OperationKind::Export,
            format!("height map -> {}", path),
        ));
        export::export_height_map(&world, path, args.export_colored)?;
        println!("Exported height map to {}", path);
    }

    if let Some(path) = &args.export_normals {
        sink.record(OperationEntry::new(
            OperationKind::Export,
            format!("normal map -> {}", path),
        ));
        export::export_normal_map(&world, path)?;
        println!("Exported normal map to {}", path);
    }

    if let Some(path) = &args.export_shoreline {
        sink.record(OperationEntry::new(
            OperationKind::Export,
            format!("shoreline mask -> {}", path),
        ));
        export::export_shoreline_mask(&world, path, args.water_level, args.shore_falloff)?;
        println!("Exported shoreline mask to {}", path);
    }

    if let Some(path) = &args.export_layers {
        sink.record(OperationEntry::new(
            OperationKind::Export,
            format!("layer weights -> {}", path),
        ));
        export::export_layer_weights(&world, path)?;
        println!("Exported layer weights to {}", path);
    }

    if world.bounds_errors() > 0 {
        println!(
            "Absorbed {} out-of-bounds point queries",
            world.bounds_errors()
        );
    }

    if let Some(path) = &args.oplog {
        let mut file = File::create(path)?;
        for entry in &sink.entries {
            writeln!(file, "{}", entry.to_json()?)?;
        }
        println!("Wrote {} operation log entries to {}", sink.entries.len(), path);
    }

    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run_session(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
