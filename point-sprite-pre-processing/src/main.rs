/// Point manifest to atlas and vertex buffer converter entry point
use clap::Parser;
use log::{error, info, LevelFilter};
use point_sprite_pre_processing::config::{AtlasCountPolicy, PipelineConfig};
use point_sprite_pre_processing::pipeline::ingest_manifest;
use point_sprite_pre_processing::scene_manifest::{AtlasFiles, ManifestGenerator};
use point_sprite_pre_processing::sink::{AtlasFileWriter, AtlasFormat};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "point-sprite-pre-processing",
    about = "Packs images named by a point manifest into GPU atlases and a point-sprite vertex buffer"
)]
struct Cli {
    /// Manifest with one `x y z [source]` record per line
    manifest: PathBuf,

    /// Prepended to every source named in the manifest
    #[arg(long)]
    prefix: Option<String>,

    /// Directory receiving atlases, vertices.bin and manifest.json
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Directory relative local sources resolve against
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Atlas size as WIDTHxHEIGHT
    #[arg(long, value_parser = parse_dimensions)]
    atlas_size: Option<(u32, u32)>,

    /// Thumbnail cell size as WIDTHxHEIGHT
    #[arg(long, value_parser = parse_dimensions)]
    cell_size: Option<(u32, u32)>,

    /// Atlas count planning policy
    #[arg(long, value_enum)]
    policy: Option<AtlasCountPolicy>,

    /// Image acquisition workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Records dispatched to the workers at a time
    #[arg(long)]
    queue_depth: Option<usize>,

    /// Atlas file format
    #[arg(long, value_enum, default_value_t = AtlasFormat::Dds)]
    atlas_format: AtlasFormat,

    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only log warnings and errors, no progress bar
    #[arg(short, long)]
    quiet: bool,
}

/// Parses `WIDTHxHEIGHT`.
fn parse_dimensions(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", value))?;
    let width = width.trim().parse::<u32>().map_err(|e| format!("bad width: {}", e))?;
    let height = height.trim().parse::<u32>().map_err(|e| format!("bad height: {}", e))?;
    Ok((width, height))
}

fn setup_logger(quiet: bool) {
    let mut builder = env_logger::Builder::new();

    if std::env::var("RUST_LOG").is_ok() {
        builder.parse_env("RUST_LOG");
    } else {
        let level = if quiet {
            LevelFilter::Warn
        } else if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };
        builder.filter(None, LevelFilter::Warn);
        builder.filter(Some("point_sprite_pre_processing"), level);
    }

    builder.format_timestamp_millis();
    builder.init();
}

/// Layers CLI flags over the file or default configuration.
fn build_config(cli: &Cli) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(prefix) = &cli.prefix {
        config.prefix = Some(prefix.clone());
    }
    if let Some(base_dir) = &cli.base_dir {
        config.base_dir = Some(base_dir.clone());
    }
    if let Some((width, height)) = cli.atlas_size {
        config.atlas_width = width;
        config.atlas_height = height;
    }
    if let Some((width, height)) = cli.cell_size {
        config.cell_width = width;
        config.cell_height = height;
    }
    if let Some(policy) = cli.policy {
        config.atlas_count_policy = policy;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(depth) = cli.queue_depth {
        config.queue_depth = depth;
    }
    config.show_progress = !cli.quiet;

    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    setup_logger(cli.quiet);

    let config = build_config(&cli)?;
    let mut writer = AtlasFileWriter::new(&cli.output_dir, cli.atlas_format)?;

    let output = match ingest_manifest(&cli.manifest, config, &mut writer) {
        Ok(output) => output,
        Err(e) => {
            error!("Failed to ingest '{}': {}", cli.manifest.display(), e);
            return Err(e.into());
        }
    };

    let atlases = AtlasFiles {
        format: writer.format(),
        files: writer.files().to_vec(),
    };
    ManifestGenerator::new(&cli.output_dir).write_scene(
        output.layout,
        atlases,
        &output.vertices,
        output.report,
    )?;

    info!("Output written to {}", cli.output_dir.display());
    Ok(())
}
