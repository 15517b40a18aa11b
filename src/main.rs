mod config;
mod coordinate_key;
mod download;
mod error;
mod geo_lookup;
mod imagery;
mod locations;
mod logging;
mod metadata;
mod postprocess;
mod preview;
mod sampler;
mod tracker;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use config::DownloadSettings;
use geo_lookup::RegionIndex;
use imagery::ImageSize;
use imagery::streetview::StreetViewClient;

/// Builds a street-level image dataset: sample locations per region, download
/// the nearest panoramas, then crop them and weed out placeholders.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log file, appended to on every run
    #[arg(long, global = true, default_value = config::LOGS_FILE)]
    log_file: PathBuf,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample locations and download one image per distinct panorama
    Download(DownloadArgs),
    /// Crop the bottom watermark off every image and resize
    Crop {
        #[arg(short, long, default_value = config::OUTPUT_DIR)]
        input: PathBuf,
        #[arg(short, long, default_value = config::CROPPED_DIR)]
        output: PathBuf,
        #[arg(long, default_value_t = config::CROP_WIDTH)]
        width: u32,
        #[arg(long, default_value_t = config::CROP_HEIGHT)]
        height: u32,
    },
    /// Delete "no imagery" placeholders and their metadata entries
    Clean {
        #[arg(short, long, default_value = config::OUTPUT_DIR)]
        images: PathBuf,
        #[arg(short, long, default_value = config::BACKUP_DIR)]
        backup: PathBuf,
        #[arg(short, long, default_value = config::METADATA_FILE)]
        metadata: PathBuf,
    },
    /// Fill in missing municipalities of a locations file from boundaries
    AssignRegions {
        #[arg(short, long, default_value = config::LOCATIONS_FILE)]
        locations: PathBuf,
        /// GeoJSON FeatureCollection with `local_name` properties
        #[arg(short, long)]
        boundaries: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    api_key: String,

    #[arg(short, long, default_value = config::LOCATIONS_FILE)]
    locations: PathBuf,

    #[arg(short, long, default_value = config::OUTPUT_DIR)]
    output: PathBuf,

    #[arg(short, long, default_value = config::METADATA_FILE)]
    metadata: PathBuf,

    #[arg(short, long, default_value_t = config::THREADS)]
    threads: usize,

    /// Images requested per region, split over its cities
    #[arg(long, default_value_t = config::IMAGES_PER_REGION)]
    per_region: usize,

    /// Only sample these regions (repeatable)
    #[arg(long = "region")]
    regions: Vec<String>,

    #[arg(long, default_value = config::IMAGE_SIZE)]
    size: ImageSize,

    /// Search radius around each location, in meters
    #[arg(long, default_value_t = config::SEARCH_RADIUS_M)]
    radius: u32,

    #[arg(long, default_value_t = config::HEADING)]
    heading: f64,

    #[arg(long, default_value_t = config::PITCH)]
    pitch: f64,

    #[arg(long, default_value_t = config::FIELD_OF_VIEW)]
    fov: f64,

    #[arg(long, default_value_t = config::HTTP_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Write the sampled locations as GeoJSON
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Resolve and record panoramas without downloading images
    #[arg(long)]
    metadata_only: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(&cli.log_file, cli.verbose)?;

    match cli.command {
        Commands::Download(args) => download(args),
        Commands::Crop {
            input,
            output,
            width,
            height,
        } => {
            postprocess::crop_tree(&input, &output, width, height)
                .context("Cropping failed")?;
            Ok(())
        }
        Commands::Clean {
            images,
            backup,
            metadata,
        } => {
            let mut store = metadata::load(&metadata).context("Failed to read metadata")?;
            postprocess::remove_placeholders(&images, &backup, &mut store)
                .context("Removing placeholders failed")?;
            metadata::save(&metadata, &store).context("Failed to write metadata")?;
            Ok(())
        }
        Commands::AssignRegions {
            locations,
            boundaries,
            output,
        } => {
            let index = RegionIndex::load(&boundaries).context("Failed to load boundaries")?;
            let mut records =
                locations::read_records(&locations).context("Failed to read locations")?;
            geo_lookup::assign_regions(&index, &mut records);
            locations::write_records(&output, &records).context("Failed to write locations")?;
            info!("Wrote {} locations to {}", records.len(), output.display());
            Ok(())
        }
    }
}

fn download(args: DownloadArgs) -> anyhow::Result<()> {
    let allowed: Option<HashSet<String>> =
        (!args.regions.is_empty()).then(|| args.regions.into_iter().collect());

    let locations = locations::load_locations(&args.locations, allowed.as_ref())
        .context("Failed to load locations")?;
    let sampled = sampler::sample_locations(locations, args.per_region);

    if let Some(path) = &args.preview {
        preview::write_preview(path, &sampled).context("Failed to write preview")?;
    }

    let client = StreetViewClient::new(
        args.api_key,
        args.radius,
        Duration::from_secs(args.timeout_secs),
    )
    .context("Failed to create HTTP client")?;

    let settings = DownloadSettings {
        threads: args.threads,
        output_dir: args.output,
        metadata_path: args.metadata,
        image_size: args.size,
        heading: args.heading,
        pitch: args.pitch,
        fov: args.fov,
        metadata_only: args.metadata_only,
    };

    let report = download::run(&client, &sampled, &settings).context("Download run failed")?;
    info!(
        "Processed {} locations in {:.1}s, {} images in {}",
        report.outcomes.len(),
        report.elapsed.as_secs_f64(),
        report.metadata_entries,
        settings.metadata_path.display()
    );
    Ok(())
}
