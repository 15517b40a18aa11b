//! The download run: fan sampled locations out over a bounded worker pool,
//! resolve each one, claim its coordinate key, fetch and save the image, and
//! finally write the metadata store once.

use indicatif::ParallelProgressIterator;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::DownloadSettings;
use crate::coordinate_key::CoordinateKey;
use crate::error::{DatasetError, Result};
use crate::imagery::{
    FetchError, ImageRequest, ImageryProvider, Panorama, ResolveError, lat_lng_string,
};
use crate::locations::Location;
use crate::metadata;
use crate::sampler::SampledSet;
use crate::tracker::{CollisionKind, DedupTracker, Recorded, RunStats};

/// What happened to one location.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Saved(CoordinateKey, PathBuf),
    /// Recorded without fetching (metadata-only runs).
    Recorded(CoordinateKey),
    Collision(CoordinateKey, CollisionKind),
    ResolveFailed(ResolveError),
    FetchFailed(FetchError),
}

#[derive(Debug)]
pub struct DownloadReport {
    pub stats: RunStats,
    pub metadata_entries: usize,
    pub outcomes: Vec<TaskOutcome>,
    pub elapsed: Duration,
}

/// Shared by every task of one run.
struct RunContext<'a> {
    provider: &'a dyn ImageryProvider,
    tracker: DedupTracker,
    settings: &'a DownloadSettings,
}

fn region_dir(output_dir: &Path, region: &str) -> PathBuf {
    output_dir.join(region)
}

/// `<coordinate key>.jpg`, so the file stem is the image's metadata key.
pub fn image_file_name(point: geo::Point) -> String {
    format!("{}.jpg", CoordinateKey::from(point))
}

pub fn run(
    provider: &dyn ImageryProvider,
    sampled: &SampledSet,
    settings: &DownloadSettings,
) -> Result<DownloadReport> {
    info!("Download images started ({})", provider.name());

    metadata::ensure_writable(&settings.metadata_path)?;
    if !settings.metadata_only {
        for region in sampled {
            let dir = region_dir(&settings.output_dir, &region.region);
            fs::create_dir_all(&dir).map_err(|e| DatasetError::io(&dir, e))?;
        }
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.threads.max(1))
        .build()?;

    let ctx = RunContext {
        provider,
        tracker: DedupTracker::new(),
        settings,
    };

    let start = Instant::now();
    let mut outcomes = Vec::new();

    for region in sampled {
        info!("Downloading images for {}...", region.region);
        let dir = region_dir(&settings.output_dir, &region.region);

        let region_outcomes: Vec<TaskOutcome> = pool.install(|| {
            region
                .items
                .par_iter()
                .progress()
                .map(|location| process_location(&ctx, location, &dir))
                .collect()
        });

        debug!(
            region = %region.region,
            tasks = region_outcomes.len(),
            new = region_outcomes
                .iter()
                .filter(|o| matches!(o, TaskOutcome::Saved(..) | TaskOutcome::Recorded(_)))
                .count(),
            "region done"
        );
        outcomes.extend(region_outcomes);
    }

    let elapsed = start.elapsed();
    let stats = ctx.tracker.stats();

    info!("Images downloaded in {:.2} seconds", elapsed.as_secs_f64());
    info!("Downloaded images: {}", ctx.tracker.len());
    info!(
        "Collisions: exact={}, close={}",
        stats.collisions.exact, stats.collisions.close
    );
    info!(
        "Fails: request_failed={}, download_failed={}, no_image={}, no_lat_lng={}",
        stats.fails.request_failed,
        stats.fails.download_failed,
        stats.fails.no_image,
        stats.fails.no_lat_lng
    );

    let store = ctx.tracker.into_store();
    metadata::save(&settings.metadata_path, &store)?;

    Ok(DownloadReport {
        stats,
        metadata_entries: store.len(),
        outcomes,
        elapsed,
    })
}

fn process_location(ctx: &RunContext<'_>, location: &Location, dir: &Path) -> TaskOutcome {
    let panorama = match ctx.provider.resolve(location.point) {
        Ok(panorama) => panorama,
        Err(e) => {
            warn!("{}; image: {}", e, lat_lng_string(location.point));
            ctx.tracker.count_resolve_failure(&e);
            return TaskOutcome::ResolveFailed(e);
        }
    };

    let key = match ctx
        .tracker
        .record(&panorama, &location.region, ctx.settings.heading)
    {
        Recorded::New(key) => key,
        Recorded::Collision(key, kind) => return TaskOutcome::Collision(key, kind),
    };

    if ctx.settings.metadata_only {
        return TaskOutcome::Recorded(key);
    }

    match download(ctx, &panorama, dir) {
        Ok(path) => {
            ctx.tracker.count_downloaded();
            TaskOutcome::Saved(key, path)
        }
        Err(e) => {
            warn!("{}; image: {}", e, lat_lng_string(panorama.point));
            ctx.tracker.count_fetch_failure(&e);
            ctx.tracker.release(&key);
            TaskOutcome::FetchFailed(e)
        }
    }
}

fn download(
    ctx: &RunContext<'_>,
    panorama: &Panorama,
    dir: &Path,
) -> std::result::Result<PathBuf, FetchError> {
    let settings = ctx.settings;
    let request = ImageRequest {
        point: panorama.point,
        size: settings.image_size,
        heading: settings.heading,
        pitch: settings.pitch,
        fov: settings.fov,
    };

    let bytes = ctx.provider.fetch(&request)?;

    let path = dir.join(image_file_name(panorama.point));
    fs::write(&path, &bytes).map_err(|e| {
        FetchError::DownloadFailed(format!("could not write {}: {}", path.display(), e))
    })?;
    Ok(path)
}
