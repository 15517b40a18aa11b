use std::path::PathBuf;

use crate::imagery::ImageSize;

pub const THREADS: usize = 32;
pub const IMAGE_SIZE: &str = "224x224";
pub const IMAGES_PER_REGION: usize = 50;
// search within this many meters of the location
pub const SEARCH_RADIUS_M: u32 = 100;
pub const HTTP_TIMEOUT_SECS: u64 = 30;

pub const HEADING: f64 = 0.0;
pub const PITCH: f64 = 0.0;
pub const FIELD_OF_VIEW: f64 = 90.0;

pub const OUTPUT_DIR: &str = "./streetview_images/";
pub const CROPPED_DIR: &str = "./streetview_images_cropped/";
pub const BACKUP_DIR: &str = "./streetview_images_backup/";
pub const LOCATIONS_FILE: &str = "./data/locations.json";
pub const METADATA_FILE: &str = "./data/metadata.json";
pub const LOGS_FILE: &str = "./data/logs.log";

pub const CROP_WIDTH: u32 = 224;
pub const CROP_HEIGHT: u32 = 224;

/// Everything a download run needs besides the provider and the locations.
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub threads: usize,
    pub output_dir: PathBuf,
    pub metadata_path: PathBuf,
    pub image_size: ImageSize,
    pub heading: f64,
    pub pitch: f64,
    pub fov: f64,
    /// Resolve and record only, never fetch image bytes.
    pub metadata_only: bool,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        DownloadSettings {
            threads: THREADS,
            output_dir: PathBuf::from(OUTPUT_DIR),
            metadata_path: PathBuf::from(METADATA_FILE),
            image_size: ImageSize {
                width: CROP_WIDTH,
                height: CROP_HEIGHT,
            },
            heading: HEADING,
            pitch: PITCH,
            fov: FIELD_OF_VIEW,
            metadata_only: false,
        }
    }
}
