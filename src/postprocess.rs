//! Passes over an already downloaded image tree: cropping the watermark off
//! and clearing out "no imagery here" placeholders.

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use indicatif::ParallelProgressIterator;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::coordinate_key::CoordinateKey;
use crate::error::{DatasetError, Result};
use crate::metadata::MetadataStore;

/// Size of the provider's "Sorry, we have no imagery here" image.
pub const PLACEHOLDER_SIZE_BYTES: u64 = 3810;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

fn image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(DatasetError::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        ));
    }
    Ok(WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file() && is_image(entry.path()))
        .map(|entry| entry.into_path())
        .collect())
}

fn mirrored(path: &Path, from: &Path, to: &Path) -> PathBuf {
    match path.strip_prefix(from) {
        Ok(relative) => to.join(relative),
        Err(_) => to.join(path.file_name().unwrap_or_default()),
    }
}

/// Keeps the top-left `width` x `min(height, image height)` region, dropping the
/// watermark strip at the bottom, then scales to exactly `width` x `height`.
pub fn crop(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    if image.width() == 0 || image.height() == 0 {
        return DynamicImage::new_rgb8(width, height);
    }
    let keep_width = image.width().min(width);
    let keep_height = image.height().min(height);
    image
        .crop_imm(0, 0, keep_width, keep_height)
        .resize_exact(width, height, FilterType::Triangle)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CropStats {
    pub cropped: usize,
    pub skipped: usize,
}

fn crop_file(source: &Path, target: &Path, width: u32, height: u32) -> Result<()> {
    let image = ImageReader::open(source)
        .map_err(|e| DatasetError::io(source, e))?
        .with_guessed_format()
        .map_err(|e| DatasetError::io(source, e))?
        .decode()
        .map_err(|e| DatasetError::image(source, e))?;

    let mut cropped = crop(&image, width, height);

    // JPEG has no alpha channel
    let is_jpeg = target
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext.to_lowercase().as_str(), "jpg" | "jpeg"));
    if is_jpeg {
        cropped = DynamicImage::ImageRgb8(cropped.to_rgb8());
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| DatasetError::io(parent, e))?;
    }
    cropped
        .save(target)
        .map_err(|e| DatasetError::image(target, e))
}

/// Crops every image under `input_dir` into the same relative path under
/// `output_dir`. Files that fail to decode or save are skipped.
pub fn crop_tree(
    input_dir: &Path,
    output_dir: &Path,
    width: u32,
    height: u32,
) -> Result<CropStats> {
    fs::create_dir_all(output_dir).map_err(|e| DatasetError::io(output_dir, e))?;
    let files = image_files(input_dir)?;

    info!("Cropping and resizing {} images...", files.len());

    let cropped = files
        .par_iter()
        .progress()
        .filter(|source| {
            let target = mirrored(source, input_dir, output_dir);
            match crop_file(source, &target, width, height) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Skipping {}: {}", source.display(), e);
                    false
                }
            }
        })
        .count();

    let stats = CropStats {
        cropped,
        skipped: files.len() - cropped,
    };
    info!(
        cropped = stats.cropped,
        skipped = stats.skipped,
        "Cropping and resizing completed"
    );
    Ok(stats)
}

pub fn is_placeholder(file_size: u64) -> bool {
    file_size == PLACEHOLDER_SIZE_BYTES
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupStats {
    pub removed_files: usize,
    pub removed_entries: usize,
    /// Files that could not be checked or moved. They stay on disk with their entry.
    pub failed: usize,
}

fn move_to_backup(path: &Path, backup: &Path) -> Result<()> {
    if let Some(parent) = backup.parent() {
        fs::create_dir_all(parent).map_err(|e| DatasetError::io(parent, e))?;
    }
    fs::copy(path, backup).map_err(|e| DatasetError::io(backup, e))?;
    fs::remove_file(path).map_err(|e| DatasetError::io(path, e))
}

/// Moves every placeholder image under `images_dir` to the same relative path
/// under `backup_dir` and drops its metadata entry. The entry is found through
/// the `lat,lng` file stem. A placeholder that cannot be moved keeps its entry,
/// so `store` always matches what is left on disk.
pub fn remove_placeholders(
    images_dir: &Path,
    backup_dir: &Path,
    store: &mut MetadataStore,
) -> Result<CleanupStats> {
    info!("Deleting placeholder images...");
    let mut stats = CleanupStats::default();

    for path in image_files(images_dir)? {
        let size = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("Skipping: {}", DatasetError::io(&path, e));
                stats.failed += 1;
                continue;
            }
        };
        if !is_placeholder(size) {
            continue;
        }

        let backup = mirrored(&path, images_dir, backup_dir);
        if let Err(e) = move_to_backup(&path, &backup) {
            warn!("Could not move {} to backup: {}", path.display(), e);
            stats.failed += 1;
            continue;
        }
        stats.removed_files += 1;

        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default();
        let key: CoordinateKey = match stem.parse() {
            Ok(key) => key,
            Err(_) => {
                warn!("{}", DatasetError::InvalidImageName(stem.to_string()));
                continue;
            }
        };

        match store.remove(&key) {
            Some(_) => stats.removed_entries += 1,
            None => warn!("No metadata entry for {} ({})", key, path.display()),
        }
    }

    info!(
        removed_files = stats.removed_files,
        removed_entries = stats.removed_entries,
        failed = stats.failed,
        "Deleting completed"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ImageRecord;
    use image::{GenericImageView, Rgb, RgbImage};

    fn striped(width: u32, height: u32) -> DynamicImage {
        // white on top, black watermark strip in the bottom quarter
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |_, y| {
            if y >= height * 3 / 4 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
        }))
    }

    #[test]
    fn crop_removes_bottom_strip() {
        let image = striped(224, 300);
        let cropped = crop(&image, 224, 224);

        assert_eq!(cropped.dimensions(), (224, 224));
        // rows 0..224 of the source are all white
        assert_eq!(cropped.get_pixel(100, 223).0[..3], [255, 255, 255]);
    }

    #[test]
    fn short_images_are_upscaled() {
        let image = striped(224, 100);
        let cropped = crop(&image, 224, 224);
        assert_eq!(cropped.dimensions(), (224, 224));
        assert_eq!(crop(&striped(10, 10), 224, 224).dimensions(), (224, 224));
    }

    #[test]
    fn wide_images_keep_the_left_part() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(448, 224, |x, _| {
            if x < 224 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) }
        }));
        let cropped = crop(&image, 224, 224);
        assert_eq!(cropped.get_pixel(223, 100).0[..3], [255, 0, 0]);
    }

    #[test]
    fn empty_image_does_not_panic() {
        let cropped = crop(&DynamicImage::new_rgb8(0, 0), 224, 224);
        assert_eq!(cropped.dimensions(), (224, 224));
    }

    #[test]
    fn crop_tree_mirrors_layout_and_skips_garbage() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fs::create_dir_all(input.path().join("Randers Kommune")).unwrap();
        striped(224, 300)
            .save(input.path().join("Randers Kommune/56.1,10.2.png"))
            .unwrap();
        striped(224, 300)
            .save(input.path().join("56.3,10.4.jpg"))
            .unwrap();
        fs::write(input.path().join("broken.jpg"), b"not an image").unwrap();
        fs::write(input.path().join("notes.txt"), b"ignored").unwrap();

        let stats = crop_tree(input.path(), output.path(), 224, 224).unwrap();

        assert_eq!(stats, CropStats { cropped: 2, skipped: 1 });
        let png = image::open(output.path().join("Randers Kommune/56.1,10.2.png")).unwrap();
        assert_eq!(png.dimensions(), (224, 224));
        assert!(output.path().join("56.3,10.4.jpg").exists());
        assert!(!output.path().join("notes.txt").exists());
    }

    #[test]
    fn crop_tree_requires_input_dir() {
        let output = tempfile::tempdir().unwrap();
        let missing = output.path().join("missing");
        assert!(crop_tree(&missing, output.path(), 224, 224).is_err());
    }

    #[test]
    fn placeholder_is_recognised_by_size() {
        assert!(is_placeholder(PLACEHOLDER_SIZE_BYTES));
        assert!(!is_placeholder(PLACEHOLDER_SIZE_BYTES + 1));
        assert!(!is_placeholder(0));
    }

    fn record(lat: f64, lng: f64) -> ImageRecord {
        ImageRecord {
            lat,
            lng,
            pano_id: None,
            heading: 0.0,
            cell: "A".to_string(),
        }
    }

    #[test]
    fn removes_only_placeholder_entries() {
        let images = tempfile::tempdir().unwrap();
        let backup = tempfile::tempdir().unwrap();
        let region = images.path().join("A");
        fs::create_dir_all(&region).unwrap();

        let placeholder = region.join("55.000012,10.000009.jpg");
        let normal = region.join("56.1,10.2.jpg");
        fs::write(&placeholder, vec![0u8; PLACEHOLDER_SIZE_BYTES as usize]).unwrap();
        fs::write(&normal, vec![0u8; 12_345]).unwrap();

        let mut store = MetadataStore::new();
        store.insert(CoordinateKey::new(55.000012, 10.000009), record(55.000012, 10.000009));
        store.insert(CoordinateKey::new(56.1, 10.2), record(56.1, 10.2));

        let stats = remove_placeholders(images.path(), backup.path(), &mut store).unwrap();

        assert_eq!(stats, CleanupStats { removed_files: 1, removed_entries: 1, failed: 0 });
        assert_eq!(store.len(), 1);
        assert!(store.contains_key(&CoordinateKey::new(56.1, 10.2)));
        assert!(!placeholder.exists());
        assert!(normal.exists());
        assert!(backup.path().join("A/55.000012,10.000009.jpg").exists());
    }

    #[test]
    fn blocked_backup_keeps_file_and_entry_in_sync() {
        let images = tempfile::tempdir().unwrap();
        let backup = tempfile::tempdir().unwrap();
        fs::create_dir_all(images.path().join("A")).unwrap();
        fs::create_dir_all(images.path().join("B")).unwrap();

        let first = images.path().join("A/1.00000,1.00000.jpg");
        let second = images.path().join("B/2.00000,2.00000.jpg");
        fs::write(&first, vec![0u8; PLACEHOLDER_SIZE_BYTES as usize]).unwrap();
        fs::write(&second, vec![0u8; PLACEHOLDER_SIZE_BYTES as usize]).unwrap();
        // the backup directory for B cannot be created
        fs::write(backup.path().join("B"), b"not a directory").unwrap();

        let mut store = MetadataStore::new();
        store.insert(CoordinateKey::new(1.0, 1.0), record(1.0, 1.0));
        store.insert(CoordinateKey::new(2.0, 2.0), record(2.0, 2.0));

        let stats = remove_placeholders(images.path(), backup.path(), &mut store).unwrap();

        assert_eq!(stats, CleanupStats { removed_files: 1, removed_entries: 1, failed: 1 });
        assert!(!first.exists());
        assert!(second.exists());
        assert_eq!(
            store.keys().copied().collect::<Vec<_>>(),
            vec![CoordinateKey::new(2.0, 2.0)]
        );
    }

    #[test]
    fn badly_named_placeholders_are_still_moved() {
        let images = tempfile::tempdir().unwrap();
        let backup = tempfile::tempdir().unwrap();
        let file = images.path().join("0001.png");
        fs::write(&file, vec![0u8; PLACEHOLDER_SIZE_BYTES as usize]).unwrap();

        let mut store = MetadataStore::new();
        store.insert(CoordinateKey::new(1.0, 2.0), record(1.0, 2.0));

        let stats = remove_placeholders(images.path(), backup.path(), &mut store).unwrap();

        assert_eq!(stats, CleanupStats { removed_files: 1, removed_entries: 0, failed: 0 });
        assert_eq!(store.len(), 1);
        assert!(!file.exists());
        assert!(backup.path().join("0001.png").exists());
    }
}
