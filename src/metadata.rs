use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;

use crate::coordinate_key::CoordinateKey;
use crate::error::{DatasetError, Result};

/// What was downloaded at one coordinate key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub lat: f64,
    pub lng: f64,
    pub pano_id: Option<String>,
    pub heading: f64,
    /// Region the image was sampled for.
    pub cell: String,
}

/// Coordinate key -> record, the single source of truth for what is on disk.
pub type MetadataStore = BTreeMap<CoordinateKey, ImageRecord>;

pub fn load(path: &Path) -> Result<MetadataStore> {
    let file = File::open(path).map_err(|e| DatasetError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| DatasetError::json(path, e))
}

/// Makes sure `path` can be written later on: creates its parent directory and
/// opens the file for appending. A file that did not exist yet is removed again.
pub fn ensure_writable(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| DatasetError::io(parent, e))?;
    }
    let existed = path.exists();
    OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| DatasetError::io(path, e))?;
    if !existed {
        fs::remove_file(path).map_err(|e| DatasetError::io(path, e))?;
    }
    Ok(())
}

/// Rewrites the whole file.
pub fn save(path: &Path, store: &MetadataStore) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| DatasetError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| DatasetError::io(path, e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), store)
        .map_err(|e| DatasetError::json(path, e))?;
    info!("Saved {} metadata entries to {}", store.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_format_is_keyed_by_rounded_coordinate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/metadata.json");

        let mut store = MetadataStore::new();
        store.insert(
            CoordinateKey::new(55.000012, 10.000009),
            ImageRecord {
                lat: 55.000012,
                lng: 10.000009,
                pano_id: Some("pano".to_string()),
                heading: 0.0,
                cell: "Randers Kommune".to_string(),
            },
        );

        save(&path, &store).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let entry = &raw["55.00001,10.00001"];
        assert_eq!(entry["lat"], 55.000012);
        assert_eq!(entry["pano_id"], "pano");
        assert_eq!(entry["cell"], "Randers Kommune");

        assert_eq!(load(&path).unwrap(), store);
    }

    #[test]
    fn writable_check_leaves_no_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/metadata.json");
        ensure_writable(&path).unwrap();
        assert!(path.parent().unwrap().is_dir());
        assert!(!path.exists());

        std::fs::write(&path, "{}").unwrap();
        ensure_writable(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");

        let blocked = dir.path().join("data/metadata.json/metadata.json");
        assert!(matches!(ensure_writable(&blocked), Err(DatasetError::Io { .. })));
    }

    #[test]
    fn loading_a_missing_store_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("missing.json")).is_err());
    }
}
