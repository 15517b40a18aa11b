use geo::Point;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{DatasetError, Result};

/// One entry of the locations file:
/// `{ "location": [lng, lat], "municipality": "Odder Kommune", "city": "Hou" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub location: [f64; 2],
    pub municipality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

impl LocationRecord {
    pub fn point(&self) -> Point {
        Point::new(self.location[0], self.location[1])
    }
}

/// A sampling candidate. `point` is (lng, lat) like every other `geo::Point`
/// in this crate.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub point: Point,
    pub region: String,
    pub sub_region: Option<String>,
}

impl Location {
    pub fn lat(&self) -> f64 {
        self.point.y()
    }

    pub fn lng(&self) -> f64 {
        self.point.x()
    }
}

pub fn read_records(path: &Path) -> Result<Vec<LocationRecord>> {
    let file = File::open(path).map_err(|e| DatasetError::io(path, e))?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| DatasetError::json(path, e))
}

pub fn write_records(path: &Path, records: &[LocationRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| DatasetError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| DatasetError::io(path, e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), records)
        .map_err(|e| DatasetError::json(path, e))
}

/// Turns raw records into locations. Records without a municipality are
/// dropped, as are regions outside `allowed` when an allowlist is given.
pub fn to_locations(
    records: Vec<LocationRecord>,
    allowed: Option<&HashSet<String>>,
) -> Vec<Location> {
    let total = records.len();

    let locations: Vec<Location> = records
        .into_iter()
        .filter_map(|record| {
            let point = record.point();
            let region = record.municipality.filter(|m| !m.is_empty())?;
            if allowed.is_some_and(|allowed| !allowed.contains(&region)) {
                return None;
            }
            Some(Location {
                point,
                region,
                sub_region: record.city.filter(|c| !c.is_empty()),
            })
        })
        .collect();

    debug!(
        kept = locations.len(),
        dropped = total - locations.len(),
        "filtered location records"
    );

    locations
}

pub fn load_locations(path: &Path, allowed: Option<&HashSet<String>>) -> Result<Vec<Location>> {
    info!("Loading locations from {}...", path.display());
    let records = read_records(path)?;
    Ok(to_locations(records, allowed))
}
