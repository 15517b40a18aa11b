//! Point-in-polygon lookup of administrative regions.
//!
//! Boundaries are loaded once from a GeoJSON FeatureCollection whose features
//! carry the region name in `properties.local_name`. Lookups walk the features
//! in file order and return the first one whose (multi)polygon contains the
//! point, boundary included.

use geo::{BoundingRect, Geometry, Intersects, MultiPolygon, Point, Rect};
use geojson::GeoJson;
use indicatif::ParallelProgressIterator;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DatasetError, Result};
use crate::locations::LocationRecord;

pub const REGION_NAME_PROPERTY: &str = "local_name";

struct Region {
    name: String,
    bounds: Rect,
    boundary: MultiPolygon,
}

pub struct RegionIndex {
    regions: Vec<Region>,
    // memo key (e.g. city name) -> region; only hits are remembered
    memo: Mutex<HashMap<String, String>>,
}

impl RegionIndex {
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading boundaries from {}...", path.display());
        let file = File::open(path).map_err(|e| DatasetError::io(path, e))?;
        let geojson = GeoJson::from_reader(BufReader::new(file))
            .map_err(|e| DatasetError::json(path, e))?;
        Self::from_geojson(geojson)
    }

    pub fn from_geojson(geojson: GeoJson) -> Result<Self> {
        let collection = match geojson {
            GeoJson::FeatureCollection(fc) => fc,
            _ => {
                return Err(DatasetError::InvalidBoundaries(
                    "expected a FeatureCollection".to_string(),
                ));
            }
        };

        let mut regions = Vec::with_capacity(collection.features.len());

        for (index, feature) in collection.features.into_iter().enumerate() {
            let name = match feature.property(REGION_NAME_PROPERTY) {
                Some(serde_json::Value::String(name)) => name.clone(),
                _ => {
                    debug!(index, "feature without {} skipped", REGION_NAME_PROPERTY);
                    continue;
                }
            };

            let Some(geometry) = feature.geometry else {
                debug!(index, region = %name, "feature without geometry skipped");
                continue;
            };

            let boundary = match Geometry::<f64>::try_from(geometry.value)? {
                Geometry::MultiPolygon(mp) => mp,
                Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                _ => {
                    debug!(index, region = %name, "non-polygon feature skipped");
                    continue;
                }
            };

            let Some(bounds) = boundary.bounding_rect() else {
                continue;
            };

            regions.push(Region {
                name,
                bounds,
                boundary,
            });
        }

        if regions.is_empty() {
            return Err(DatasetError::InvalidBoundaries(
                "no polygon feature with a region name".to_string(),
            ));
        }

        info!("Loaded {} region boundaries", regions.len());

        Ok(RegionIndex {
            regions,
            memo: Mutex::new(HashMap::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Name of the first region containing `point` (lng, lat).
    pub fn region_of(&self, point: Point) -> Option<&str> {
        self.regions
            .iter()
            .find(|region| region.bounds.intersects(&point) && region.boundary.intersects(&point))
            .map(|region| region.name.as_str())
    }

    /// Like [`RegionIndex::region_of`], but remembers the answer under
    /// `memo_key` so later points sharing the key skip the polygon tests.
    pub fn region_of_memoized(&self, point: Point, memo_key: Option<&str>) -> Option<String> {
        let Some(memo_key) = memo_key else {
            return self.region_of(point).map(str::to_string);
        };

        if let Some(hit) = self.memo_lock().get(memo_key) {
            return Some(hit.clone());
        }

        let region = self.region_of(point)?.to_string();
        self.memo_lock()
            .insert(memo_key.to_string(), region.clone());
        Some(region)
    }

    fn memo_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // the memo only ever holds complete entries, so a poisoned lock is still usable
        self.memo.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AssignStats {
    pub already_assigned: usize,
    pub assigned: usize,
    pub unmatched: usize,
}

/// Fills in the municipality of every record that lacks one. Lookups are
/// memoized by the record's city.
pub fn assign_regions(index: &RegionIndex, records: &mut [LocationRecord]) -> AssignStats {
    info!(
        "Assigning regions to {} locations from {} boundaries...",
        records.len(),
        index.len()
    );

    let outcomes: Vec<Option<bool>> = records
        .par_iter_mut()
        .progress()
        .map(|record| {
            if record.municipality.as_deref().is_some_and(|m| !m.is_empty()) {
                return None;
            }
            let region = index.region_of_memoized(record.point(), record.city.as_deref());
            let found = region.is_some();
            if !found {
                warn!(
                    lng = record.location[0],
                    lat = record.location[1],
                    "location outside every region"
                );
            }
            record.municipality = region;
            Some(found)
        })
        .collect();

    let mut stats = AssignStats::default();
    for outcome in outcomes {
        match outcome {
            None => stats.already_assigned += 1,
            Some(true) => stats.assigned += 1,
            Some(false) => stats.unmatched += 1,
        }
    }

    info!(
        assigned = stats.assigned,
        unmatched = stats.unmatched,
        already_assigned = stats.already_assigned,
        "Region assignment done"
    );

    stats
}
