use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use tracing::info;

use crate::error::{DatasetError, Result};
use crate::sampler::SampledSet;

/// Sampled locations as a FeatureCollection of points, for a visual check in
/// any GIS viewer.
pub fn to_feature_collection(sampled: &SampledSet) -> FeatureCollection {
    let features = sampled
        .iter()
        .flat_map(|region| region.items.iter())
        .map(|location| {
            let mut properties = JsonObject::new();
            properties.insert("region".to_string(), location.region.clone().into());
            properties.insert(
                "sub_region".to_string(),
                location.sub_region.clone().into(),
            );
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::from(&location.point))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

pub fn write_preview(path: &Path, sampled: &SampledSet) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| DatasetError::io(parent, e))?;
    }
    let collection = to_feature_collection(sampled);
    let file = File::create(path).map_err(|e| DatasetError::io(path, e))?;
    serde_json::to_writer(BufWriter::new(file), &collection)
        .map_err(|e| DatasetError::json(path, e))?;
    info!(
        "Wrote {} sampled locations to {}",
        collection.features.len(),
        path.display()
    );
    Ok(())
}
