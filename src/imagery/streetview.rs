use geo::Point;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{FetchError, ImageRequest, ImageryProvider, Panorama, ResolveError, lat_lng_string};

pub const METADATA_URL: &str = "https://maps.googleapis.com/maps/api/streetview/metadata";
pub const IMAGE_URL: &str = "https://maps.googleapis.com/maps/api/streetview";

/// Google Street View Static API.
pub struct StreetViewClient {
    client: Client,
    api_key: String,
    radius_m: u32,
    metadata_url: String,
    image_url: String,
}

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    status: Option<String>,
    location: Option<MetadataLocation>,
    pano_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataLocation {
    lat: Option<f64>,
    lng: Option<f64>,
}

impl StreetViewClient {
    pub fn new(api_key: String, radius_m: u32, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(StreetViewClient {
            client,
            api_key,
            radius_m,
            metadata_url: METADATA_URL.to_string(),
            image_url: IMAGE_URL.to_string(),
        })
    }
}

// Errors carry the request URL, which includes the API key.
fn describe(error: reqwest::Error) -> String {
    error.without_url().to_string()
}

fn classify(metadata: MetadataResponse) -> Result<Panorama, ResolveError> {
    let status = metadata.status.unwrap_or_default();
    let location = match metadata.location {
        Some(location) if status == "OK" => location,
        _ => return Err(ResolveError::NoImage(status)),
    };

    match (location.lat, location.lng) {
        (Some(lat), Some(lng)) => Ok(Panorama {
            point: Point::new(lng, lat),
            pano_id: metadata.pano_id,
        }),
        _ => Err(ResolveError::NoCoordinate),
    }
}

impl ImageryProvider for StreetViewClient {
    fn resolve(&self, point: Point) -> Result<Panorama, ResolveError> {
        let response = self
            .client
            .get(&self.metadata_url)
            .query(&[
                ("location", lat_lng_string(point)),
                ("radius", self.radius_m.to_string()),
                ("key", self.api_key.clone()),
            ])
            .send()
            .map_err(|e| ResolveError::RequestFailed(describe(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::RequestFailed(format!("status code {status}")));
        }

        let metadata: MetadataResponse = response
            .json()
            .map_err(|e| ResolveError::RequestFailed(describe(e)))?;
        debug!(?metadata, "metadata response");

        classify(metadata)
    }

    fn fetch(&self, request: &ImageRequest) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(&self.image_url)
            .query(&[
                ("location", lat_lng_string(request.point)),
                ("size", request.size.to_string()),
                ("heading", request.heading.to_string()),
                ("pitch", request.pitch.to_string()),
                ("fov", request.fov.to_string()),
                ("source", "outdoor".to_string()),
                ("return_error_codes", "true".to_string()),
                ("key", self.api_key.clone()),
            ])
            .send()
            .map_err(|e| FetchError::DownloadFailed(describe(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::DownloadFailed(format!("status code {status}")));
        }

        let bytes = response
            .bytes()
            .map_err(|e| FetchError::DownloadFailed(describe(e)))?;
        Ok(bytes.to_vec())
    }

    fn name(&self) -> &'static str {
        "Street View"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Panorama, ResolveError> {
        classify(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn ok_metadata_resolves_to_snapped_position() {
        let panorama = parse(
            r#"{"status": "OK", "location": {"lat": 55.00001, "lng": 10.00001}, "pano_id": "abc", "date": "2021-06"}"#,
        )
        .unwrap();
        assert_eq!(panorama.point, Point::new(10.00001, 55.00001));
        assert_eq!(panorama.pano_id.as_deref(), Some("abc"));
    }

    #[test]
    fn non_ok_status_is_no_image() {
        assert_eq!(
            parse(r#"{"status": "ZERO_RESULTS"}"#),
            Err(ResolveError::NoImage("ZERO_RESULTS".to_string()))
        );
        assert_eq!(
            parse(r#"{"status": "NOT_FOUND", "location": {"lat": 1.0, "lng": 2.0}}"#),
            Err(ResolveError::NoImage("NOT_FOUND".to_string()))
        );
        assert_eq!(parse(r#"{}"#), Err(ResolveError::NoImage(String::new())));
    }

    #[test]
    fn ok_without_location_is_no_image() {
        assert_eq!(
            parse(r#"{"status": "OK"}"#),
            Err(ResolveError::NoImage("OK".to_string()))
        );
    }

    #[test]
    fn ok_without_coordinates_is_no_coordinate() {
        assert_eq!(
            parse(r#"{"status": "OK", "location": {"lat": 55.0}}"#),
            Err(ResolveError::NoCoordinate)
        );
    }
}
