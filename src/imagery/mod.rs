pub mod streetview;

use geo::Point;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Panorama the provider snapped a query to. Its position can differ from
/// the queried point.
#[derive(Debug, Clone, PartialEq)]
pub struct Panorama {
    pub point: Point,
    pub pano_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for ImageSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = s
            .split_once('x')
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
        let width: u32 = width.trim().parse().map_err(|_| format!("bad width in {s:?}"))?;
        let height: u32 = height.trim().parse().map_err(|_| format!("bad height in {s:?}"))?;
        if width == 0 || height == 0 {
            return Err(format!("image size must be non-zero, got {s:?}"));
        }
        Ok(ImageSize { width, height })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub point: Point,
    pub size: ImageSize,
    pub heading: f64,
    pub pitch: f64,
    pub fov: f64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("no image found (status {0})")]
    NoImage(String),

    #[error("no latitude or longitude in metadata")]
    NoCoordinate,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("image download failed: {0}")]
    DownloadFailed(String),
}

/// Source of street-level imagery. Implementations are called from many
/// worker threads at once.
pub trait ImageryProvider: Send + Sync {
    /// Looks up the panorama closest to `point`.
    fn resolve(&self, point: Point) -> Result<Panorama, ResolveError>;

    fn fetch(&self, request: &ImageRequest) -> Result<Vec<u8>, FetchError>;

    fn name(&self) -> &'static str;
}

/// `"lat,lng"` as the provider expects it.
pub fn lat_lng_string(point: Point) -> String {
    format!("{},{}", point.y(), point.x())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_image_size() {
        let size: ImageSize = "224x224".parse().unwrap();
        assert_eq!(size, ImageSize { width: 224, height: 224 });
        assert_eq!(size.to_string(), "224x224");
        assert_eq!("640x320".parse::<ImageSize>().unwrap().height, 320);

        assert!("224".parse::<ImageSize>().is_err());
        assert!("0x224".parse::<ImageSize>().is_err());
        assert!("axb".parse::<ImageSize>().is_err());
    }

    #[test]
    fn lat_lng_string_puts_latitude_first() {
        assert_eq!(lat_lng_string(Point::new(10.00001, 55.00001)), "55.00001,10.00001");
    }
}
