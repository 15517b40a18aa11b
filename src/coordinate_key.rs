use geo::Point;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of decimals kept for a coordinate key. 5 decimals is about 1 meter.
pub const COORDINATE_PRECISION: usize = 5;

const SCALE: f64 = 100_000.0;

/// Identity of a downloaded image: latitude and longitude rounded to
/// [`COORDINATE_PRECISION`] decimals, kept as scaled integers so that equal
/// keys hash equally regardless of float noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CoordinateKey {
    lat_scaled: i64,
    lng_scaled: i64,
}

impl CoordinateKey {
    pub fn new(lat: f64, lng: f64) -> Self {
        CoordinateKey {
            lat_scaled: (lat * SCALE).round() as i64,
            lng_scaled: (lng * SCALE).round() as i64,
        }
    }

    pub fn lat(&self) -> f64 {
        self.lat_scaled as f64 / SCALE
    }

    pub fn lng(&self) -> f64 {
        self.lng_scaled as f64 / SCALE
    }
}

impl From<Point> for CoordinateKey {
    fn from(point: Point) -> Self {
        CoordinateKey::new(point.y(), point.x())
    }
}

impl fmt::Display for CoordinateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.prec$},{:.prec$}",
            self.lat(),
            self.lng(),
            prec = COORDINATE_PRECISION
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid coordinate key {0:?}, expected \"lat,lng\"")]
pub struct InvalidKey(pub String);

/// Accepts any `"lat,lng"` pair and rounds it, so image files named by older
/// runs with unrounded coordinates still map to their key.
impl FromStr for CoordinateKey {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidKey(s.to_string());
        let (lat, lng) = s.split_once(',').ok_or_else(invalid)?;
        let lat: f64 = lat.trim().parse().map_err(|_| invalid())?;
        let lng: f64 = lng.trim().parse().map_err(|_| invalid())?;

        if !lat.is_finite() || !lng.is_finite() {
            return Err(invalid());
        }

        Ok(CoordinateKey::new(lat, lng))
    }
}

impl TryFrom<String> for CoordinateKey {
    type Error = InvalidKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CoordinateKey> for String {
    fn from(key: CoordinateKey) -> Self {
        key.to_string()
    }
}
