use serde::{Deserialize, Serialize};

use crate::precision::same_f64;

pub const MIN_LATITUDE: f64 = -90.0;
pub const MAX_LATITUDE: f64 = 90.0;
pub const MIN_LONGITUDE: f64 = -180.0;
pub const MAX_LONGITUDE: f64 = 180.0;

/// WGS84 position in degrees.
///
/// A coordinate is either fully present or absent; there is no partial form.
/// Use [`Coordinate::from_parts`] when the two halves arrive separately.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Joins separately supplied halves. Returns `None` unless both exist.
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => Some(Self::new(lat, lon)),
            _ => None,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    pub fn is_in_range(&self) -> bool {
        self.is_finite()
            && (MIN_LATITUDE..=MAX_LATITUDE).contains(&self.latitude)
            && (MIN_LONGITUDE..=MAX_LONGITUDE).contains(&self.longitude)
    }

    /// Exactly `(0, 0)`: upstream data uses it as a "no position" sentinel.
    pub fn is_null_island(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    /// Whether a marker may be placed at this position.
    pub fn is_plottable(&self) -> bool {
        self.is_in_range() && !self.is_null_island()
    }

    /// Position equality that ignores the sign of zero.
    pub fn same_position(&self, other: &Coordinate) -> bool {
        same_f64(self.latitude, other.latitude) && same_f64(self.longitude, other.longitude)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}
