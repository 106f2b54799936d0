use serde::{Deserialize, Serialize};

use crate::coordinate::Coordinate;
use crate::ids::AnnotationId;

/// A location as delivered by the upstream listing source.
///
/// Records are immutable: a refetch yields new records, never edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawLocationRecord")]
pub struct LocationRecord {
    pub id: AnnotationId,
    pub label: String,
    pub address: String,
    pub coordinate: Option<Coordinate>,
}

impl LocationRecord {
    pub fn new(
        id: impl Into<AnnotationId>,
        label: impl Into<String>,
        address: impl Into<String>,
        coordinate: Option<Coordinate>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            address: address.into(),
            coordinate,
        }
    }

    pub fn has_address(&self) -> bool {
        !self.address.trim().is_empty()
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawCoordinate {
    #[serde(default, alias = "lat")]
    latitude: Option<f64>,
    #[serde(default, alias = "lng", alias = "lon")]
    longitude: Option<f64>,
}

/// Wire shape: the position may be nested or given as flat fields.
#[derive(Debug, Deserialize)]
struct RawLocationRecord {
    id: AnnotationId,
    #[serde(default)]
    label: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    coordinate: Option<RawCoordinate>,
    #[serde(default, alias = "lat")]
    latitude: Option<f64>,
    #[serde(default, alias = "lng", alias = "lon")]
    longitude: Option<f64>,
}

impl From<RawLocationRecord> for LocationRecord {
    fn from(raw: RawLocationRecord) -> Self {
        let nested = raw
            .coordinate
            .and_then(|c| Coordinate::from_parts(c.latitude, c.longitude));
        let coordinate = nested.or_else(|| Coordinate::from_parts(raw.latitude, raw.longitude));
        Self {
            id: raw.id,
            label: raw.label,
            address: raw.address,
            coordinate,
        }
    }
}

/// Normalized unit handed to the reconciler: a record with a resolved position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationPoint {
    pub id: AnnotationId,
    pub coordinate: Coordinate,
    pub label: String,
}

impl AnnotationPoint {
    pub fn new(id: impl Into<AnnotationId>, coordinate: Coordinate, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            coordinate,
            label: label.into(),
        }
    }

    pub fn from_record(record: &LocationRecord, coordinate: Coordinate) -> Self {
        Self {
            id: record.id.clone(),
            coordinate,
            label: record.label.clone(),
        }
    }

    /// Validity heuristic applied before diffing: non-blank id and a
    /// plottable coordinate (in range, not `(0, 0)`).
    pub fn is_plottable(&self) -> bool {
        !self.id.is_blank() && self.coordinate.is_plottable()
    }
}
