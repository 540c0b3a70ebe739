mod normalize;
mod severity;

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use geo::Point;
use serde::{Deserialize, Serialize};

use crate::source::Layer;

pub use normalize::{Field, FieldMapping, Normalizer, StatusRule};
pub use severity::{PointTable, SeverityScorer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Active,
    Planned,
    Ended,
    Unknown,
}

/// Canonical road event, whatever layer it came from.
///
/// Text fields use the empty string when the source had nothing; timestamps
/// serialize as RFC 3339 UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadEvent {
    /// `{layer}:{source_record_id}`
    pub id: String,
    #[serde(rename = "type")]
    pub kind: Layer,
    pub status: EventStatus,
    #[serde(default)]
    pub road: String,
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub location_text: String,
    #[serde(default)]
    pub county: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub lanes: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub severity: u32,
    pub source_layer: Layer,
}

impl RoadEvent {
    /// Representative point (lon, lat), if the source geometry was usable.
    pub fn point(&self) -> Option<Point<f64>> {
        match (self.lon, self.lat) {
            (Some(lon), Some(lat)) => Some(Point::new(lon, lat)),
            _ => None,
        }
    }

    /// Global ranking: severity descending, then `last_updated` descending
    /// (missing timestamps last), then `id` ascending.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other.severity.cmp(&self.severity)
            .then_with(|| other.last_updated.cmp(&self.last_updated))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Sort events into ranking order.
pub fn rank(events: &mut [RoadEvent]) {
    events.sort_by(RoadEvent::rank_cmp);
}


#[cfg(test)]
mod tests {
    use super::fixtures::{at, event};
    use super::rank;

    #[test]
    fn ranking_breaks_ties_deterministically() {
        let mut events = vec![
            event("closure:3", 80, at("2024-05-01T00:00:00Z")),
            event("closure:2", 80, at("2024-05-02T00:00:00Z")),
            event("closure:1", 80, at("2024-05-01T00:00:00Z")),
            event("construction:9", 95, None),
            event("restriction:4", 80, None),
        ];
        rank(&mut events);
        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["construction:9", "closure:2", "closure:1", "closure:3", "restriction:4"]);
    }

    #[test]
    fn serializes_with_dashboard_field_names() {
        let mut e = event("closure:7", 125, at("2024-05-01T12:00:00Z"));
        e.lat = Some(41.88);
        e.lon = Some(-87.63);
        let value = serde_json::to_value(&e).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        for key in ["id", "type", "status", "road", "direction", "location_text", "county", "description",
                    "lanes", "start", "end", "last_updated", "lat", "lon", "source_url", "severity", "source_layer"] {
            assert!(keys.contains(&key), "missing {key}");
        }
        assert_eq!(value["type"], "closure");
        assert_eq!(value["status"], "unknown");
        assert_eq!(value["last_updated"], "2024-05-01T12:00:00Z");
        assert!(value["end"].is_null());
    }
}
