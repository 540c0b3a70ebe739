use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use geo::{Centroid, Geometry, Point};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::{Config, LayerTable};
use crate::event::{EventStatus, RoadEvent};
use crate::source::{AttrValue, Layer, RawFeature, RawGeometry};

/// Canonical fields filled from source attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    RecordId,
    Road,
    Direction,
    LocationText,
    County,
    Description,
    Lanes,
    Status,
    Start,
    End,
    LastUpdated,
    SourceUrl,
}

/// Per-layer table from canonical field to candidate source attribute names,
/// in priority order. The first candidate holding a non-blank value wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMapping(BTreeMap<Field, Vec<String>>);

impl Default for FieldMapping {
    fn default() -> Self {
        Self::from_pairs(&[
            (Field::RecordId, &["OBJECTID", "ObjectId", "FID"]),
            (Field::Road, &["Route", "Route1", "ROUTE", "RoadName", "ROAD_NAME", "road"]),
            (Field::Direction, &["Direction", "DIRECTION"]),
            (Field::LocationText, &["NearTown", "NEAR_TOWN", "Location", "LOCATION", "LocationDescription"]),
            (Field::County, &["County", "COUNTY"]),
            (Field::Description, &["Description", "DESCRIPTION", "ImpactOnTravel", "IMPACT_ON_TRAVEL"]),
            (Field::Lanes, &["LanesAffected", "LANES_AFFECTED", "ImpactOnTravel", "TrafficAlert"]),
            (Field::Status, &["Status", "STATUS"]),
            (Field::Start, &["StartDate", "START_DATE", "start"]),
            (Field::End, &["EndDate", "END_DATE", "end"]),
            (Field::LastUpdated, &["LastUpdated", "LAST_UPDATED", "EditDate"]),
            (Field::SourceUrl, &["WebAddress", "WEB_ADDRESS", "url", "URL"]),
        ])
    }
}

impl FieldMapping {
    pub fn from_pairs(pairs: &[(Field, &[&str])]) -> Self {
        Self(pairs.iter()
            .map(|(field, names)| (*field, names.iter().map(|s| s.to_string()).collect()))
            .collect())
    }

    /// Default mapping for one layer; construction records describe the
    /// work type rather than the travel impact.
    pub fn for_layer(layer: Layer) -> Self {
        let mut mapping = Self::default();
        match layer {
            Layer::Construction => mapping.set(Field::Description, &[
                "Description", "DESCRIPTION", "ConstructionType", "CONSTRUCTION_TYPE", "ImpactOnTravel", "IMPACT_ON_TRAVEL",
            ]),
            Layer::Closure => mapping.set(Field::Lanes, &[
                "LanesAffected", "LANES_AFFECTED", "ImpactOnTravel", "IMPACT_ON_TRAVEL", "TrafficAlert",
            ]),
            Layer::Restriction => mapping.set(Field::Description, &[
                "Description", "DESCRIPTION", "Restriction", "RESTRICTION", "ImpactOnTravel", "IMPACT_ON_TRAVEL",
            ]),
        }
        mapping
    }

    pub fn set(&mut self, field: Field, names: &[&str]) {
        self.0.insert(field, names.iter().map(|s| s.to_string()).collect());
    }

    pub fn candidates(&self, field: Field) -> &[String] {
        self.0.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First non-blank attribute for `field`.
    pub fn lookup<'a>(&self, field: Field, raw: &'a RawFeature) -> Option<&'a AttrValue> {
        self.candidates(field).iter()
            .filter_map(|name| raw.get(name))
            .find(|value| !value.is_blank())
    }

    fn text(&self, field: Field, raw: &RawFeature) -> String {
        self.lookup(field, raw).and_then(AttrValue::as_text).unwrap_or_default()
    }

    fn timestamp(&self, field: Field, raw: &RawFeature) -> Option<DateTime<Utc>> {
        self.lookup(field, raw).and_then(parse_timestamp)
    }
}

/// Maps source status text to a status when the text contains `contains`
/// (case-insensitive). Rules are tried in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRule {
    pub contains: String,
    pub status: EventStatus,
}

impl StatusRule {
    pub fn defaults() -> Vec<StatusRule> {
        let rule = |contains: &str, status| StatusRule { contains: contains.to_string(), status };
        vec![
            rule("active", EventStatus::Active),
            rule("in progress", EventStatus::Active),
            rule("current", EventStatus::Active),
            rule("open", EventStatus::Active),
            rule("planned", EventStatus::Planned),
            rule("upcoming", EventStatus::Planned),
            rule("scheduled", EventStatus::Planned),
            rule("ended", EventStatus::Ended),
            rule("completed", EventStatus::Ended),
            rule("closed", EventStatus::Ended),
        ]
    }
}

struct LayerRules {
    fields: FieldMapping,
    source_url: String,
}

/// Turns raw features of any layer into canonical [`RoadEvent`]s. Total:
/// every feature yields an event, with unset fields where the source was silent.
pub struct Normalizer {
    layers: [LayerRules; 3],
    vocabulary: Vec<StatusRule>,
}

impl Normalizer {
    pub fn new(layers: &LayerTable, vocabulary: Vec<StatusRule>) -> Self {
        let rules = |layer: Layer| {
            let cfg = layers.get(layer);
            LayerRules { fields: cfg.fields.clone(), source_url: cfg.source_url.clone() }
        };
        Self {
            layers: [rules(Layer::Construction), rules(Layer::Closure), rules(Layer::Restriction)],
            vocabulary: vocabulary.into_iter()
                .map(|r| StatusRule { contains: r.contains.to_lowercase(), status: r.status })
                .collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.layers, config.status_vocabulary.clone())
    }

    fn rules(&self, layer: Layer) -> &LayerRules {
        match layer {
            Layer::Construction => &self.layers[0],
            Layer::Closure => &self.layers[1],
            Layer::Restriction => &self.layers[2],
        }
    }

    /// Normalize one feature. `now` is the run's evaluation time, used to
    /// derive status when the source gives none.
    pub fn normalize(&self, raw: &RawFeature, now: DateTime<Utc>) -> RoadEvent {
        let rules = self.rules(raw.layer);
        let fields = &rules.fields;

        let record_id = fields.lookup(Field::RecordId, raw)
            .and_then(AttrValue::as_text)
            .unwrap_or_else(|| attribute_hash(raw));
        let id = format!("{}:{}", raw.layer, record_id);

        let start = fields.timestamp(Field::Start, raw);
        let mut end = fields.timestamp(Field::End, raw);
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                warn!(%id, start = %s, end = %e, "event ends before it starts; treating as open-ended");
                end = None;
            }
        }

        let status = self.status(fields.lookup(Field::Status, raw), start, end, now);

        let (lon, lat) = match representative_point(&raw.geometry) {
            Ok(p) => (Some(p.x()), Some(p.y())),
            Err(reason) => {
                warn!(%id, layer = %raw.layer, %reason, "no usable geometry; excluded from district matching");
                (None, None)
            }
        };

        let source_url = match fields.text(Field::SourceUrl, raw) {
            url if url.is_empty() => rules.source_url.clone(),
            url => url,
        };

        RoadEvent {
            id,
            kind: raw.layer,
            status,
            road: fields.text(Field::Road, raw),
            direction: fields.text(Field::Direction, raw),
            location_text: fields.text(Field::LocationText, raw),
            county: fields.text(Field::County, raw),
            description: fields.text(Field::Description, raw),
            lanes: fields.text(Field::Lanes, raw),
            start,
            end,
            last_updated: fields.timestamp(Field::LastUpdated, raw),
            lat,
            lon,
            source_url,
            severity: 0,
            source_layer: raw.layer,
        }
    }

    fn status(
        &self,
        explicit: Option<&AttrValue>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> EventStatus {
        if let Some(text) = explicit.and_then(AttrValue::as_text) {
            let text = text.to_lowercase();
            return self.vocabulary.iter()
                .find(|rule| !rule.contains.is_empty() && text.contains(&rule.contains))
                .map(|rule| rule.status)
                .unwrap_or(EventStatus::Unknown);
        }
        match (start, end) {
            (_, Some(end)) if end < now => EventStatus::Ended,
            (Some(start), _) if start > now => EventStatus::Planned,
            _ => EventStatus::Active,
        }
    }
}

/// Interpret a source value as a UTC timestamp. Large numbers are epoch
/// milliseconds, small ones epoch seconds; naive strings are taken as UTC.
pub(crate) fn parse_timestamp(value: &AttrValue) -> Option<DateTime<Utc>> {
    match value {
        AttrValue::Timestamp(t) => Some(*t),
        AttrValue::Number(n) if n.is_finite() => {
            if n.abs() >= 1e11 {
                DateTime::from_timestamp_millis(*n as i64)
            } else {
                DateTime::from_timestamp(*n as i64, 0)
            }
        }
        AttrValue::Text(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<f64>().ok().and_then(|n| parse_timestamp(&AttrValue::Number(n)));
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    const DATETIME_FORMATS: [&str; 5] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%m/%d/%Y %I:%M:%S %p",
        "%m/%d/%Y %H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(t.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|t| t.and_utc());
        }
    }
    debug!(value = s, "unrecognized timestamp");
    None
}

/// Stable fallback record id: the first 12 hex digits of a SHA-256 over the
/// attributes in key order.
fn attribute_hash(raw: &RawFeature) -> String {
    let mut hasher = Sha256::new();
    for (name, value) in &raw.attributes {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_text().unwrap_or_else(|| "null".to_string()).as_bytes());
        hasher.update(b"\n");
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(12);
    digest
}

/// Points stand for themselves; lines and polygons are represented by their centroid.
fn representative_point(geometry: &RawGeometry) -> Result<Point<f64>, String> {
    let point = match geometry {
        RawGeometry::Missing => return Err("geometry missing".to_string()),
        RawGeometry::Malformed(reason) => return Err(reason.clone()),
        RawGeometry::Shape(Geometry::Point(p)) => *p,
        RawGeometry::Shape(shape) => shape.centroid()
            .ok_or_else(|| "geometry has no centroid".to_string())?,
    };
    let (lon, lat) = (point.x(), point.y());
    if !lon.is_finite() || !lat.is_finite() || !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(format!("point ({lon}, {lat}) outside WGS84 range"));
    }
    Ok(point)
}
