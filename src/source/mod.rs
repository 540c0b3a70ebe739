#[cfg(feature = "download")]
mod arcgis;
mod feature;
mod throttle;

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use geo::{Geometry, Rect};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

#[cfg(feature = "download")]
pub use arcgis::ArcGisClient;
pub use feature::parse_feature_collection;
pub use throttle::{RateLimiter, RetryPolicy};

/// One of the three upstream event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Construction,
    Closure,
    Restriction,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Construction, Layer::Closure, Layer::Restriction];

    pub fn to_str(&self) -> &'static str {
        match self {
            Layer::Construction => "construction",
            Layer::Closure => "closure",
            Layer::Restriction => "restriction",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.to_str()) }
}

/// A single attribute value as received from a source layer.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Null,
}

impl AttrValue {
    /// Null, or text that is empty after trimming.
    pub fn is_blank(&self) -> bool {
        match self {
            AttrValue::Null => true,
            AttrValue::Text(s) => s.trim().is_empty(),
            AttrValue::Number(n) => !n.is_finite(),
            AttrValue::Timestamp(_) => false,
        }
    }

    /// Render the value as text; integral numbers print without a fraction.
    pub fn as_text(&self) -> Option<String> {
        match self {
            AttrValue::Text(s) => Some(s.trim().to_string()),
            AttrValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", *n as i64)),
            AttrValue::Number(n) => Some(n.to_string()),
            AttrValue::Timestamp(t) => Some(t.to_rfc3339()),
            AttrValue::Null => None,
        }
    }
}

impl From<&serde_json::Value> for AttrValue {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => AttrValue::Null,
            Value::Bool(b) => AttrValue::Text(b.to_string()),
            Value::Number(n) => n.as_f64().map(AttrValue::Number).unwrap_or(AttrValue::Null),
            Value::String(s) => AttrValue::Text(s.clone()),
            other => AttrValue::Text(other.to_string()),
        }
    }
}

/// Geometry attached to a raw feature.
#[derive(Debug, Clone, PartialEq)]
pub enum RawGeometry {
    Missing,
    Malformed(String),
    Shape(Geometry<f64>),
}

/// An as-received record from one source layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeature {
    pub layer: Layer,
    pub attributes: BTreeMap<String, AttrValue>,
    pub geometry: RawGeometry,
}

impl RawFeature {
    pub fn new(layer: Layer, geometry: RawGeometry) -> Self {
        Self { layer, attributes: BTreeMap::new(), geometry }
    }

    /// Builder-style attribute insert.
    pub fn with(mut self, name: &str, value: AttrValue) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> { self.attributes.get(name) }
}

/// Result of querying one layer over one extent.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Features(Vec<RawFeature>),
    /// The service answered with zero features.
    Empty,
}

impl FetchOutcome {
    pub fn into_features(self) -> Vec<RawFeature> {
        match self {
            FetchOutcome::Features(features) => features,
            FetchOutcome::Empty => Vec::new(),
        }
    }
}

impl From<Vec<RawFeature>> for FetchOutcome {
    fn from(features: Vec<RawFeature>) -> Self {
        if features.is_empty() { FetchOutcome::Empty } else { FetchOutcome::Features(features) }
    }
}

/// Read-only access to the upstream event layers.
pub trait EventSource: Send + Sync {
    /// Features of `layer` within or touching `extent` (WGS84 lon/lat).
    fn fetch(&self, layer: Layer, extent: &Rect<f64>) -> Result<FetchOutcome, SourceError>;
}
