use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::common::parse_geometry;
use crate::source::{AttrValue, Layer, RawFeature, RawGeometry};

/// Convert a GeoJSON FeatureCollection response into raw features of `layer`.
/// Features keep every property; bad geometries are carried as `Malformed`
/// rather than failing the whole page.
pub fn parse_feature_collection(layer: Layer, body: &Value) -> Result<Vec<RawFeature>> {
    let features = body["features"].as_array()
        .ok_or_else(|| anyhow!("response has no features array"))?;

    Ok(parse_features(layer, features))
}

/// Convert GeoJSON Feature objects into raw features of `layer`.
pub(crate) fn parse_features(layer: Layer, features: &[Value]) -> Vec<RawFeature> {
    features.iter().map(|feature| parse_feature(layer, feature)).collect()
}

fn parse_feature(layer: Layer, feature: &Value) -> RawFeature {
    let geometry = match feature.get("geometry") {
        None | Some(Value::Null) => RawGeometry::Missing,
        Some(geom) => match parse_geometry(geom) {
            Ok(shape) => RawGeometry::Shape(shape),
            Err(e) => RawGeometry::Malformed(e.to_string()),
        },
    };

    let mut raw = RawFeature::new(layer, geometry);
    if let Some(props) = feature["properties"].as_object() {
        for (name, value) in props {
            raw.attributes.insert(name.clone(), AttrValue::from(value));
        }
    }
    raw
}
