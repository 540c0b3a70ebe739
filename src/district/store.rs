use std::{collections::BTreeMap, path::{Path, PathBuf}};

use serde_json::Value;
use walkdir::WalkDir;

use crate::common::parse_areal;
use crate::district::{District, DistrictKey};
use crate::error::BoundaryError;

/// Supplies one polygon per district key.
pub trait BoundaryStore: Send + Sync {
    fn load(&self, key: DistrictKey) -> Result<District, BoundaryError>;

    /// Keys with a boundary on file, in key order.
    fn available(&self) -> Vec<DistrictKey>;
}

/// Boundaries stored as `{dir}/{district_key}.geojson`.
#[derive(Debug, Clone)]
pub struct DiskBoundaryStore {
    dir: PathBuf,
}

impl DiskBoundaryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }

    #[inline] pub fn dir(&self) -> &Path { &self.dir }

    pub fn path_for(&self, key: DistrictKey) -> PathBuf { self.dir.join(format!("{key}.geojson")) }
}

impl BoundaryStore for DiskBoundaryStore {
    fn load(&self, key: DistrictKey) -> Result<District, BoundaryError> {
        let path = self.path_for(key);
        if !path.is_file() {
            return Err(BoundaryError::Missing(key));
        }
        let invalid = |reason: String| BoundaryError::Invalid { key, reason };

        let bytes = std::fs::read(&path)
            .map_err(|e| invalid(format!("read {}: {e}", path.display())))?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| invalid(format!("parse {}: {e}", path.display())))?;

        // A bare Feature, the first Feature of a collection, or a bare geometry.
        let is_collection = value["type"].as_str() == Some("FeatureCollection");
        let feature = if is_collection {
            value["features"].get(0).cloned().unwrap_or(Value::Null)
        } else {
            value
        };
        let geometry = match feature["type"].as_str() {
            Some("Feature") => &feature["geometry"],
            _ => &feature,
        };

        let polygons = parse_areal(geometry).map_err(|e| invalid(e.to_string()))?;
        let district = District::new(key, polygons);
        Ok(match feature["properties"]["name"].as_str() {
            Some(name) => district.with_name(name),
            None => district,
        })
    }

    fn available(&self) -> Vec<DistrictKey> {
        let mut keys: Vec<DistrictKey> = WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension()? != "geojson" {
                    return None;
                }
                path.file_stem()?.to_str()?.parse::<DistrictKey>().ok()
            })
            .filter(|key| !key.is_statewide())
            .collect();
        keys.sort_unstable();
        keys
    }
}

/// In-memory boundaries, keyed by district.
#[derive(Debug, Clone, Default)]
pub struct MemBoundaryStore {
    districts: BTreeMap<DistrictKey, District>,
}

impl MemBoundaryStore {
    pub fn new(districts: impl IntoIterator<Item = District>) -> Self {
        Self { districts: districts.into_iter().map(|d| (d.key(), d)).collect() }
    }

    pub fn insert(&mut self, district: District) { self.districts.insert(district.key(), district); }
}

impl BoundaryStore for MemBoundaryStore {
    fn load(&self, key: DistrictKey) -> Result<District, BoundaryError> {
        self.districts.get(&key).cloned().ok_or(BoundaryError::Missing(key))
    }

    fn available(&self) -> Vec<DistrictKey> { self.districts.keys().copied().collect() }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{BoundaryStore, DiskBoundaryStore};
    use crate::district::DistrictKey;
    use crate::error::BoundaryError;

    fn key(s: &str) -> DistrictKey { s.parse().unwrap() }

    #[test]
    fn loads_feature_files() {
        let dir = tempfile::tempdir().unwrap();
        let feature = json!({
            "type": "Feature",
            "properties": { "district_key": "US-IL-CD-05", "name": "Illinois Congressional District 5" },
            "geometry": { "type": "Polygon", "coordinates": [[[-88, 41], [-87, 41], [-87, 42], [-88, 42], [-88, 41]]] }
        });
        std::fs::write(dir.path().join("US-IL-CD-05.geojson"), feature.to_string()).unwrap();

        let store = DiskBoundaryStore::new(dir.path());
        let d = store.load(key("US-IL-CD-05")).unwrap();
        assert_eq!(d.name(), "Illinois Congressional District 5");
        assert_eq!(d.geometry().0.len(), 1);
        assert!(d.bounds().is_some());
    }

    #[test]
    fn loads_collections_and_bare_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let polygon = json!({ "type": "MultiPolygon", "coordinates": [[[[0, 0], [1, 0], [1, 1], [0, 0]]]] });
        std::fs::write(
            dir.path().join("IL-S-003.geojson"),
            json!({ "type": "FeatureCollection", "features": [{ "type": "Feature", "properties": {}, "geometry": polygon }] }).to_string(),
        ).unwrap();
        std::fs::write(dir.path().join("IL-H-004.geojson"), polygon.to_string()).unwrap();

        let store = DiskBoundaryStore::new(dir.path());
        assert_eq!(store.load(key("IL-S-003")).unwrap().name(), "Illinois Senate District 3");
        assert!(store.load(key("IL-H-004")).is_ok());
    }

    #[test]
    fn missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("IL-H-010.geojson"), "{ not json").unwrap();
        std::fs::write(
            dir.path().join("IL-H-011.geojson"),
            json!({ "type": "Feature", "geometry": { "type": "Point", "coordinates": [0, 0] } }).to_string(),
        ).unwrap();

        let store = DiskBoundaryStore::new(dir.path());
        assert!(matches!(store.load(key("IL-H-009")), Err(BoundaryError::Missing(_))));
        assert!(matches!(store.load(key("IL-H-010")), Err(BoundaryError::Invalid { .. })));
        assert!(matches!(store.load(key("IL-H-011")), Err(BoundaryError::Invalid { .. })));
    }

    #[test]
    fn available_lists_district_files_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["IL-H-002.geojson", "IL-H-001.geojson", "US-IL-SEN.geojson", "notes.geojson", "IL-S-001.json"] {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }
        let store = DiskBoundaryStore::new(dir.path());
        assert_eq!(store.available(), vec![key("IL-H-001"), key("IL-H-002")]);
    }
}
