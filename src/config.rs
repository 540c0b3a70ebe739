use std::{path::{Path, PathBuf}, time::Duration};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::district::Tier;
use crate::event::{FieldMapping, PointTable, StatusRule};
use crate::source::{Layer, RetryPolicy};

const ARCGIS_IDOT: &str = "https://services2.arcgis.com/aIrBD8yn1TDTEXoz/arcgis/rest/services";
/// Same services under the capitalised path some mirrors answer on.
const ARCGIS_IDOT_ALT: &str = "https://services2.arcgis.com/aIrBD8yn1TDTEXoz/ArcGIS/rest/services";
const TIGERWEB: &str = "https://tigerweb.geo.census.gov/arcgis/rest/services/TIGERweb";
const LIVING_ATLAS: &str = "https://services.arcgis.com/P3ePLMYs2RVChkJx/arcgis/rest/services";

/// Immutable settings for one pipeline run. Every field has a default, so a
/// config file only needs to name what it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding one `{district_key}.geojson` per district.
    pub boundary_dir: PathBuf,
    /// Directory receiving one `{district_key}.json` per district plus the digest.
    pub output_dir: PathBuf,
    pub fetch: FetchConfig,
    pub layers: LayerTable,
    pub status_vocabulary: Vec<StatusRule>,
    pub severity: PointTable,
    pub output: OutputConfig,
    pub boundaries: BoundarySources,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            boundary_dir: PathBuf::from("data/boundaries"),
            output_dir: PathBuf::from("data/road"),
            fetch: FetchConfig::default(),
            layers: LayerTable::default(),
            status_vocabulary: StatusRule::defaults(),
            severity: PointTable::default(),
            output: OutputConfig::default(),
            boundaries: BoundarySources::default(),
        }
    }
}

impl Config {
    /// Load settings from a JSON file, or use defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                serde_json::from_slice::<Config>(&bytes)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch.workers == 0 {
            bail!("fetch.workers must be at least 1");
        }
        if self.fetch.page_size == 0 || self.fetch.max_pages == 0 {
            bail!("fetch.page_size and fetch.max_pages must be at least 1");
        }
        if self.output.digest_size == 0 {
            bail!("output.digest_size must be at least 1");
        }
        for layer in Layer::ALL {
            if self.layers.get(layer).url.trim().is_empty() {
                bail!("layers.{layer}.url is empty");
            }
        }
        Ok(())
    }
}

/// How events are requested from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchScope {
    /// One query per layer per district, over the district's envelope.
    PerDistrict,
    /// One query per layer over the envelope of all districts.
    Statewide,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub scope: FetchScope,
    /// Upper bound on concurrent district fetches.
    pub workers: usize,
    /// Minimum spacing between requests to the event service.
    pub rate_limit_ms: u64,
    pub page_size: u32,
    pub max_pages: u32,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub retry: RetryPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            scope: FetchScope::PerDistrict,
            workers: 4,
            rate_limit_ms: 500,
            page_size: 1000,
            max_pages: 20,
            timeout_secs: 60,
            user_agent: concat!("roadwatch/", env!("CARGO_PKG_VERSION")).to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl FetchConfig {
    #[inline] pub fn rate_limit(&self) -> Duration { Duration::from_millis(self.rate_limit_ms) }

    #[inline] pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs) }
}

/// Endpoint and attribute mapping for one source layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    /// FeatureServer `query` endpoint.
    pub url: String,
    /// Tried in order when the primary endpoint is unavailable.
    pub fallback_urls: Vec<String>,
    /// Link used when a record carries no web address of its own.
    pub source_url: String,
    pub fields: FieldMapping,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            fallback_urls: Vec::new(),
            source_url: "https://www.gettingaroundillinois.com/".to_string(),
            fields: FieldMapping::default(),
        }
    }
}

impl LayerConfig {
    fn idot(service: &str, layer: Layer) -> Self {
        Self {
            url: format!("{ARCGIS_IDOT}/{service}/FeatureServer/0/query"),
            fallback_urls: vec![
                format!("{ARCGIS_IDOT_ALT}/{service}/FeatureServer/0/query"),
                format!("{ARCGIS_IDOT}/{service}_View/FeatureServer/0/query"),
            ],
            fields: FieldMapping::for_layer(layer),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerTable {
    pub construction: LayerConfig,
    pub closure: LayerConfig,
    pub restriction: LayerConfig,
}

impl Default for LayerTable {
    fn default() -> Self {
        Self {
            construction: LayerConfig::idot("Road_Construction_Public", Layer::Construction),
            closure: LayerConfig::idot("Road_Closures", Layer::Closure),
            restriction: LayerConfig::idot("Road_Restrictions", Layer::Restriction),
        }
    }
}

impl LayerTable {
    pub fn get(&self, layer: Layer) -> &LayerConfig {
        match layer {
            Layer::Construction => &self.construction,
            Layer::Closure => &self.closure,
            Layer::Restriction => &self.restriction,
        }
    }
}

/// Sizes of the lists written to the output documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Length of each district document's `top` list.
    pub district_top: usize,
    /// Length of the statewide digest's `top` list.
    pub digest_size: usize,
    /// Length of the statewide digest's `items` browse list.
    pub digest_items: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { district_top: 10, digest_size: 5, digest_items: 50 }
    }
}

/// Where boundary polygons for one tier are downloaded from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierSource {
    /// Query endpoints, tried in order.
    pub urls: Vec<String>,
    pub where_clause: String,
    /// Attributes that may hold the district number, in priority order.
    pub number_fields: Vec<String>,
}

impl Default for TierSource {
    fn default() -> Self {
        Self { urls: Vec::new(), where_clause: "1=1".to_string(), number_fields: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundarySources {
    /// A full run skips boundary download when at least this many files exist.
    pub min_existing: usize,
    pub congressional: TierSource,
    pub state_house: TierSource,
    pub state_senate: TierSource,
}

impl Default for BoundarySources {
    fn default() -> Self {
        let fields = |names: &[&str]| names.iter().map(|s| s.to_string()).collect();
        Self {
            min_existing: 10,
            congressional: TierSource {
                urls: vec![
                    format!("{LIVING_ATLAS}/USA_119th_Congressional_Districts/FeatureServer/0/query"),
                    format!("{LIVING_ATLAS}/USA_119th_Congressional_Districts_v/FeatureServer/0/query"),
                ],
                where_clause: "STATE_ABBR='IL'".to_string(),
                number_fields: fields(&["CDFIPS", "CD119FP", "DISTRICT"]),
            },
            state_house: TierSource {
                urls: vec![
                    format!("{TIGERWEB}/Legislative/MapServer/18/query"),
                    format!("{TIGERWEB}/tigerWMS_Current/MapServer/22/query"),
                ],
                where_clause: "STATE='17'".to_string(),
                number_fields: fields(&["SLDLST", "DISTRICT", "NAME"]),
            },
            state_senate: TierSource {
                urls: vec![
                    format!("{TIGERWEB}/Legislative/MapServer/16/query"),
                    format!("{TIGERWEB}/tigerWMS_Current/MapServer/20/query"),
                ],
                where_clause: "STATE='17'".to_string(),
                number_fields: fields(&["SLDUST", "DISTRICT", "NAME"]),
            },
        }
    }
}

impl BoundarySources {
    pub fn for_tier(&self, tier: Tier) -> Option<&TierSource> {
        match tier {
            Tier::Congressional => Some(&self.congressional),
            Tier::StateHouse => Some(&self.state_house),
            Tier::StateSenate => Some(&self.state_senate),
            Tier::Statewide => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, FetchScope};
    use crate::source::Layer;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.output.digest_size, 5);
        assert_eq!(config.fetch.scope, FetchScope::PerDistrict);
        assert!(config.layers.get(Layer::Closure).url.contains("Road_Closures"));
    }

    #[test]
    fn layer_fallbacks_cover_alternate_paths() {
        let closure = &Config::default().layers.closure;
        assert_eq!(closure.fallback_urls, vec![
            "https://services2.arcgis.com/aIrBD8yn1TDTEXoz/ArcGIS/rest/services/Road_Closures/FeatureServer/0/query",
            "https://services2.arcgis.com/aIrBD8yn1TDTEXoz/arcgis/rest/services/Road_Closures_View/FeatureServer/0/query",
        ]);
    }

    #[test]
    fn partial_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{
            "output_dir": "out",
            "fetch": { "scope": "statewide", "rate_limit_ms": 300, "retry": { "max_attempts": 2 } },
            "severity": { "closure": 70 }
        }"#).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.output_dir, std::path::PathBuf::from("out"));
        assert_eq!(config.fetch.scope, FetchScope::Statewide);
        assert_eq!(config.fetch.rate_limit_ms, 300);
        assert_eq!(config.fetch.retry.max_attempts, 2);
        assert_eq!(config.fetch.retry.initial_backoff_ms, 1_000);
        assert_eq!(config.fetch.workers, 4);
        assert_eq!(config.severity.closure, 70);
        assert_eq!(config.severity.restriction, 40);
    }

    #[test]
    fn invalid_values_rejected() {
        let mut config = Config::default();
        config.fetch.workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.layers.restriction.url.clear();
        assert!(config.validate().is_err());
    }
}
