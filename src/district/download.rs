use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Result};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::common::{ensure_dir_exists, write_atomic};
use crate::config::{Config, TierSource};
use crate::district::{BoundaryStore, DiskBoundaryStore, DistrictKey, Tier};
use crate::source::ArcGisClient;

/// Download boundary files for every mapped tier into the configured
/// boundary directory. Returns the number of files written per tier.
pub fn download_boundaries(config: &Config, client: &ArcGisClient) -> Result<BTreeMap<Tier, usize>> {
    ensure_dir_exists(&config.boundary_dir)?;
    let store = DiskBoundaryStore::new(&config.boundary_dir);

    let mut written = BTreeMap::new();
    for tier in Tier::MAPPED {
        let Some(source) = config.boundaries.for_tier(tier) else { continue };
        let features = fetch_tier(client, tier, source);

        let mut count = 0;
        for feature in &features {
            let Some(number) = district_number(&feature["properties"], &source.number_fields) else { continue };
            let Ok(key) = DistrictKey::new(tier, number) else { continue };

            let doc = json!({
                "type": "Feature",
                "properties": {
                    "district_key": key.to_string(),
                    "district_num": number,
                    "name": key.display_name(),
                    "geography": tier.to_str(),
                },
                "geometry": feature["geometry"],
            });
            write_atomic(&store.path_for(key), &serde_json::to_vec(&doc)?)?;
            count += 1;
        }

        info!(tier = tier.to_str(), count, expected = tier.count(), "boundaries saved");
        written.insert(tier, count);
    }

    if written.values().all(|&n| n == 0) {
        bail!("No boundaries fetched; the boundary endpoints may have changed");
    }
    Ok(written)
}

/// Download boundaries unless enough are already on disk (or `force` is set).
pub fn ensure_boundaries(config: &Config, client: &ArcGisClient, force: bool) -> Result<()> {
    let existing = DiskBoundaryStore::new(&config.boundary_dir).available().len();
    if !force && existing >= config.boundaries.min_existing {
        info!(existing, dir = %config.boundary_dir.display(), "boundary files already present; skipping download");
        return Ok(());
    }
    download_boundaries(config, client)?;
    Ok(())
}

/// [`ensure_boundaries`] for a full run: a failed download only warns when
/// boundary files are already on disk.
pub fn ensure_boundaries_or_existing(config: &Config, client: &ArcGisClient) -> Result<()> {
    keep_existing_on_failure(&config.boundary_dir, ensure_boundaries(config, client, false))
}

fn keep_existing_on_failure(dir: &Path, outcome: Result<()>) -> Result<()> {
    let Err(e) = outcome else { return Ok(()) };
    let existing = DiskBoundaryStore::new(dir).available().len();
    if existing == 0 {
        return Err(e);
    }
    warn!(existing, error = %format!("{e:#}"), "boundary download failed; continuing with boundaries on disk");
    Ok(())
}

fn fetch_tier(client: &ArcGisClient, tier: Tier, source: &TierSource) -> Vec<Value> {
    let params = [
        ("where", source.where_clause.clone()),
        ("outFields", "*".to_string()),
        ("outSR", "4326".to_string()),
        ("f", "geojson".to_string()),
        ("returnGeometry", "true".to_string()),
    ];
    for url in &source.urls {
        match client.query_paged(url, &params) {
            Ok(features) if !features.is_empty() => return features,
            Ok(_) => warn!(tier = tier.to_str(), url, "boundary query returned no features"),
            Err(failure) => warn!(tier = tier.to_str(), url, reason = %failure.reason, "boundary query failed"),
        }
    }
    Vec::new()
}

/// First candidate attribute that holds a district number, e.g. "05", 5, or "District 5".
fn district_number(properties: &Value, fields: &[String]) -> Option<u16> {
    fields.iter().find_map(|field| {
        let digits: String = match &properties[field.as_str()] {
            Value::Number(n) => n.as_u64()?.to_string(),
            Value::String(s) => s.chars().filter(|c| c.is_ascii_digit()).collect(),
            _ => return None,
        };
        digits.parse::<u16>().ok().filter(|&n| n > 0)
    })
}
