use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::common::{ensure_dir_exists, write_atomic};
use crate::config::OutputConfig;
use crate::district::DistrictKey;
use crate::pipeline::{EventDocument, StatewideDigest};

/// Persists one `{district_key}.json` per district plus the statewide digest.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
}

impl OutputWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }

    #[inline] pub fn dir(&self) -> &Path { &self.dir }

    pub fn path_for(&self, key: DistrictKey) -> PathBuf { self.dir.join(format!("{key}.json")) }

    /// Replace the document for `doc.district_key`; readers never see a partial file.
    pub fn write(&self, doc: &EventDocument) -> Result<PathBuf> {
        ensure_dir_exists(&self.dir)?;
        let path = self.path_for(doc.district_key);
        let mut bytes = serde_json::to_vec_pretty(doc)
            .with_context(|| format!("Failed to serialize {}", doc.district_key))?;
        bytes.push(b'\n');
        write_atomic(&path, &bytes)?;
        Ok(path)
    }

    /// District documents present in the output directory, in key order.
    /// The statewide document and unrelated files are skipped.
    pub fn district_files(&self) -> Result<Vec<(DistrictKey, PathBuf)>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.with_context(|| format!("Failed to list {}", self.dir.display()))?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(key) = path.file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<DistrictKey>().ok())
            else { continue };
            if !key.is_statewide() {
                files.push((key, path.to_path_buf()));
            }
        }
        files.sort_unstable();
        Ok(files)
    }

    /// Read back every district document in the output directory, in key order.
    pub fn read_districts(&self) -> Result<Vec<EventDocument>> {
        self.district_files()?.into_iter()
            .map(|(_, path)| {
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                serde_json::from_slice::<EventDocument>(&bytes)
                    .with_context(|| format!("Failed to parse {}", path.display()))
            })
            .collect()
    }

    /// Delete district documents whose key is not in `keep`, so the directory
    /// holds exactly one run's output. Returns the removed keys.
    pub fn remove_stale(&self, keep: &[DistrictKey]) -> Result<Vec<DistrictKey>> {
        let mut removed = Vec::new();
        for (key, path) in self.district_files()? {
            if keep.contains(&key) {
                continue;
            }
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
            debug!(district = %key, "removed stale district document");
            removed.push(key);
        }
        Ok(removed)
    }

    pub fn write_digest(&self, digest: &StatewideDigest, output: &OutputConfig, now: DateTime<Utc>) -> Result<PathBuf> {
        let doc = EventDocument::statewide(digest, now, output.digest_size, output.digest_items);
        let path = self.write(&doc)?;
        info!(distinct = digest.events.len(), top = doc.top.len(), path = %path.display(), "digest written");
        Ok(path)
    }

    /// Recompute the statewide digest from the district documents on disk.
    pub fn rebuild_digest(&self, output: &OutputConfig, now: DateTime<Utc>) -> Result<PathBuf> {
        let docs = self.read_districts()?;
        debug!(documents = docs.len(), "rebuilding digest from disk");
        let digest = StatewideDigest::from_events(docs.into_iter().flat_map(|doc| doc.items));
        self.write_digest(&digest, output, now)
    }
}
