use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{atomic::{AtomicBool, Ordering}, Arc};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use geo::Rect;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{Config, FetchScope, OutputConfig};
use crate::district::{union_bounds, BoundaryStore, District, DistrictKey};
use crate::event::{Normalizer, RoadEvent, SeverityScorer};
use crate::geom::DistrictIndex;
use crate::pipeline::{DistrictResult, EventDocument, OutputWriter, StatewideDigest};
use crate::source::{EventSource, FetchOutcome, Layer, RawFeature};

/// Shared flag used to abort a run between district fetches.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }

    #[inline] pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

/// Which districts a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Targets {
    /// The full roster; the digest is built from this run's results.
    All,
    /// One district; the digest is rebuilt from the documents on disk.
    One(DistrictKey),
}

/// A layer that could not be fetched. `district` is `None` for a statewide query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerFailure {
    pub district: Option<DistrictKey>,
    pub layer: Layer,
    pub reason: String,
}

/// What a run did, for the end-of-run summary and the exit status.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Districts whose boundary loaded and whose events were requested.
    pub districts_processed: usize,
    pub districts_written: Vec<DistrictKey>,
    /// Documents left by an earlier full run for districts this run did not write.
    pub districts_removed: Vec<DistrictKey>,
    pub boundary_problems: Vec<(DistrictKey, String)>,
    pub failures: Vec<LayerFailure>,
    pub empty_layers: usize,
    pub malformed_geometry: usize,
    pub cancelled: bool,
    pub digest_written: bool,
}

impl RunReport {
    /// Layers that failed for every processed district.
    pub fn total_failure_layers(&self) -> Vec<Layer> {
        Layer::ALL.into_iter()
            .filter(|&layer| {
                let failed: Vec<&LayerFailure> = self.failures.iter().filter(|f| f.layer == layer).collect();
                if failed.iter().any(|f| f.district.is_none()) {
                    return true;
                }
                let districts: BTreeSet<DistrictKey> = failed.iter().filter_map(|f| f.district).collect();
                self.districts_processed > 0 && districts.len() >= self.districts_processed
            })
            .collect()
    }

    #[inline] pub fn is_total_failure(&self) -> bool { !self.total_failure_layers().is_empty() }

    pub fn log_summary(&self) {
        info!(
            processed = self.districts_processed,
            written = self.districts_written.len(),
            removed = self.districts_removed.len(),
            empty_layers = self.empty_layers,
            malformed_geometry = self.malformed_geometry,
            digest = self.digest_written,
            "run finished"
        );
        for (district, reason) in &self.boundary_problems {
            warn!(%district, %reason, "district skipped");
        }
        for failure in &self.failures {
            match failure.district {
                Some(district) => warn!(%district, layer = %failure.layer, reason = %failure.reason, "layer failed"),
                None => warn!(layer = %failure.layer, reason = %failure.reason, "statewide layer failed"),
            }
        }
        for layer in self.total_failure_layers() {
            warn!(%layer, "layer failed for every district");
        }
        if self.cancelled {
            warn!("run was cancelled; the digest was not rewritten");
        }
    }
}

/// Per-district result of the fetch/normalize/associate stages.
struct DistrictOutcome {
    key: DistrictKey,
    failures: Vec<LayerFailure>,
    empty_layers: usize,
    malformed_geometry: usize,
}

/// Raw features for one extent, plus what went wrong fetching them.
#[derive(Default)]
struct Fetched {
    features: Vec<RawFeature>,
    failures: Vec<LayerFailure>,
    empty_layers: usize,
}

/// Fetch, normalize, score, associate, aggregate, and write.
pub struct Pipeline<'a> {
    source: &'a dyn EventSource,
    boundaries: &'a dyn BoundaryStore,
    normalizer: Normalizer,
    scorer: SeverityScorer,
    writer: OutputWriter,
    scope: FetchScope,
    workers: usize,
    output: OutputConfig,
    cancel: CancelFlag,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &Config, source: &'a dyn EventSource, boundaries: &'a dyn BoundaryStore) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source,
            boundaries,
            normalizer: Normalizer::from_config(config),
            scorer: SeverityScorer::new(&config.severity)?,
            writer: OutputWriter::new(&config.output_dir),
            scope: config.fetch.scope,
            workers: config.fetch.workers,
            output: config.output.clone(),
            cancel: CancelFlag::new(),
        })
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    #[inline] pub fn writer(&self) -> &OutputWriter { &self.writer }

    /// Run the pipeline at evaluation time `now`. Per-district and per-layer
    /// failures are recorded in the report; only IO on the output directory
    /// fails the run.
    pub fn run(&self, targets: Targets, now: DateTime<Utc>) -> Result<RunReport> {
        let mut report = RunReport::default();

        let keys = match targets {
            Targets::All => DistrictKey::roster(),
            Targets::One(key) if key.is_statewide() => Vec::new(),
            Targets::One(key) => vec![key],
        };
        let districts = self.load_districts(&keys, &mut report);
        info!(districts = districts.len(), scope = ?self.scope, %now, "starting run");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .context("Failed to build worker pool")?;

        let (outcomes, results) = match self.scope {
            FetchScope::PerDistrict => pool.install(|| self.run_per_district(&districts, now))?,
            FetchScope::Statewide => pool.install(|| self.run_statewide(&districts, now, &mut report))?,
        };

        report.districts_processed = outcomes.len();
        for outcome in outcomes {
            report.districts_written.push(outcome.key);
            report.failures.extend(outcome.failures);
            report.empty_layers += outcome.empty_layers;
            report.malformed_geometry += outcome.malformed_geometry;
        }

        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        match targets {
            Targets::All => {
                report.districts_removed = self.writer.remove_stale(&report.districts_written)?;
                self.writer.write_digest(&StatewideDigest::from_results(&results), &self.output, now)?;
            }
            Targets::One(_) => {
                self.rebuild_digest(now)?;
            }
        }
        report.digest_written = true;
        Ok(report)
    }

    /// Rebuild the statewide digest from the district documents already written.
    pub fn rebuild_digest(&self, now: DateTime<Utc>) -> Result<PathBuf> {
        self.writer.rebuild_digest(&self.output, now)
    }

    fn load_districts(&self, keys: &[DistrictKey], report: &mut RunReport) -> Vec<District> {
        let mut districts = Vec::with_capacity(keys.len());
        for &key in keys {
            match self.boundaries.load(key) {
                Ok(district) if district.bounds().is_some() => districts.push(district),
                Ok(_) => {
                    warn!(district = %key, "boundary has no extent; skipping district");
                    report.boundary_problems.push((key, "empty geometry".to_string()));
                }
                Err(e) => {
                    warn!(district = %key, error = %e, "skipping district");
                    report.boundary_problems.push((key, e.to_string()));
                }
            }
        }
        districts
    }

    fn run_per_district(&self, districts: &[District], now: DateTime<Utc>) -> Result<(Vec<DistrictOutcome>, Vec<DistrictResult>)> {
        let done: Vec<Option<(DistrictOutcome, DistrictResult)>> = districts.par_iter()
            .map(|district| -> Result<Option<(DistrictOutcome, DistrictResult)>> {
                if self.cancel.is_cancelled() {
                    return Ok(None);
                }
                let Some(extent) = district.bounds() else { return Ok(None) };
                let fetched = self.fetch_all(&extent, Some(district.key()));
                let events = self.prepare(&fetched.features, now);
                let malformed_geometry = events.iter().filter(|e| e.point().is_none()).count();

                let index = DistrictIndex::new(std::slice::from_ref(district));
                let placed = index.associate(&events).into_iter().next().unwrap_or_default();
                let result = self.write_district(district.key(), placed, now)?;

                let outcome = DistrictOutcome {
                    key: district.key(),
                    failures: fetched.failures,
                    empty_layers: fetched.empty_layers,
                    malformed_geometry,
                };
                Ok(Some((outcome, result)))
            })
            .collect::<Result<_>>()?;

        Ok(done.into_iter().flatten().unzip())
    }

    fn run_statewide(
        &self,
        districts: &[District],
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<(Vec<DistrictOutcome>, Vec<DistrictResult>)> {
        let Some(extent) = union_bounds(districts) else { return Ok((Vec::new(), Vec::new())) };
        if self.cancel.is_cancelled() {
            return Ok((Vec::new(), Vec::new()));
        }

        let fetched = self.fetch_all(&extent, None);
        report.failures.extend(fetched.failures);
        report.empty_layers += fetched.empty_layers;

        let events = self.prepare(&fetched.features, now);
        report.malformed_geometry += events.iter().filter(|e| e.point().is_none()).count();

        let buckets = DistrictIndex::new(districts).associate(&events);
        let done: Vec<Option<(DistrictOutcome, DistrictResult)>> = districts.par_iter()
            .zip(buckets)
            .map(|(district, placed)| -> Result<Option<(DistrictOutcome, DistrictResult)>> {
                if self.cancel.is_cancelled() {
                    return Ok(None);
                }
                let result = self.write_district(district.key(), placed, now)?;
                let outcome = DistrictOutcome {
                    key: district.key(),
                    failures: Vec::new(),
                    empty_layers: 0,
                    malformed_geometry: 0,
                };
                Ok(Some((outcome, result)))
            })
            .collect::<Result<_>>()?;

        Ok(done.into_iter().flatten().unzip())
    }

    /// Query every layer over `extent`. An unavailable layer contributes no
    /// features and is recorded; the other layers are unaffected.
    fn fetch_all(&self, extent: &Rect<f64>, district: Option<DistrictKey>) -> Fetched {
        let mut fetched = Fetched::default();
        for layer in Layer::ALL {
            match self.source.fetch(layer, extent) {
                Ok(FetchOutcome::Features(features)) => {
                    debug!(district = ?district, %layer, count = features.len(), "fetched layer");
                    fetched.features.extend(features);
                }
                Ok(FetchOutcome::Empty) => {
                    debug!(district = ?district, %layer, "layer returned no features");
                    fetched.empty_layers += 1;
                }
                Err(e) => {
                    match district {
                        Some(district) => warn!(%district, %layer, error = %e, "layer unavailable; contributing no events"),
                        None => warn!(%layer, error = %e, "layer unavailable statewide; contributing no events"),
                    }
                    fetched.failures.push(LayerFailure { district, layer, reason: e.to_string() });
                }
            }
        }
        fetched
    }

    /// Normalize and score raw features.
    fn prepare(&self, features: &[RawFeature], now: DateTime<Utc>) -> Vec<RoadEvent> {
        let mut events: Vec<RoadEvent> = features.iter().map(|raw| self.normalizer.normalize(raw, now)).collect();
        self.scorer.apply(&mut events, now);
        events
    }

    fn write_district(&self, key: DistrictKey, events: Vec<RoadEvent>, now: DateTime<Utc>) -> Result<DistrictResult> {
        let result = DistrictResult::new(key, events);
        let doc = EventDocument::district(&result, now, self.output.district_top);
        self.writer.write(&doc)?;
        debug!(district = %key, total = doc.total, closures = doc.counts.closures, "district written");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::{LayerFailure, RunReport};
    use crate::district::DistrictKey;
    use crate::source::Layer;

    fn failure(district: Option<&str>, layer: Layer) -> LayerFailure {
        LayerFailure { district: district.map(|s| s.parse().unwrap()), layer, reason: "HTTP 503".into() }
    }

    #[test]
    fn partial_failure_is_not_total() {
        let report = RunReport {
            districts_processed: 2,
            failures: vec![failure(Some("IL-H-001"), Layer::Closure)],
            ..RunReport::default()
        };
        assert!(!report.is_total_failure());
    }

    #[test]
    fn layer_failing_everywhere_is_total() {
        let report = RunReport {
            districts_processed: 2,
            failures: vec![
                failure(Some("IL-H-001"), Layer::Closure),
                failure(Some("IL-H-002"), Layer::Closure),
                failure(Some("IL-H-002"), Layer::Construction),
            ],
            ..RunReport::default()
        };
        assert_eq!(report.total_failure_layers(), vec![Layer::Closure]);

        let statewide = RunReport { failures: vec![failure(None, Layer::Restriction)], ..RunReport::default() };
        assert_eq!(statewide.total_failure_layers(), vec![Layer::Restriction]);
    }

    #[test]
    fn nothing_processed_is_not_total() {
        let report = RunReport { boundary_problems: vec![(DistrictKey::STATEWIDE, "missing".into())], ..RunReport::default() };
        assert!(!report.is_total_failure());
    }
}
