use anyhow::{bail, Context, Result};
use roadwatch::{
    ensure_boundaries_or_existing, ArcGisClient, CancelFlag, Config, DiskBoundaryStore, DistrictKey, Pipeline, Targets,
};
use tracing::info;

use crate::cli::{Cli, RunArgs};
use crate::commands::{cancel_on_interrupt, evaluation_time, load_config};

/// Boundaries (when fewer than the configured minimum are on disk), then events.
/// A failed boundary download is not fatal while older boundaries remain on disk.
pub fn full(cli: &Cli, args: &RunArgs) -> Result<()> {
    let config = load_config(cli)?;
    let client = ArcGisClient::from_config(&config)?;
    ensure_boundaries_or_existing(&config, &client)?;
    fetch_events(cli, &config, &client, args)
}

pub fn refresh(cli: &Cli, args: &RunArgs) -> Result<()> {
    let config = load_config(cli)?;
    let client = ArcGisClient::from_config(&config)?;
    fetch_events(cli, &config, &client, args)
}

fn fetch_events(cli: &Cli, config: &Config, client: &ArcGisClient, args: &RunArgs) -> Result<()> {
    let targets = match &args.district {
        Some(key) => Targets::One(key.parse::<DistrictKey>().context("Invalid district argument")?),
        None => Targets::All,
    };

    let cancel = CancelFlag::new();
    cancel_on_interrupt(cancel.clone())?;

    let store = DiskBoundaryStore::new(&config.boundary_dir);
    let pipeline = Pipeline::new(config, client, &store)?.with_cancel(cancel);
    let report = pipeline.run(targets, evaluation_time(cli))?;
    report.log_summary();

    if report.cancelled {
        bail!("Run interrupted; {} district document(s) written, digest left unchanged", report.districts_written.len());
    }

    if report.is_total_failure() {
        let layers: Vec<String> = report.total_failure_layers().iter().map(|l| l.to_string()).collect();
        bail!("Event source unreachable for every district (layers: {})", layers.join(", "));
    }
    info!(dir = %config.output_dir.display(), "output written");
    Ok(())
}
