pub mod boundaries;
pub mod digest;
pub mod events;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use roadwatch::{CancelFlag, Config};
use tracing::warn;

use crate::cli::Cli;

/// Config file (or defaults) with the directory flags applied on top.
pub(crate) fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(out) = &cli.out {
        config.output_dir = out.clone();
    }
    if let Some(dir) = &cli.boundaries {
        config.boundary_dir = dir.clone();
    }
    Ok(config)
}

pub(crate) fn evaluation_time(cli: &Cli) -> DateTime<Utc> { cli.as_of.unwrap_or_else(Utc::now) }

/// Exit status after a second interrupt, as a shell reports SIGINT.
const INTERRUPTED: i32 = 130;

/// Cancel `flag` on the first Ctrl-C so the run stops between districts.
/// A second Ctrl-C exits at once.
pub(crate) fn cancel_on_interrupt(flag: CancelFlag) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .context("Failed to start signal runtime")?;

    std::thread::Builder::new()
        .name("signal".into())
        .spawn(move || runtime.block_on(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            warn!("interrupt received; stopping after the districts in flight");
            flag.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(INTERRUPTED);
            }
        }))
        .context("Failed to spawn signal thread")?;
    Ok(())
}
