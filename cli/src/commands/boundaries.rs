use anyhow::Result;
use roadwatch::{ensure_boundaries, ArcGisClient};

use crate::cli::{BoundaryArgs, Cli};
use crate::commands::load_config;

pub fn run(cli: &Cli, args: &BoundaryArgs) -> Result<()> {
    let config = load_config(cli)?;
    let client = ArcGisClient::from_config(&config)?;
    ensure_boundaries(&config, &client, args.force)
}
