use anyhow::Result;
use roadwatch::pipeline::OutputWriter;

use crate::cli::Cli;
use crate::commands::{evaluation_time, load_config};

pub fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    OutputWriter::new(&config.output_dir).rebuild_digest(&config.output, evaluation_time(cli))?;
    Ok(())
}
