use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Road event digests per legislative district
#[derive(clap::Parser, Debug)]
#[command(name = "roadwatch", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase log verbosity (-v, -vv); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// JSON config file; defaults apply to anything it leaves out
    #[arg(long, global = true, value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Output directory for district documents and the digest
    #[arg(long, global = true, value_hint = clap::ValueHint::DirPath)]
    pub out: Option<PathBuf>,

    /// Directory of district boundary files
    #[arg(long, global = true, value_hint = clap::ValueHint::DirPath)]
    pub boundaries: Option<PathBuf>,

    /// Evaluation time (RFC 3339), defaults to now
    #[arg(long, global = true)]
    pub as_of: Option<DateTime<Utc>>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Fetch boundaries if needed, then events
    Full(RunArgs),

    /// Fetch events only, using the boundaries on disk
    Refresh(RunArgs),

    /// Rebuild the statewide digest from the district documents on disk
    Digest,

    /// Download district boundaries
    Boundaries(BoundaryArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Single district key, e.g. IL-H-007 or US-IL-CD-05; all districts if omitted
    pub district: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct BoundaryArgs {
    /// Download even if boundary files are already present
    #[arg(long)]
    pub force: bool,
}
