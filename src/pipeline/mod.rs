mod aggregate;
mod dedup;
mod run;
mod writer;

pub use aggregate::{DistrictResult, EventDocument, StatewideDigest, TypeCounts};
pub use dedup::dedup_by_id;
pub use run::{CancelFlag, LayerFailure, Pipeline, RunReport, Targets};
pub use writer::OutputWriter;
