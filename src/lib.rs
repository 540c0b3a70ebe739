#![doc = "Roadwatch: per-district road event digests"]
mod common;
pub mod config;
pub mod district;
pub mod error;
pub mod event;
pub mod geom;
pub mod pipeline;
pub mod source;

#[doc(inline)]
pub use config::{Config, FetchScope};

#[doc(inline)]
pub use district::{BoundaryStore, DiskBoundaryStore, District, DistrictKey, MemBoundaryStore, Tier};

#[doc(inline)]
pub use event::{EventStatus, RoadEvent};

#[doc(inline)]
pub use pipeline::{CancelFlag, Pipeline, RunReport, Targets};

#[doc(inline)]
pub use source::{EventSource, FetchOutcome, Layer};

#[cfg(feature = "download")]
#[doc(inline)]
pub use source::ArcGisClient;

#[cfg(feature = "download")]
#[doc(inline)]
pub use district::{download_boundaries, ensure_boundaries, ensure_boundaries_or_existing};
