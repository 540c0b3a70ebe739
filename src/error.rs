use thiserror::Error;

use crate::district::DistrictKey;
use crate::source::Layer;

/// Failure to obtain features from the event source.
///
/// An empty response is not an error; see [`crate::source::FetchOutcome::Empty`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("{layer} layer unavailable after {attempts} attempt(s): {reason}")]
    Unavailable { layer: Layer, attempts: u32, reason: String },
}

impl SourceError {
    pub fn layer(&self) -> Layer {
        match self {
            SourceError::Unavailable { layer, .. } => *layer,
        }
    }
}

/// Problems loading a district polygon from the boundary store.
#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error("no boundary on file for {0}")]
    Missing(DistrictKey),

    #[error("boundary for {key} is unusable: {reason}")]
    Invalid { key: DistrictKey, reason: String },
}

/// A geometry that could not be turned into coordinates.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("malformed geometry: {0}")]
    Malformed(String),
}
