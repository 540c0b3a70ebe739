mod fs;
mod geojson;

pub(crate) use fs::*;
pub(crate) use geojson::*;
