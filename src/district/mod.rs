#[cfg(feature = "download")]
mod download;
mod key;
mod store;

use geo::{BoundingRect, MultiPolygon, Rect};

#[cfg(feature = "download")]
pub use download::{download_boundaries, ensure_boundaries, ensure_boundaries_or_existing};
pub use key::{DistrictKey, Tier};
pub use store::{BoundaryStore, DiskBoundaryStore, MemBoundaryStore};

/// One district polygon (WGS84 lon/lat), immutable for the run.
#[derive(Debug, Clone)]
pub struct District {
    key: DistrictKey,
    name: String,
    geometry: MultiPolygon<f64>,
}

impl District {
    pub fn new(key: DistrictKey, geometry: MultiPolygon<f64>) -> Self {
        Self { name: key.display_name(), key, geometry }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[inline] pub fn key(&self) -> DistrictKey { self.key }

    #[inline] pub fn name(&self) -> &str { &self.name }

    #[inline] pub fn geometry(&self) -> &MultiPolygon<f64> { &self.geometry }

    /// Bounding rectangle, or `None` for an empty geometry.
    #[inline] pub fn bounds(&self) -> Option<Rect<f64>> { self.geometry.bounding_rect() }
}

/// Smallest rectangle covering every district.
pub fn union_bounds(districts: &[District]) -> Option<Rect<f64>> {
    districts.iter()
        .filter_map(District::bounds)
        .reduce(|a, b| Rect::new(
            geo::Coord { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
            geo::Coord { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
        ))
}
