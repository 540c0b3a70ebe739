mod bbox;
mod index;

use bbox::BoundingBox;
pub use index::DistrictIndex;
