use geo::{BoundingRect, Intersects, Point};
use rstar::{RTree, AABB};
use tracing::debug;

use crate::district::District;
use crate::event::RoadEvent;
use crate::geom::BoundingBox;

/// R-tree over district bounding boxes, backed by exact polygon tests.
#[derive(Debug)]
pub struct DistrictIndex<'a> {
    districts: &'a [District],
    rtree: RTree<BoundingBox>,
}

impl<'a> DistrictIndex<'a> {
    pub fn new(districts: &'a [District]) -> Self {
        Self {
            rtree: RTree::bulk_load(
                districts.iter().enumerate()
                    .filter_map(|(i, d)| d.geometry().bounding_rect().map(|r| BoundingBox::new(i, r)))
                    .collect()
            ),
            districts,
        }
    }

    #[inline] pub fn districts(&self) -> &'a [District] { self.districts }

    /// Indices of the districts whose polygon contains `point` or has it on
    /// its boundary, in ascending order.
    pub fn locate(&self, point: &Point<f64>) -> Vec<usize> {
        let envelope = AABB::from_point([point.x(), point.y()]);
        let mut hits: Vec<usize> = self.rtree.locate_in_envelope_intersecting(&envelope)
            .map(|bbox| bbox.idx())
            .filter(|&idx| self.districts[idx].geometry().intersects(point))
            .collect();
        hits.sort_unstable();
        hits
    }

    /// Assign each event to every district it falls in. The result is
    /// parallel to the indexed districts; events with no representative point
    /// or outside every district are left out.
    pub fn associate(&self, events: &[RoadEvent]) -> Vec<Vec<RoadEvent>> {
        let mut buckets = vec![Vec::new(); self.districts.len()];
        let mut unplaced = 0usize;
        for event in events {
            let Some(point) = event.point() else { continue };
            let hits = self.locate(&point);
            if hits.is_empty() {
                unplaced += 1;
            }
            for idx in hits {
                buckets[idx].push(event.clone());
            }
        }
        if unplaced > 0 {
            debug!(unplaced, "events outside every indexed district");
        }
        buckets
    }
}

#[cfg(test)]
mod tests {
    use geo::{LineString, MultiPolygon, Point, Polygon, coord};

    use super::DistrictIndex;
    use crate::district::{District, DistrictKey};
    use crate::event::fixtures::event;

    fn square(x0: f64, y0: f64, size: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::new(vec![
                coord! { x: x0, y: y0 },
                coord! { x: x0 + size, y: y0 },
                coord! { x: x0 + size, y: y0 + size },
                coord! { x: x0, y: y0 + size },
                coord! { x: x0, y: y0 },
            ]),
            vec![],
        )
    }

    fn district(key: &str, polygons: Vec<Polygon<f64>>) -> District {
        District::new(key.parse::<DistrictKey>().unwrap(), MultiPolygon(polygons))
    }

    fn districts() -> Vec<District> {
        let mut donut = square(0.0, 0.0, 10.0);
        donut.interiors_push(square(4.0, 4.0, 2.0).exterior().clone());
        vec![
            district("IL-H-001", vec![donut]),
            district("IL-H-002", vec![square(10.0, 0.0, 10.0), square(30.0, 30.0, 1.0)]),
        ]
    }

    #[test]
    fn interior_point_hits_one_district() {
        let ds = districts();
        let index = DistrictIndex::new(&ds);
        assert_eq!(index.locate(&Point::new(1.0, 1.0)), vec![0]);
        assert_eq!(index.locate(&Point::new(15.0, 5.0)), vec![1]);
    }

    #[test]
    fn shared_edge_hits_both() {
        let ds = districts();
        let index = DistrictIndex::new(&ds);
        assert_eq!(index.locate(&Point::new(10.0, 5.0)), vec![0, 1]);
    }

    #[test]
    fn hole_and_outside_miss() {
        let ds = districts();
        let index = DistrictIndex::new(&ds);
        assert!(index.locate(&Point::new(5.0, 5.0)).is_empty());
        assert!(index.locate(&Point::new(25.0, 25.0)).is_empty());
        assert!(index.locate(&Point::new(-1.0, 5.0)).is_empty());
    }

    #[test]
    fn second_polygon_of_multipolygon() {
        let ds = districts();
        let index = DistrictIndex::new(&ds);
        assert_eq!(index.locate(&Point::new(30.5, 30.5)), vec![1]);
    }

    #[test]
    fn associate_skips_pointless_events() {
        let ds = districts();
        let index = DistrictIndex::new(&ds);

        let mut inside = event("closure:1", 0, None);
        (inside.lon, inside.lat) = (Some(2.0), Some(2.0));
        let mut border = event("closure:2", 0, None);
        (border.lon, border.lat) = (Some(10.0), Some(1.0));
        let mut outside = event("closure:3", 0, None);
        (outside.lon, outside.lat) = (Some(50.0), Some(50.0));
        let nowhere = event("closure:4", 0, None);

        let buckets = index.associate(&[inside, border, outside, nowhere]);
        let ids = |i: usize| buckets[i].iter().map(|e| e.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids(0), vec!["closure:1", "closure:2"]);
        assert_eq!(ids(1), vec!["closure:2"]);
    }
}
