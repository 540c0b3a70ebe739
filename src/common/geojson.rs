use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon, Rect};
use serde_json::{json, Value};

use crate::error::GeometryError;

type GeomResult<T> = std::result::Result<T, GeometryError>;

fn malformed(msg: impl Into<String>) -> GeometryError { GeometryError::Malformed(msg.into()) }

/// Parse a GeoJSON geometry object (Point, MultiPoint, LineString,
/// MultiLineString, Polygon or MultiPolygon) into a geo::Geometry.
pub(crate) fn parse_geometry(value: &Value) -> GeomResult<Geometry<f64>> {
    let ty = value["type"].as_str()
        .ok_or_else(|| malformed("geometry has no type"))?;
    let coords = value.get("coordinates")
        .ok_or_else(|| malformed(format!("{ty} has no coordinates")))?;

    Ok(match ty {
        "Point" => Geometry::Point(Point(parse_coord(coords)?)),
        "MultiPoint" => Geometry::MultiPoint(MultiPoint(
            as_array(coords)?.iter()
                .map(|c| parse_coord(c).map(Point))
                .collect::<GeomResult<_>>()?
        )),
        "LineString" => Geometry::LineString(parse_line(coords)?),
        "MultiLineString" => Geometry::MultiLineString(MultiLineString(
            as_array(coords)?.iter().map(parse_line).collect::<GeomResult<_>>()?
        )),
        "Polygon" => Geometry::Polygon(parse_polygon(coords)?),
        "MultiPolygon" => Geometry::MultiPolygon(parse_multipolygon(coords)?),
        other => return Err(malformed(format!("unsupported geometry type {other}"))),
    })
}

/// Parse a Polygon or MultiPolygon geometry object into a MultiPolygon.
pub(crate) fn parse_areal(value: &Value) -> GeomResult<MultiPolygon<f64>> {
    match parse_geometry(value)? {
        Geometry::Polygon(polygon) => Ok(MultiPolygon(vec![polygon])),
        Geometry::MultiPolygon(mp) if !mp.0.is_empty() => Ok(mp),
        Geometry::MultiPolygon(_) => Err(malformed("MultiPolygon has no polygons")),
        _ => Err(malformed(format!("expected Polygon or MultiPolygon, got {}", value["type"]))),
    }
}

/// Esri envelope JSON for a rectangle in WGS84.
pub(crate) fn envelope_json(rect: &Rect<f64>) -> Value {
    json!({
        "xmin": rect.min().x,
        "ymin": rect.min().y,
        "xmax": rect.max().x,
        "ymax": rect.max().y,
        "spatialReference": { "wkid": 4326 }
    })
}

fn as_array(value: &Value) -> GeomResult<&Vec<Value>> {
    value.as_array().ok_or_else(|| malformed("coordinates must be an array"))
}

/// Parse a position `[x, y, ...]`; extra ordinates are ignored.
fn parse_coord(value: &Value) -> GeomResult<Coord<f64>> {
    let pos = as_array(value)?;
    if pos.len() < 2 {
        return Err(malformed("position needs at least two ordinates"));
    }
    let x = pos[0].as_f64().ok_or_else(|| malformed("x must be a number"))?;
    let y = pos[1].as_f64().ok_or_else(|| malformed("y must be a number"))?;
    if !x.is_finite() || !y.is_finite() {
        return Err(malformed("non-finite coordinate"));
    }
    Ok(Coord { x, y })
}

fn parse_line(value: &Value) -> GeomResult<LineString<f64>> {
    let coords = as_array(value)?.iter().map(parse_coord).collect::<GeomResult<Vec<_>>>()?;
    if coords.is_empty() {
        return Err(malformed("empty LineString"));
    }
    Ok(LineString(coords))
}

/// Parse a ring and close it if the source left it open.
fn parse_ring(value: &Value) -> GeomResult<LineString<f64>> {
    let mut coords = as_array(value)?.iter().map(parse_coord).collect::<GeomResult<Vec<_>>>()?;
    if let (Some(first), Some(last)) = (coords.first().copied(), coords.last().copied()) {
        if first != last {
            coords.push(first);
        }
    }
    if coords.len() < 4 {
        return Err(malformed(format!("ring has {} positions, need at least 4", coords.len())));
    }
    Ok(LineString(coords))
}

/// Polygon coordinates: `[exterior, hole, hole, ...]`.
fn parse_polygon(value: &Value) -> GeomResult<Polygon<f64>> {
    let rings = as_array(value)?;
    let exterior = rings.first()
        .ok_or_else(|| malformed("Polygon has no exterior ring"))
        .and_then(parse_ring)?;
    let interiors = rings[1..].iter().map(parse_ring).collect::<GeomResult<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn parse_multipolygon(value: &Value) -> GeomResult<MultiPolygon<f64>> {
    Ok(MultiPolygon(as_array(value)?.iter().map(parse_polygon).collect::<GeomResult<_>>()?))
}

#[cfg(test)]
mod tests {
    use geo::{Geometry, Rect, coord};
    use serde_json::json;

    use super::{envelope_json, parse_areal, parse_geometry};

    #[test]
    fn point_and_line() {
        let p = parse_geometry(&json!({"type": "Point", "coordinates": [-88.2, 40.1, 0.0]})).unwrap();
        assert!(matches!(p, Geometry::Point(pt) if pt.x() == -88.2 && pt.y() == 40.1));

        let l = parse_geometry(&json!({"type": "LineString", "coordinates": [[0, 0], [1, 1]]})).unwrap();
        assert!(matches!(l, Geometry::LineString(ls) if ls.0.len() == 2));
    }

    #[test]
    fn open_ring_is_closed() {
        let mp = parse_areal(&json!({
            "type": "Polygon",
            "coordinates": [[[0, 0], [4, 0], [4, 4], [0, 4]]]
        })).unwrap();
        let ring = mp.0[0].exterior();
        assert_eq!(ring.0.len(), 5);
        assert_eq!(ring.0.first(), ring.0.last());
    }

    #[test]
    fn multipolygon_with_hole() {
        let mp = parse_areal(&json!({
            "type": "MultiPolygon",
            "coordinates": [
                [[[0, 0], [10, 0], [10, 10], [0, 10], [0, 0]], [[4, 4], [6, 4], [6, 6], [4, 6], [4, 4]]],
                [[[20, 20], [21, 20], [21, 21], [20, 20]]]
            ]
        })).unwrap();
        assert_eq!(mp.0.len(), 2);
        assert_eq!(mp.0[0].interiors().len(), 1);
    }

    #[test]
    fn malformed_inputs() {
        for bad in [
            json!(null),
            json!({"type": "Point"}),
            json!({"type": "Point", "coordinates": [1]}),
            json!({"type": "Point", "coordinates": ["a", "b"]}),
            json!({"type": "LineString", "coordinates": []}),
            json!({"type": "Polygon", "coordinates": [[[0, 0], [1, 1]]]}),
            json!({"type": "GeometryCollection", "geometries": []}),
        ] {
            assert!(parse_geometry(&bad).is_err(), "{bad} should be rejected");
        }
        assert!(parse_areal(&json!({"type": "Point", "coordinates": [0, 0]})).is_err());
    }

    #[test]
    fn envelope_has_spatial_reference() {
        let env = envelope_json(&Rect::new(coord! { x: -91.5, y: 37.0 }, coord! { x: -87.5, y: 42.5 }));
        assert_eq!(env["xmin"], json!(-91.5));
        assert_eq!(env["ymax"], json!(42.5));
        assert_eq!(env["spatialReference"]["wkid"], json!(4326));
    }
}
