/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/
use crate::structures::GeographicCoordinate;

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const SQ_KM_TO_HA: f64 = 100.0;

/// Signed area of a geographic polygon in hectares via the spherical excess
/// formula on the WGS-84 sphere. Positive for counter-clockwise vertex
/// order; the closing segment is implied when the polygon is left open.
pub fn geographic_polygon_area_signed(polygon: &[GeographicCoordinate]) -> f64 {
    let n = polygon.len();
    let mut area = 0f64;
    for i in 0..n {
        let g1 = polygon[i];
        let g2 = polygon[(i + 1) % n];
        area += (g2.lon - g1.lon).to_radians()
            * (g1.lat.to_radians().sin() + g2.lat.to_radians().sin());
    }
    -0.5 * area * EARTH_RADIUS_KM * EARTH_RADIUS_KM * SQ_KM_TO_HA
}

/// Absolute polygon area in hectares, as reported in reservoir records.
pub fn geographic_polygon_area(polygon: &[GeographicCoordinate]) -> f64 {
    geographic_polygon_area_signed(polygon).abs()
}

/// Longitudes at which the polygon boundary crosses the given latitude,
/// sorted ascending. Consecutive pairs bound the polygon interior along the
/// scanline. The closing segment is implied when the polygon is left open.
pub fn find_polygon_intersections(lat: f64, polygon: &[GeographicCoordinate]) -> Vec<f64> {
    let n = polygon.len();
    let mut to_return = vec![];
    for i in 0..n {
        let line = [polygon[i], polygon[(i + 1) % n]];
        if (line[0].lat < lat && line[1].lat >= lat) || (line[0].lat >= lat && line[1].lat < lat) {
            to_return.push(
                line[0].lon
                    + (lat - line[0].lat) / (line[1].lat - line[0].lat)
                        * (line[1].lon - line[0].lon),
            );
        }
    }
    to_return.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    to_return
}

/// Even-odd test of a point against a set of polygons.
pub fn point_in_polygons(point: GeographicCoordinate, polygons: &[Vec<GeographicCoordinate>]) -> bool {
    for polygon in polygons {
        let intersections = find_polygon_intersections(point.lat, polygon);
        let crossings = intersections.iter().filter(|lon| **lon < point.lon).count();
        if crossings % 2 == 1 {
            return true;
        }
    }
    false
}

/// One pass of Chaikin corner cutting: each edge is replaced by its quarter
/// points, smoothing the staircase boundary traced off the raster.
pub fn corner_cut_poly(polygon: &[GeographicCoordinate]) -> Vec<GeographicCoordinate> {
    let n = polygon.len();
    let mut to_return = Vec::with_capacity(2 * n);
    for i in 0..n {
        let p1 = polygon[i];
        let p2 = polygon[(i + 1) % n];
        to_return.push(GeographicCoordinate::new(
            p1.lat + 0.25 * (p2.lat - p1.lat),
            p1.lon + 0.25 * (p2.lon - p1.lon),
        ));
        to_return.push(GeographicCoordinate::new(
            p1.lat + 0.75 * (p2.lat - p1.lat),
            p1.lon + 0.75 * (p2.lon - p1.lon),
        ));
    }
    to_return
}

fn perpendicular_deviation(
    p: GeographicCoordinate,
    a: GeographicCoordinate,
    b: GeographicCoordinate,
) -> f64 {
    let dx = b.lon - a.lon;
    let dy = b.lat - a.lat;
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        let ex = p.lon - a.lon;
        let ey = p.lat - a.lat;
        return (ex * ex + ey * ey).sqrt();
    }
    ((p.lon - a.lon) * dy - (p.lat - a.lat) * dx).abs() / len
}

/// Ramer-Douglas-Peucker compression with a half-cell tolerance, applied
/// after corner cutting to keep exported polygons small.
pub fn compress_poly(polygon: &[GeographicCoordinate]) -> Vec<GeographicCoordinate> {
    let tolerance = 0.5 / 3600.0;
    if polygon.len() < 3 {
        return polygon.to_vec();
    }
    let mut keep = vec![false; polygon.len()];
    keep[0] = true;
    keep[polygon.len() - 1] = true;
    let mut stack = vec![(0usize, polygon.len() - 1)];
    while let Some((first, last)) = stack.pop() {
        if last <= first + 1 {
            continue;
        }
        let mut max_dev = 0.0;
        let mut max_idx = first;
        for i in first + 1..last {
            let dev = perpendicular_deviation(polygon[i], polygon[first], polygon[last]);
            if dev > max_dev {
                max_dev = dev;
                max_idx = i;
            }
        }
        if max_dev > tolerance {
            keep[max_idx] = true;
            stack.push((first, max_idx));
            stack.push((max_idx, last));
        }
    }
    polygon
        .iter()
        .zip(keep.iter())
        .filter(|(_, k)| **k)
        .map(|(p, _)| *p)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::structures::GeographicCoordinate;

    fn unit_square() -> Vec<GeographicCoordinate> {
        vec![
            GeographicCoordinate::new(0.0, 0.0),
            GeographicCoordinate::new(0.0, 1.0),
            GeographicCoordinate::new(1.0, 1.0),
            GeographicCoordinate::new(1.0, 0.0),
        ]
    }

    #[test]
    fn test_one_degree_square_area() {
        // a 1°×1° square at the equator is roughly 12,300 km²
        let area = geographic_polygon_area(&unit_square());
        assert!((area / SQ_KM_TO_HA - 12364.0).abs() < 50.0);
    }

    #[test]
    fn test_area_invariant_under_rotation() {
        let poly = unit_square();
        let mut rotated = poly.clone();
        rotated.rotate_left(2);
        let a1 = geographic_polygon_area_signed(&poly);
        let a2 = geographic_polygon_area_signed(&rotated);
        assert!((a1 - a2).abs() < 1e-6 * a1.abs());
    }

    #[test]
    fn test_area_changes_sign_under_reversal() {
        let poly = unit_square();
        let mut reversed = poly.clone();
        reversed.reverse();
        let a1 = geographic_polygon_area_signed(&poly);
        let a2 = geographic_polygon_area_signed(&reversed);
        assert!((a1 + a2).abs() < 1e-6 * a1.abs());
        assert_eq!(geographic_polygon_area(&poly), geographic_polygon_area(&reversed));
    }

    #[test]
    fn test_polygon_intersections() {
        let xs = find_polygon_intersections(0.5, &unit_square());
        assert_eq!(xs.len(), 2);
        assert!((xs[0] - 0.0).abs() < 1e-12);
        assert!((xs[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_point_in_polygons() {
        let polys = vec![unit_square()];
        assert!(point_in_polygons(GeographicCoordinate::new(0.5, 0.5), &polys));
        assert!(!point_in_polygons(GeographicCoordinate::new(1.5, 0.5), &polys));
        assert!(!point_in_polygons(GeographicCoordinate::new(0.5, 1.5), &polys));
    }

    #[test]
    fn test_corner_cut_doubles_vertex_count() {
        let cut = corner_cut_poly(&unit_square());
        assert_eq!(cut.len(), 8);
        // cut polygon stays inside the hull of the original
        for p in &cut {
            assert!(p.lat >= 0.0 && p.lat <= 1.0);
            assert!(p.lon >= 0.0 && p.lon <= 1.0);
        }
    }

    #[test]
    fn test_compress_drops_collinear_vertices() {
        let mut poly = vec![];
        for i in 0..=10 {
            poly.push(GeographicCoordinate::new(0.0, i as f64 * 0.1));
        }
        poly.push(GeographicCoordinate::new(1.0, 1.0));
        poly.push(GeographicCoordinate::new(1.0, 0.0));
        let compressed = compress_poly(&poly);
        assert!(compressed.len() <= 4);
    }
}
