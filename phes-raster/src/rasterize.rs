/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/
use crate::Grid;
use phes_common::algorithms::find_polygon_intersections;
use phes_common::structures::{geographic_to_array_res, GeographicCoordinate};

/// Scanline-rasterizes a geographic polygon into a boolean mask. Each raster
/// row is intersected with the polygon boundary and the spans between
/// successive intersection pairs are filled.
pub fn polygon_to_raster(polygon: &[GeographicCoordinate], raster: &mut Grid<bool>) {
    if polygon.len() < 3 {
        return;
    }
    let origin = raster.origin();
    let (lat_res, lon_res) = (raster.lat_res(), raster.lon_res());
    for row in 0..raster.rows() {
        let lat = raster.get_coordinate(row, 0).lat;
        let mut intersections = find_polygon_intersections(lat, polygon);
        for lon in intersections.iter_mut() {
            *lon = geographic_to_array_res(
                GeographicCoordinate::new(0.0, *lon),
                origin,
                lat_res,
                lon_res,
            )
            .col as f64;
        }
        for j in 0..intersections.len() / 2 {
            let start = intersections[2 * j] as isize;
            let end = intersections[2 * j + 1] as isize;
            for col in start..end {
                if raster.within(row, col) {
                    raster.set_value(row, col, true);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::polygon_to_raster;
    use crate::Grid;
    use phes_common::structures::{GeographicCoordinate, SECONDS_PER_DEGREE};

    #[test]
    fn test_rectangle_rasterization() {
        let mut mask: Grid<bool> = Grid::new(20, 20, false, false).unwrap();
        mask.set_origin(GeographicCoordinate::new(1.0, 0.0));
        // a rectangle covering cells roughly rows 5..15, cols 5..15
        let d = 1.0 / SECONDS_PER_DEGREE;
        let polygon = vec![
            GeographicCoordinate::new(1.0 - 5.0 * d, 5.0 * d),
            GeographicCoordinate::new(1.0 - 5.0 * d, 15.0 * d),
            GeographicCoordinate::new(1.0 - 15.0 * d, 15.0 * d),
            GeographicCoordinate::new(1.0 - 15.0 * d, 5.0 * d),
            GeographicCoordinate::new(1.0 - 5.0 * d, 5.0 * d),
        ];
        polygon_to_raster(&polygon, &mut mask);
        assert!(mask.get_value(10, 10));
        assert!(!mask.get_value(2, 2));
        assert!(!mask.get_value(18, 18));
        let count = (0..20)
            .flat_map(|r| (0..20).map(move |c| (r, c)))
            .filter(|(r, c)| mask.get_value(*r, *c))
            .count();
        // roughly a 10x10 block
        assert!(count > 60 && count < 140);
    }
}
