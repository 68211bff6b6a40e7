/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Ground distance in metres covered by one raster cell along a meridian.
/// All DEM tiles are 1-arcsecond (1801-column tiles are pixel-doubled on
/// read), so the cell resolution is a property of the data set rather than a
/// tunable.
pub const CELL_RESOLUTION_M: f64 = 30.87;

/// Arcseconds per degree; 1°×1° tiles are 3600×3600 cells plus a shared edge.
pub const SECONDS_PER_DEGREE: f64 = 3600.0;

/// One of the eight neighbour offsets, in (row, col) deltas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Direction {
    pub row: isize,
    pub col: isize,
}

/// The binding direction table: E, SE, S, SW, W, NW, N, NE. Flow-direction
/// rasters store indices into this table, so the order is part of the wire
/// format.
pub const DIRECTIONS: [Direction; 8] = [
    Direction { row: 0, col: 1 },
    Direction { row: 1, col: 1 },
    Direction { row: 1, col: 0 },
    Direction { row: 1, col: -1 },
    Direction { row: 0, col: -1 },
    Direction { row: -1, col: -1 },
    Direction { row: -1, col: 0 },
    Direction { row: -1, col: 1 },
];

/// A 1°×1° tile identified by the integer (lat, lon) of its south-west corner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridSquare {
    pub lat: i32,
    pub lon: i32,
}

impl GridSquare {
    pub fn new(lat: i32, lon: i32) -> GridSquare {
        GridSquare { lat, lon }
    }

    /// Geographic coordinate of the (0,0) cell centre of this tile once a
    /// border of `border` cells has been stitched around it.
    pub fn origin(&self, border: isize) -> GeographicCoordinate {
        GeographicCoordinate {
            lat: self.lat as f64 + 1.0 + ((border as f64 - 1.0) + 0.5) / SECONDS_PER_DEGREE,
            lon: self.lon as f64 - (border as f64 + 0.5) / SECONDS_PER_DEGREE,
        }
    }

    /// The tile itself followed by its eight neighbours, in the fixed order
    /// used for border stitching and neighbour reservoir reads.
    pub fn neighbors(&self) -> [GridSquare; 9] {
        let (lat, lon) = (self.lat, self.lon);
        [
            GridSquare::new(lat, lon),
            GridSquare::new(lat + 1, lon - 1),
            GridSquare::new(lat + 1, lon),
            GridSquare::new(lat + 1, lon + 1),
            GridSquare::new(lat, lon + 1),
            GridSquare::new(lat - 1, lon + 1),
            GridSquare::new(lat - 1, lon),
            GridSquare::new(lat - 1, lon - 1),
            GridSquare::new(lat, lon - 1),
        ]
    }

    /// True if `gc` falls inside this tile.
    pub fn contains(&self, gc: GeographicCoordinate) -> bool {
        gc.lat.floor() as i32 == self.lat && gc.lon.floor() as i32 == self.lon
    }
}

impl fmt::Display for GridSquare {
    /// Filename stringification with hemisphere letters and zero-padded
    /// magnitudes, e.g. `s23_e146`.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let lon = (self.lon + 180).rem_euclid(360) - 180;
        let c1 = if self.lat < 0 { 's' } else { 'n' };
        let c2 = if lon < 0 { 'w' } else { 'e' };
        write!(f, "{}{:02}_{}{:03}", c1, self.lat.abs(), c2, lon.abs())
    }
}

/// A (latitude, longitude) pair in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeographicCoordinate {
    pub lat: f64,
    pub lon: f64,
}

impl GeographicCoordinate {
    pub fn new(lat: f64, lon: f64) -> GeographicCoordinate {
        GeographicCoordinate { lat, lon }
    }
}

/// A (row, col) address into a raster whose (0,0) cell centre sits at
/// `origin`. Carrying the origin lets coordinates from differently-bordered
/// rasters be compared geographically.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArrayCoordinate {
    pub row: isize,
    pub col: isize,
    pub origin: GeographicCoordinate,
}

impl ArrayCoordinate {
    pub fn new(row: isize, col: isize, origin: GeographicCoordinate) -> ArrayCoordinate {
        ArrayCoordinate { row, col, origin }
    }

    pub fn within(&self, shape: [isize; 2]) -> bool {
        self.row >= 0 && self.col >= 0 && self.row < shape[0] && self.col < shape[1]
    }
}

/// A raster cell paired with its height, ordered so that a max-oriented
/// container yields the *lowest* cell first. Sorting a slice ascending by
/// this ordering arranges cells from highest to lowest.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArrayCoordinateWithHeight {
    pub row: isize,
    pub col: isize,
    pub h: f64,
}

impl ArrayCoordinateWithHeight {
    pub fn new(row: isize, col: isize, h: f64) -> ArrayCoordinateWithHeight {
        ArrayCoordinateWithHeight { row, col, h }
    }
}

impl Eq for ArrayCoordinateWithHeight {}

impl PartialOrd for ArrayCoordinateWithHeight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        other.h.partial_cmp(&self.h)
    }
}

impl Ord for ArrayCoordinateWithHeight {
    fn cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other).unwrap_or(Ordering::Equal)
    }
}

/// Origin of the bordered raster frame covering the tile that contains
/// (`latitude`, `longitude`). Serialized array coordinates are addressed in
/// this frame, so it must agree exactly with `GridSquare::origin` for the
/// enclosing tile.
pub fn get_origin(latitude: f64, longitude: f64, border: isize) -> GeographicCoordinate {
    GridSquare::new(latitude.floor() as i32, longitude.floor() as i32).origin(border)
}

/// Cell-centre geographic coordinate of an array coordinate.
pub fn convert_to_geographic(c: &ArrayCoordinate) -> GeographicCoordinate {
    GeographicCoordinate {
        lat: c.origin.lat - (c.row as f64 + 0.5) / SECONDS_PER_DEGREE,
        lon: c.origin.lon + (c.col as f64 + 0.5) / SECONDS_PER_DEGREE,
    }
}

fn round_half_away(f: f64) -> isize {
    if f >= 0.0 {
        (f + 0.5) as isize
    } else {
        (f - 0.5) as isize
    }
}

/// Array coordinate of a geographic coordinate relative to `origin`, at the
/// native arcsecond step. Uses the `origin − c` latitude convention.
pub fn geographic_to_array(
    c: GeographicCoordinate,
    origin: GeographicCoordinate,
) -> ArrayCoordinate {
    ArrayCoordinate {
        row: round_half_away((origin.lat - c.lat) * SECONDS_PER_DEGREE - 0.5),
        col: round_half_away((c.lon - origin.lon) * SECONDS_PER_DEGREE - 0.5),
        origin,
    }
}

/// Array coordinate of a geographic coordinate under an explicit per-cell
/// step. Note the `c − origin` latitude convention: the caller supplies a
/// negative `lat_res` for north-up rasters. Kept distinct from
/// `geographic_to_array` because the two sign conventions differ.
pub fn geographic_to_array_res(
    c: GeographicCoordinate,
    origin: GeographicCoordinate,
    lat_res: f64,
    lon_res: f64,
) -> ArrayCoordinate {
    ArrayCoordinate {
        row: round_half_away((c.lat - origin.lat) / lat_res - 0.5),
        col: round_half_away((c.lon - origin.lon) / lon_res - 0.5),
        origin,
    }
}

/// Area of a single cell in hectares, with the local-latitude correction.
pub fn find_area(c: &ArrayCoordinate) -> f64 {
    let p = convert_to_geographic(c);
    0.0001 * CELL_RESOLUTION_M * CELL_RESOLUTION_M * p.lat.to_radians().cos()
}

/// Squared distance between two geographic coordinates in km², using the
/// flat-earth approximation with a mid-latitude cosine correction.
pub fn find_distance_sqd_geo(c1: GeographicCoordinate, c2: GeographicCoordinate) -> f64 {
    let coslat = (0.5 * (c1.lat + c2.lat)).to_radians().cos();
    find_distance_sqd_geo_coslat(c1, c2, coslat)
}

/// As `find_distance_sqd_geo` with a precomputed cosine latitude.
pub fn find_distance_sqd_geo_coslat(
    c1: GeographicCoordinate,
    c2: GeographicCoordinate,
    coslat: f64,
) -> f64 {
    let dlat = c2.lat - c1.lat;
    let dlon = (c2.lon - c1.lon) * coslat;
    let deg_to_km = SECONDS_PER_DEGREE * CELL_RESOLUTION_M * 0.001;
    (dlat * dlat + dlon * dlon) * deg_to_km * deg_to_km
}

pub fn find_distance_geo(c1: GeographicCoordinate, c2: GeographicCoordinate) -> f64 {
    find_distance_sqd_geo(c1, c2).sqrt()
}

/// Squared distance between two array coordinates in km². Same-origin pairs
/// take a fast path in cell space.
pub fn find_distance_sqd(c1: &ArrayCoordinate, c2: &ArrayCoordinate, coslat: f64) -> f64 {
    if c1.origin == c2.origin {
        let drow = (c2.row - c1.row) as f64;
        let dcol = (c2.col - c1.col) as f64 * coslat;
        let cell_km = CELL_RESOLUTION_M * 0.001;
        return (drow * drow + dcol * dcol) * cell_km * cell_km;
    }
    find_distance_sqd_geo_coslat(convert_to_geographic(c1), convert_to_geographic(c2), coslat)
}

pub fn find_distance(c1: &ArrayCoordinate, c2: &ArrayCoordinate) -> f64 {
    find_distance_sqd_geo(convert_to_geographic(c1), convert_to_geographic(c2)).sqrt()
}

/// Ground distance in metres between two orthogonally adjacent cells.
pub fn find_orthogonal_nn_distance(c1: &ArrayCoordinate, c2: &ArrayCoordinate) -> f64 {
    if c1.col == c2.col {
        return CELL_RESOLUTION_M;
    }
    let p1 = convert_to_geographic(c1);
    let p2 = convert_to_geographic(c2);
    (0.5 * (p1.lat + p2.lat)).to_radians().cos() * CELL_RESOLUTION_M
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_grid_square_stringification() {
        assert_eq!(GridSquare::new(-23, 146).to_string(), "s23_e146");
        assert_eq!(GridSquare::new(5, -103).to_string(), "n05_w103");
        assert_eq!(GridSquare::new(0, 0).to_string(), "n00_e000");
        // longitudes are normalized into [-180, 180)
        assert_eq!(GridSquare::new(10, 185).to_string(), "n10_w175");
    }

    #[test]
    fn test_coordinate_round_trip() {
        let square = GridSquare::new(-23, 146);
        let origin = square.origin(3600);
        let c = ArrayCoordinate::new(4210, 5162, origin);
        let geo = convert_to_geographic(&c);
        let back = geographic_to_array(geo, origin);
        assert_eq!(back.row, c.row);
        assert_eq!(back.col, c.col);
    }

    #[test]
    fn test_geographic_round_trip_sub_cell() {
        let origin = GeographicCoordinate::new(-22.0, 145.0);
        let geo = GeographicCoordinate::new(-22.51371, 145.30992);
        let c = geographic_to_array(geo, origin);
        let geo2 = convert_to_geographic(&c);
        assert!((geo.lat - geo2.lat).abs() < 1.0 / SECONDS_PER_DEGREE);
        assert!((geo.lon - geo2.lon).abs() < 1.0 / SECONDS_PER_DEGREE);
    }

    #[test]
    fn test_get_origin_matches_grid_square_frame() {
        // serialized coordinates rely on both origin derivations agreeing
        let origin = get_origin(-22.4, 146.3, 3600);
        assert_eq!(origin, GridSquare::new(-23, 146).origin(3600));
    }

    #[test]
    fn test_distance_one_degree_of_latitude() {
        let c1 = GeographicCoordinate::new(-23.0, 146.0);
        let c2 = GeographicCoordinate::new(-24.0, 146.0);
        let d = find_distance_geo(c1, c2);
        // one degree of latitude is ~111 km
        assert!((d - 111.132).abs() < 0.5);
    }

    #[test]
    fn test_orthogonal_nn_distance() {
        let origin = GeographicCoordinate::new(0.0, 0.0);
        let a = ArrayCoordinate::new(10, 10, origin);
        let below = ArrayCoordinate::new(11, 10, origin);
        let beside = ArrayCoordinate::new(10, 11, origin);
        assert_eq!(find_orthogonal_nn_distance(&a, &below), CELL_RESOLUTION_M);
        // at the equator the east-west spacing matches the meridional one
        assert!((find_orthogonal_nn_distance(&a, &beside) - CELL_RESOLUTION_M).abs() < 0.01);
    }

    #[test]
    fn test_height_ordering_sorts_descending() {
        let mut cells = vec![
            ArrayCoordinateWithHeight::new(0, 0, 5.0),
            ArrayCoordinateWithHeight::new(0, 1, 9.0),
            ArrayCoordinateWithHeight::new(0, 2, 1.0),
        ];
        cells.sort();
        assert_eq!(cells[0].h, 9.0);
        assert_eq!(cells[2].h, 1.0);
    }
}
