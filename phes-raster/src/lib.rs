/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/

//! In-memory georeferenced rasters and the small set of codecs the pipeline
//! uses to exchange them between stages. GeoTIFF decoding of source DEM
//! tiles is delegated to an external converter; this crate consumes the
//! converted ESRI ASCII grids and persists intermediates in a compact
//! little-endian binary form.

extern crate num_traits;

mod ascii_grid;
mod binary_grid;
pub mod dem;
mod rasterize;

pub use self::ascii_grid::{read_ascii_grid, write_ascii_grid};
pub use self::binary_grid::{read_binary_grid, write_binary_grid, GridDataType};
pub use self::rasterize::polygon_to_raster;

use phes_common::structures::{
    ArrayCoordinate, GeographicCoordinate, DIRECTIONS, SECONDS_PER_DEGREE,
};
use std::io::{Error, ErrorKind};
use std::ops::{Index, IndexMut};

/// A uniquely-owned 2-D raster with a geographic transform. Out-of-range
/// reads return `nodata` and out-of-range writes are ignored, so flood
/// operations can address one cell beyond every edge without branching.
#[derive(Clone, Debug)]
pub struct Grid<T: Copy> {
    rows: isize,
    columns: isize,
    data: Vec<T>,
    pub nodata: T,
    /// Geographic coordinate of the north-west raster corner; cell centres
    /// sit half a step inside.
    origin: GeographicCoordinate,
    /// Degrees per row, negative for north-up rasters.
    lat_res: f64,
    /// Degrees per column.
    lon_res: f64,
}

impl<T: Copy> Grid<T> {
    pub fn new(rows: isize, columns: isize, initial_value: T, nodata: T) -> Result<Grid<T>, Error> {
        if rows < 0 || columns < 0 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "Only non-negative rows and columns values accepted.",
            ));
        }
        Ok(Grid {
            rows,
            columns,
            data: vec![initial_value; (rows * columns) as usize],
            nodata,
            origin: GeographicCoordinate::new(0.0, 0.0),
            lat_res: -1.0 / SECONDS_PER_DEGREE,
            lon_res: 1.0 / SECONDS_PER_DEGREE,
        })
    }

    pub fn rows(&self) -> isize {
        self.rows
    }

    pub fn columns(&self) -> isize {
        self.columns
    }

    pub fn shape(&self) -> [isize; 2] {
        [self.rows, self.columns]
    }

    pub fn get_value(&self, row: isize, column: isize) -> T {
        if row < 0 || column < 0 || row >= self.rows || column >= self.columns {
            return self.nodata;
        }
        self.data[(row * self.columns + column) as usize]
    }

    pub fn set_value(&mut self, row: isize, column: isize, value: T) {
        if row >= 0 && column >= 0 && row < self.rows && column < self.columns {
            self.data[(row * self.columns + column) as usize] = value;
        }
    }

    pub fn within(&self, row: isize, column: isize) -> bool {
        row >= 0 && column >= 0 && row < self.rows && column < self.columns
    }

    pub fn reinitialize_values(&mut self, value: T) {
        self.data = vec![value; (self.rows * self.columns) as usize];
    }

    pub fn set_georef(&mut self, origin: GeographicCoordinate, lat_res: f64, lon_res: f64) {
        self.origin = origin;
        self.lat_res = lat_res;
        self.lon_res = lon_res;
    }

    pub fn copy_georef_from<U: Copy>(&mut self, other: &Grid<U>) {
        self.origin = other.origin;
        self.lat_res = other.lat_res;
        self.lon_res = other.lon_res;
    }

    pub fn set_origin(&mut self, origin: GeographicCoordinate) {
        self.origin = origin;
    }

    pub fn origin(&self) -> GeographicCoordinate {
        self.origin
    }

    pub fn lat_res(&self) -> f64 {
        self.lat_res
    }

    pub fn lon_res(&self) -> f64 {
        self.lon_res
    }

    /// Cell-centre geographic coordinate of (row, col).
    pub fn get_coordinate(&self, row: isize, column: isize) -> GeographicCoordinate {
        GeographicCoordinate {
            lat: self.origin.lat + (row as f64 + 0.5) * self.lat_res,
            lon: self.origin.lon + (column as f64 + 0.5) * self.lon_res,
        }
    }

    /// The four raster corners, clockwise from the origin.
    pub fn get_corners(&self) -> Vec<GeographicCoordinate> {
        vec![
            self.origin,
            self.get_coordinate(0, self.columns),
            self.get_coordinate(self.rows, self.columns),
            self.get_coordinate(self.rows, 0),
        ]
    }

    fn geo_to_row_col(&self, g: GeographicCoordinate) -> (isize, isize) {
        (
            ((g.lat - self.origin.lat) / self.lat_res).floor() as isize,
            ((g.lon - self.origin.lon) / self.lon_res).floor() as isize,
        )
    }

    pub fn contains_geo(&self, g: GeographicCoordinate) -> bool {
        let (row, col) = self.geo_to_row_col(g);
        self.within(row, col)
    }

    pub fn get_geo(&self, g: GeographicCoordinate) -> T {
        let (row, col) = self.geo_to_row_col(g);
        self.get_value(row, col)
    }

    pub fn set_geo(&mut self, g: GeographicCoordinate, value: T) {
        let (row, col) = self.geo_to_row_col(g);
        self.set_value(row, col, value);
    }

    /// The origin used when building `ArrayCoordinate`s addressed into this
    /// raster.
    pub fn array_origin(&self) -> GeographicCoordinate {
        self.origin
    }
}

impl Grid<i8> {
    /// True if the flow direction stored at `c1` leads into `c2`.
    pub fn flows_to(&self, c1: &ArrayCoordinate, c2: &ArrayCoordinate) -> bool {
        let d = DIRECTIONS[self.get_value(c1.row, c1.col) as usize];
        c1.row + d.row == c2.row && c1.col + d.col == c2.col
    }
}

impl<T: Copy> Index<(isize, isize)> for Grid<T> {
    type Output = T;

    fn index(&self, index: (isize, isize)) -> &T {
        let (row, column) = index;
        if row < 0 || column < 0 || row >= self.rows || column >= self.columns {
            return &self.nodata;
        }
        &self.data[(row * self.columns + column) as usize]
    }
}

impl<T: Copy> IndexMut<(isize, isize)> for Grid<T> {
    fn index_mut(&mut self, index: (isize, isize)) -> &mut T {
        let (row, column) = index;
        if row < 0 || column < 0 || row >= self.rows || column >= self.columns {
            return &mut self.nodata;
        }
        &mut self.data[(row * self.columns + column) as usize]
    }
}
