/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/

//! DEM tile ingestion: filename conventions, the 1801→3601 pixel-doubling
//! upsample, and the nine-tile border stitch that builds the padded model a
//! grid-cell run operates on.

use crate::{read_ascii_grid, read_binary_grid, Grid};
use phes_common::configs::Logger;
use phes_common::structures::{GeographicCoordinate, GridSquare};
use phes_common::utils::convert_to_int;
use std::io::{Error, ErrorKind};

/// Cells along one side of a 1°×1° tile, excluding the shared closing edge.
const TILE_CELLS: isize = 3600;

/// Converted DEM tile sibling of the bound `<tile>_1arc_v3.tif` name.
pub fn dem_tile_filename(location: &str, square: GridSquare) -> String {
    format!("{}input/DEMs/{}_1arc_v3.asc", location, square)
}

/// Flow-direction raster persisted by screening and re-read by later stages.
pub fn flow_directions_filename(location: &str, square: GridSquare) -> String {
    format!(
        "{}processing_files/flow_directions/{}_flow_directions.bgr",
        location, square
    )
}

/// Doubles every column of a 1801-wide tile to 3601 columns, halving the
/// x-step. The y-step is deliberately left untouched.
fn pixel_double(dem: &Grid<f64>) -> Result<Grid<f64>, Error> {
    let rows = dem.rows();
    let mut out = Grid::new(rows, 2 * dem.columns() - 1, 0f64, dem.nodata)?;
    out.set_georef(dem.origin(), dem.lat_res(), dem.lon_res() / 2.0);
    for row in 0..rows {
        for col in 0..dem.columns() - 1 {
            out.set_value(row, col * 2, dem.get_value(row, col));
            out.set_value(row, col * 2 + 1, dem.get_value(row, col));
        }
        out.set_value(row, 2 * dem.columns() - 2, dem.get_value(row, dem.columns() - 1));
    }
    Ok(out)
}

/// Reads a single converted DEM tile and rounds it to integer metres.
/// 1801-column tiles are pixel-doubled to the 3601-column standard.
pub fn read_dem_tile(file_name: &str) -> Result<Grid<i16>, Error> {
    let mut raw = read_ascii_grid(file_name)?;
    if raw.columns() == 1801 {
        raw = pixel_double(&raw)?;
    }
    let mut dem = Grid::new(raw.rows(), raw.columns(), 0i16, raw.nodata as i16)?;
    dem.copy_georef_from(&raw);
    for row in 0..raw.rows() {
        for col in 0..raw.columns() {
            dem.set_value(row, col, convert_to_int(raw.get_value(row, col)) as i16);
        }
    }
    Ok(dem)
}

/// Reads the centre tile padded with `border` cells on each side by
/// stitching the eight neighbouring tiles. A missing neighbour leaves its
/// sector zeroed; a missing centre tile is fatal.
pub fn read_dem_with_borders(
    sc: GridSquare,
    border: isize,
    location: &str,
    logger: &Logger,
) -> Result<Grid<i16>, Error> {
    let b = border;
    let t = TILE_CELLS;
    // (tile, copy base, copy limit, offset of tile (0,0) within the big model)
    let sectors: [(GridSquare, [isize; 2], [isize; 2], [isize; 2]); 9] = [
        (GridSquare::new(sc.lat, sc.lon), [b, b], [b + t, t + b], [b - 1, b]),
        (GridSquare::new(sc.lat + 1, sc.lon - 1), [0, 0], [b, b], [b - t - 1, b - t]),
        (GridSquare::new(sc.lat + 1, sc.lon), [0, b], [b, t + b], [b - t - 1, b]),
        (GridSquare::new(sc.lat + 1, sc.lon + 1), [0, t + b], [b, t + 2 * b], [b - t - 1, b + t]),
        (GridSquare::new(sc.lat, sc.lon + 1), [b - 1, t + b], [t + b, t + 2 * b], [b - 1, b + t]),
        (GridSquare::new(sc.lat - 1, sc.lon + 1), [t + b, t + b], [t + 2 * b, t + 2 * b], [b + t - 1, b + t]),
        (GridSquare::new(sc.lat - 1, sc.lon), [t + b, b], [t + 2 * b, t + 1 + b], [b + t - 1, b]),
        (GridSquare::new(sc.lat - 1, sc.lon - 1), [t + b, 0], [t + 2 * b, b], [b + t - 1, b - t]),
        (GridSquare::new(sc.lat, sc.lon - 1), [b - 1, 0], [t + b, b], [b - 1, b - t]),
    ];

    let mut dem: Option<Grid<i16>> = None;
    for (i, (gs, base, limit, offset)) in sectors.iter().enumerate() {
        let file_name = dem_tile_filename(location, *gs);
        match read_dem_tile(&file_name) {
            Ok(tile) => {
                if i == 0 {
                    let mut big = Grid::new(
                        tile.rows() + 2 * b - 1,
                        tile.columns() + 2 * b - 1,
                        0i16,
                        tile.nodata,
                    )?;
                    big.copy_georef_from(&tile);
                    big.set_origin(gs.origin(b));
                    dem = Some(big);
                }
                let big = dem.as_mut().ok_or_else(|| {
                    Error::new(ErrorKind::Other, "Centre tile missing during stitch.")
                })?;
                for row in base[0]..limit[0] {
                    for col in base[1]..limit[1] {
                        big.set_value(row, col, tile.get_value(row - offset[0], col - offset[1]));
                    }
                }
            }
            Err(e) => {
                logger.debug(&format!("Could not find file {} ({})", file_name, e));
                if i == 0 {
                    return Err(Error::new(
                        ErrorKind::NotFound,
                        format!("Could not read centre DEM tile {}", file_name),
                    ));
                }
            }
        }
    }
    dem.ok_or_else(|| Error::new(ErrorKind::NotFound, "No DEM tiles found."))
}

/// The padded centre DEM plus the nine per-tile flow-direction rasters, as
/// consumed by the pretty-set and constructor stages.
pub struct BigModel {
    pub neighbors: [GridSquare; 9],
    pub dem: Grid<i16>,
    pub flow_directions: Vec<Option<Grid<i8>>>,
}

impl BigModel {
    pub fn init(
        sc: GridSquare,
        border: isize,
        location: &str,
        logger: &Logger,
    ) -> Result<BigModel, Error> {
        let neighbors = sc.neighbors();
        let dem = read_dem_with_borders(sc, border, location, logger)?;
        let mut flow_directions = Vec::with_capacity(9);
        for gs in neighbors.iter() {
            let file_name = flow_directions_filename(location, *gs);
            match read_binary_grid::<i8>(&file_name) {
                Ok(grid) => flow_directions.push(Some(grid)),
                Err(_) => {
                    logger.debug(&format!("Could not find {}", gs));
                    flow_directions.push(None);
                }
            }
        }
        Ok(BigModel {
            neighbors,
            dem,
            flow_directions,
        })
    }

    /// Index of the tile whose extent contains the given coordinate, if any
    /// of the nine flow-direction rasters covers it.
    pub fn tile_index_for(&self, gc: GeographicCoordinate) -> Option<usize> {
        for (i, gs) in self.neighbors.iter().enumerate() {
            if gs.contains(gc) && self.flow_directions[i].is_some() {
                return Some(i);
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use phes_common::structures::GeographicCoordinate;

    #[test]
    fn test_dem_tile_filename() {
        assert_eq!(
            dem_tile_filename("data/", GridSquare::new(-23, 146)),
            "data/input/DEMs/s23_e146_1arc_v3.asc"
        );
    }

    #[test]
    fn test_pixel_doubling_halves_x_step_only() {
        let mut small: Grid<f64> = Grid::new(3, 1801, 0.0, -9999.0).unwrap();
        small.set_georef(GeographicCoordinate::new(-22.0, 146.0), -2.0 / 3600.0, 2.0 / 3600.0);
        for col in 0..1801 {
            small.set_value(1, col, col as f64);
        }
        let doubled = pixel_double(&small).unwrap();
        assert_eq!(doubled.columns(), 3601);
        assert_eq!(doubled.rows(), 3);
        assert_eq!(doubled.get_value(1, 0), 0.0);
        assert_eq!(doubled.get_value(1, 1), 0.0);
        assert_eq!(doubled.get_value(1, 2), 1.0);
        assert_eq!(doubled.get_value(1, 3600), 1800.0);
        assert!((doubled.lon_res() - 1.0 / 3600.0).abs() < 1e-12);
        // the y-step is deliberately untouched
        assert!((doubled.lat_res() + 2.0 / 3600.0).abs() < 1e-12);
    }
}
