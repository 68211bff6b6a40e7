/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/

//! Standalone depression-volume probe: rasterizes one polygon over a tile's
//! DEM and prints the cumulative volume at each elevation above the lowest
//! cell inside the polygon.

use phes_common::structures::{find_area, ArrayCoordinate};
use phes_common::utils::get_formatted_elapsed_time;
use phes_raster::dem::read_dem_with_borders;
use phes_raster::{polygon_to_raster, Grid};
use phes_tools::init_context;
use std::env;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::process;
use std::time::Instant;

fn run() -> Result<(), std::io::Error> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!("Not enough arguments. Need <lon> <lat> <polygon_file>");
        process::exit(1);
    }
    let ctx = init_context(&args)?;
    let t = Instant::now();
    println!("Volume finding started for {}", ctx.config.grid_square);

    let dem = read_dem_with_borders(
        ctx.config.grid_square,
        ctx.vars.border,
        &ctx.vars.file_storage_location,
        &ctx.config.logger,
    )?;
    let mut extent: Grid<bool> = Grid::new(dem.rows(), dem.columns(), false, false)?;
    extent.copy_georef_from(&dem);

    // one polygon per line, whitespace-separated lat lon values
    let reader = BufReader::new(File::open(&args[3])?);
    for line in reader.lines() {
        let line = line?;
        let values: Vec<f64> = line
            .split_whitespace()
            .filter_map(|v| v.parse::<f64>().ok())
            .collect();
        let polygon: Vec<_> = values
            .chunks(2)
            .filter(|c| c.len() == 2)
            .map(|c| phes_common::structures::GeographicCoordinate::new(c[0], c[1]))
            .collect();
        polygon_to_raster(&polygon, &mut extent);
    }

    let mut min_elevation: i16 = 32767;
    for row in 0..extent.rows() {
        for col in 0..extent.columns() {
            if extent.get_value(row, col) {
                min_elevation = min_elevation.min(dem.get_value(row, col));
            }
        }
    }

    let mut area_at_elevation = vec![0f64; 1001];
    let mut cumulative_area_at_elevation = vec![0f64; 1001];
    let mut volume_at_elevation = vec![0f64; 1001];
    let origin = dem.array_origin();
    for row in 0..extent.rows() {
        for col in 0..extent.columns() {
            if extent.get_value(row, col) {
                let elevation_above_pp =
                    (dem.get_value(row, col) - min_elevation).max(0) as usize;
                area_at_elevation[(elevation_above_pp + 1).min(1000)] +=
                    find_area(&ArrayCoordinate::new(row, col, origin));
            }
        }
    }
    for ih in 1..200 {
        cumulative_area_at_elevation[ih] =
            cumulative_area_at_elevation[ih - 1] + area_at_elevation[ih];
        volume_at_elevation[ih] = volume_at_elevation[ih - 1] + 0.01 * cumulative_area_at_elevation[ih]; // area in ha, vol in GL
        print!("{} {} {:.6}   ", ih, min_elevation as i32 + ih as i32, volume_at_elevation[ih]);
    }
    println!();
    println!(
        "Volume finding finished for {}. Runtime: {}",
        ctx.config.grid_square,
        get_formatted_elapsed_time(t)
    );
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("depression_volume_finding: {}", e);
        process::exit(1);
    }
}
