/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/

//! The screening stage: terrain conditioning (depression fill, flow
//! directions, flow accumulation, streams and pour points), land-use
//! filters, and the per-pour-point greenfield reservoir modeller.

use crate::csv::{
    write_rough_reservoir_csv, write_rough_reservoir_csv_header, write_rough_reservoir_data,
    write_rough_reservoir_data_header,
};
use crate::existing::{
    depression_volume_finding, existing_reservoir_to_rough_reservoir, get_existing_reservoir,
    get_existing_reservoirs,
};
use crate::reservoir::{update_reservoir_boundary, ReservoirShape, RoughReservoir};
use phes_common::configs::{SearchContext, SearchType};
use phes_common::structures::{
    convert_to_geographic, find_area, find_distance_sqd_geo_coslat, find_orthogonal_nn_distance,
    ArrayCoordinate, ArrayCoordinateWithHeight, GeographicCoordinate, DIRECTIONS,
};
use phes_common::utils::{convert_to_int, get_formatted_elapsed_time, max_of};
use phes_common::{EPS, INF};
use phes_raster::dem::{flow_directions_filename, read_dem_with_borders};
use phes_raster::{
    polygon_to_raster, read_ascii_grid, write_ascii_grid, write_binary_grid, Grid,
};
use std::collections::{BinaryHeap, VecDeque};
use std::fs::{create_dir_all, File};
use std::io::{BufRead, BufReader, BufWriter, Error, ErrorKind};
use std::time::Instant;

/// UTM-gridded urban raster tile covering a geographic point, e.g. `55K`.
pub fn find_world_utm_filename(point: GeographicCoordinate) -> String {
    let mut clat = (b'A' + ((point.lat + 96.0) / 8.0).floor() as u8) as char;
    if clat >= 'I' {
        clat = (clat as u8 + 1) as char;
    }
    if clat >= 'O' {
        clat = (clat as u8 + 1) as char;
    }
    let nlon = ((point.lon + 180.0) / 6.0 + 1.0).floor() as i32;
    format!("{:02}{}", nlon, clat)
}

/// Marks filter cells wherever the raster at `filename` equals
/// `value_to_filter`. Missing or unreadable rasters are logged and skipped.
fn read_raster_filter(filename: &str, filter: &mut Grid<bool>, value_to_filter: f64, ctx: &SearchContext) {
    match read_ascii_grid(filename) {
        Ok(urban) => {
            for row in 0..filter.rows() {
                for col in 0..filter.columns() {
                    let point = filter.get_coordinate(row, col);
                    if urban.contains_geo(point) && urban.get_geo(point) == value_to_filter {
                        filter.set_value(row, col, true);
                    }
                }
            }
        }
        Err(_) => ctx.config.logger.debug(&format!("Problem with {}", filename)),
    }
}

/// Rasterizes every polygon in a filter interchange file (one polygon per
/// line, `lat lon lat lon ...`) that touches the filter extent.
fn read_polygon_filter(filename: &str, filter: &mut Grid<bool>, ctx: &SearchContext) -> Result<(), Error> {
    let f = File::open(filename).map_err(|_| {
        Error::new(ErrorKind::NotFound, format!("No file: {}", filename))
    })?;
    let reader = BufReader::new(f);
    let mut relevant_polygons = vec![];
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let values: Vec<&str> = line.split_whitespace().collect();
        if values.len() % 2 != 0 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("Malformed polygon in {}", filename),
            ));
        }
        let mut polygon = Vec::with_capacity(values.len() / 2);
        let mut to_keep = false;
        for pair in values.chunks(2) {
            let lat = pair[0].parse::<f64>().map_err(|_| {
                Error::new(ErrorKind::InvalidData, format!("Bad vertex in {}", filename))
            })?;
            let lon = pair[1].parse::<f64>().map_err(|_| {
                Error::new(ErrorKind::InvalidData, format!("Bad vertex in {}", filename))
            })?;
            let point = GeographicCoordinate::new(lat, lon);
            to_keep = to_keep || filter.contains_geo(point);
            polygon.push(point);
        }
        if to_keep {
            relevant_polygons.push(polygon);
        }
    }
    ctx.config.logger.debug(&format!(
        "{} polygons imported from {}",
        relevant_polygons.len(),
        filename
    ));
    for polygon in &relevant_polygons {
        polygon_to_raster(polygon, filter);
    }
    Ok(())
}

/// Builds the urban/land-use/no-go mask over the DEM extent from the
/// configured filter list. DEM no-data regions are always masked.
pub fn read_filter(dem: &Grid<i16>, filenames: &[String], ctx: &SearchContext) -> Result<Grid<bool>, Error> {
    let mut filter: Grid<bool> = Grid::new(dem.rows(), dem.columns(), false, false)?;
    filter.copy_georef_from(dem);
    let loc = &ctx.vars.file_storage_location;
    for filename in filenames {
        if filename == "use_world_urban" {
            ctx.config.logger.debug("Using world urban data as filter");
            let mut done: Vec<String> = vec![];
            for corner in dem.get_corners() {
                let urban_filename = format!(
                    "input/filters/WORLD_URBAN/{}_hbase_human_built_up_and_settlement_extent_geographic_30m.asc",
                    find_world_utm_filename(corner)
                );
                if !done.contains(&urban_filename) {
                    read_raster_filter(&format!("{}{}", loc, urban_filename), &mut filter, 201.0, ctx);
                    done.push(urban_filename);
                }
            }
        } else if filename == "use_tiled_filter" {
            ctx.config.logger.debug("Using tiled filter");
            for (i, gs) in ctx.config.grid_square.neighbors().iter().enumerate() {
                let tile_filename =
                    format!("{}input/filter_polygon_tiles/{}_filter.txt", loc, gs);
                match read_polygon_filter(&tile_filename, &mut filter, ctx) {
                    Ok(()) => {}
                    Err(e) => {
                        ctx.config.logger.debug(&format!("Couldn't find file {}", tile_filename));
                        if i == 0 {
                            return Err(e);
                        }
                    }
                }
            }
        } else {
            read_polygon_filter(&format!("{}{}", loc, filename), &mut filter, ctx)?;
        }
    }
    for row in 0..dem.rows() {
        for col in 0..dem.columns() {
            if dem.get_value(row, col) < -1000 {
                filter.set_value(row, col, true);
            }
        }
    }
    Ok(filter)
}

/// Priority-flood depression fill with an epsilon tilt. The plain FIFO
/// queue drains before the priority queue so raised flats grade toward the
/// already-processed region; on exit every cell has a strictly descending
/// path to the raster boundary.
pub fn fill(dem: &Grid<i16>) -> Result<Grid<f64>, Error> {
    let rows = dem.rows();
    let columns = dem.columns();
    let mut filled: Grid<f64> = Grid::new(rows, columns, 0f64, dem.nodata as f64)?;
    filled.copy_georef_from(dem);
    let mut seen: Grid<bool> = Grid::new(rows, columns, false, false)?;

    for row in 0..rows {
        for col in 0..columns {
            filled.set_value(row, col, dem.get_value(row, col) as f64);
        }
    }

    let mut q: VecDeque<ArrayCoordinateWithHeight> = VecDeque::new();
    let mut pq: BinaryHeap<ArrayCoordinateWithHeight> = BinaryHeap::new();

    for row in 0..rows - 1 {
        pq.push(ArrayCoordinateWithHeight::new(
            row + 1,
            columns - 1,
            dem.get_value(row + 1, columns - 1) as f64,
        ));
        seen.set_value(row + 1, columns - 1, true);
        pq.push(ArrayCoordinateWithHeight::new(row, 0, dem.get_value(row, 0) as f64));
        seen.set_value(row, 0, true);
    }
    for col in 0..columns - 1 {
        pq.push(ArrayCoordinateWithHeight::new(
            rows - 1,
            col,
            dem.get_value(rows - 1, col) as f64,
        ));
        seen.set_value(rows - 1, col, true);
        pq.push(ArrayCoordinateWithHeight::new(0, col + 1, dem.get_value(0, col + 1) as f64));
        seen.set_value(0, col + 1, true);
    }

    while !q.is_empty() || !pq.is_empty() {
        let c = match q.pop_front() {
            Some(c) => c,
            None => match pq.pop() {
                Some(c) => c,
                None => break,
            },
        };

        for d in DIRECTIONS.iter() {
            let row = c.row + d.row;
            let col = c.col + d.col;
            if !dem.within(row, col) || seen.get_value(row, col) {
                continue;
            }
            let h = filled.get_value(row, col);
            seen.set_value(row, col, true);

            if h <= c.h {
                let raised = filled.get_value(c.row, c.col) + EPS;
                filled.set_value(row, col, raised);
                q.push_back(ArrayCoordinateWithHeight::new(row, col, raised));
            } else {
                pq.push(ArrayCoordinateWithHeight::new(row, col, h));
            }
        }
    }
    Ok(filled)
}

/// Floods the set of sea-level cells reachable from the raster boundary
/// through other sea-level cells.
pub fn find_ocean(dem: &Grid<i16>) -> Result<Grid<bool>, Error> {
    let rows = dem.rows();
    let columns = dem.columns();
    let mut ocean: Grid<bool> = Grid::new(rows, columns, false, false)?;
    ocean.copy_georef_from(dem);
    let mut seen: Grid<bool> = Grid::new(rows, columns, false, false)?;

    let mut q: VecDeque<ArrayCoordinateWithHeight> = VecDeque::new();
    let mut pq: BinaryHeap<ArrayCoordinateWithHeight> = BinaryHeap::new();

    let seed = |row: isize, col: isize, seen: &mut Grid<bool>, ocean: &mut Grid<bool>,
                pq: &mut BinaryHeap<ArrayCoordinateWithHeight>| {
        pq.push(ArrayCoordinateWithHeight::new(row, col, dem.get_value(row, col) as f64));
        seen.set_value(row, col, true);
        if dem.get_value(row, col) == 0 {
            ocean.set_value(row, col, true);
        }
    };
    for row in 0..rows - 1 {
        seed(row + 1, columns - 1, &mut seen, &mut ocean, &mut pq);
        seed(row, 0, &mut seen, &mut ocean, &mut pq);
    }
    for col in 0..columns - 1 {
        seed(rows - 1, col, &mut seen, &mut ocean, &mut pq);
        seed(0, col + 1, &mut seen, &mut ocean, &mut pq);
    }

    while !q.is_empty() || !pq.is_empty() {
        let c = match q.pop_front() {
            Some(c) => c,
            None => match pq.pop() {
                Some(c) => c,
                None => break,
            },
        };

        for d in DIRECTIONS.iter() {
            let row = c.row + d.row;
            let col = c.col + d.col;
            if !dem.within(row, col) || seen.get_value(row, col) {
                continue;
            }
            let h = dem.get_value(row, col) as f64;
            seen.set_value(row, col, true);

            if h.abs() <= EPS && ocean.get_value(c.row, c.col) {
                ocean.set_value(row, col, true);
                q.push_back(ArrayCoordinateWithHeight::new(row, col, h));
            } else {
                pq.push(ArrayCoordinateWithHeight::new(row, col, h));
            }
        }
    }
    Ok(ocean)
}

/// Direction of steepest descent among the eight neighbours, measured in
/// true metres with the latitude correction. Alerts (and returns east) when
/// no neighbour is lower.
fn find_lowest_neighbor(row: isize, col: isize, dem: &Grid<f64>, coslat: f64, ctx: &SearchContext) -> i8 {
    let mut result = 0i8;
    let mut min_drop = 0f64;
    let mut min_dist = 100000f64;
    let here = dem.get_coordinate(row, col);
    let z = dem.get_value(row, col);
    for (d, dir) in DIRECTIONS.iter().enumerate() {
        let row_neighbor = row + dir.row;
        let col_neighbor = col + dir.col;
        if dem.within(row_neighbor, col_neighbor) {
            let drop = dem.get_value(row_neighbor, col_neighbor) - z;
            if drop >= 0.0 {
                continue;
            }
            let dist = find_distance_sqd_geo_coslat(
                here,
                dem.get_coordinate(row_neighbor, col_neighbor),
                coslat,
            )
            .sqrt();
            if drop * min_dist < min_drop * dist {
                min_drop = drop;
                min_dist = dist;
                result = d as i8;
            }
        }
    }
    if min_drop == 0.0 {
        ctx.config
            .logger
            .debug(&format!("Alert: Minimum drop of 0 at {} {}", row, col));
    }
    result
}

/// Per-cell flow directions over the filled DEM, with boundary cells
/// pointing outward in the fixed pattern.
pub fn flow_direction(dem: &Grid<f64>, border: isize, ctx: &SearchContext) -> Result<Grid<i8>, Error> {
    let rows = dem.rows();
    let columns = dem.columns();
    let mut flow_dirn: Grid<i8> = Grid::new(rows, columns, 0, -1)?;
    flow_dirn.copy_georef_from(dem);
    let coslat = (dem.origin().lat
        - (0.5 + border as f64 / (rows - 2 * border) as f64))
        .to_radians()
        .cos();
    for row in 1..rows - 1 {
        for col in 1..columns - 1 {
            flow_dirn.set_value(row, col, find_lowest_neighbor(row, col, dem, coslat, ctx));
        }
    }
    for row in 0..rows - 1 {
        flow_dirn.set_value(row, 0, 4);
        flow_dirn.set_value(rows - row - 1, columns - 1, 0);
    }
    for col in 0..columns - 1 {
        flow_dirn.set_value(0, col + 1, 6);
        flow_dirn.set_value(rows - 1, columns - col - 2, 2);
    }
    flow_dirn.set_value(0, 0, 5);
    flow_dirn.set_value(0, columns - 1, 7);
    flow_dirn.set_value(rows - 1, columns - 1, 1);
    flow_dirn.set_value(rows - 1, 0, 3);
    Ok(flow_dirn)
}

/// Flow accumulation: cells sorted from highest to lowest each pass their
/// accumulated count to their single downstream neighbour. Counts include
/// the source cell, so every cell accumulates at least 1 and the terminal
/// cells partition the raster.
pub fn find_flow_accumulation(
    flow_directions: &Grid<i8>,
    dem: &Grid<f64>,
) -> Result<Grid<i32>, Error> {
    let rows = dem.rows();
    let columns = dem.columns();
    let mut flow_accumulation: Grid<i32> = Grid::new(rows, columns, 1, -1)?;
    flow_accumulation.copy_georef_from(dem);

    let mut to_check = Vec::with_capacity((rows * columns) as usize);
    for row in 0..rows {
        for col in 0..columns {
            to_check.push(ArrayCoordinateWithHeight::new(row, col, dem.get_value(row, col)));
        }
    }
    // start at the highest point and distribute flow downstream
    to_check.sort();

    for p in to_check {
        let d = DIRECTIONS[flow_directions.get_value(p.row, p.col) as usize];
        let downstream_row = p.row + d.row;
        let downstream_col = p.col + d.col;
        if flow_accumulation.within(downstream_row, downstream_col) {
            let accumulated = flow_accumulation.get_value(p.row, p.col);
            flow_accumulation.set_value(
                downstream_row,
                downstream_col,
                flow_accumulation.get_value(downstream_row, downstream_col) + accumulated,
            );
        }
    }
    Ok(flow_accumulation)
}

/// Cells whose upstream count reaches the stream threshold.
pub fn find_streams(flow_accumulation: &Grid<i32>, ctx: &SearchContext) -> Result<Grid<bool>, Error> {
    let mut streams: Grid<bool> =
        Grid::new(flow_accumulation.rows(), flow_accumulation.columns(), false, false)?;
    streams.copy_georef_from(flow_accumulation);
    let mut stream_site_count = 0;
    for row in 0..flow_accumulation.rows() {
        for col in 0..flow_accumulation.columns() {
            if flow_accumulation.get_value(row, col) >= ctx.vars.stream_threshold {
                streams.set_value(row, col, true);
                stream_site_count += 1;
            }
        }
    }
    ctx.config
        .logger
        .debug(&format!("Number of stream sites = {}", stream_site_count));
    Ok(streams)
}

/// Stream cells whose integer height crosses a contour multiple relative to
/// their downstream neighbour. Only the unpadded interior contributes.
pub fn find_pour_points(
    streams: &Grid<bool>,
    flow_directions: &Grid<i8>,
    dem_filled: &Grid<i16>,
    ctx: &SearchContext,
) -> Result<Grid<bool>, Error> {
    let border = ctx.vars.border;
    let contour = ctx.vars.contour_height;
    let mut pour_points: Grid<bool> = Grid::new(streams.rows(), streams.columns(), false, false)?;
    pour_points.copy_georef_from(streams);
    let mut pour_point_count = 0;
    for row in border..streams.rows() - border {
        for col in border..streams.columns() - border {
            if streams.get_value(row, col) {
                let d = DIRECTIONS[flow_directions.get_value(row, col) as usize];
                let downstream_row = row + d.row;
                let downstream_col = col + d.col;
                if flow_directions.within(downstream_row, downstream_col) {
                    let z = dem_filled.get_value(row, col) as i32;
                    let z_down = dem_filled.get_value(downstream_row, downstream_col) as i32;
                    let crossing = if z >= 0 {
                        z - z % contour > z_down
                    } else {
                        z + z % contour > z_down
                    };
                    if crossing {
                        pour_points.set_value(row, col, true);
                        pour_point_count += 1;
                    }
                }
            }
        }
    }
    ctx.config
        .logger
        .debug(&format!("Number of dam sites = {}", pour_point_count));
    Ok(pour_points)
}

/// Models the reservoir that would form behind a dam at each candidate wall
/// height. Two BFS passes over the cells that drain to the pour point: one
/// accumulating areas and directional extrema, one accumulating dam length
/// over orthogonal boundary steps.
pub fn model_greenfield_reservoir(
    pour_point: ArrayCoordinate,
    flow_directions: &Grid<i8>,
    dem_filled: &Grid<i16>,
    filter: &Grid<bool>,
    modelling_array: &mut Grid<i32>,
    iterator: i32,
    ctx: &SearchContext,
) -> RoughReservoir {
    let vars = &ctx.vars;
    let max_wall_height = vars.max_wall_height() as i32;
    let pour_elevation = dem_filled.get_value(pour_point.row, pour_point.col) as i32;
    let mut reservoir = RoughReservoir::greenfield(pour_point, pour_elevation, vars);

    let bands = (max_wall_height + 1) as usize;
    let mut area_at_elevation = vec![0f64; bands];
    let mut cumulative_area_at_elevation = vec![0f64; bands];
    let mut volume_at_elevation = vec![0f64; bands];
    let mut dam_length_at_elevation = vec![0f64; bands];

    let mut q: VecDeque<ArrayCoordinate> = VecDeque::new();
    q.push_back(pour_point);
    while let Some(p) = q.pop_front() {
        let elevation = dem_filled.get_value(p.row, p.col) as i32;
        let elevation_above_pp = (elevation - reservoir.elevation).max(0);

        if let ReservoirShape::Greenfield { shape_bound } = &mut reservoir.shape {
            update_reservoir_boundary(shape_bound, p, elevation_above_pp, &vars.dam_wall_heights);
        }

        if filter.get_value(p.row, p.col) {
            reservoir.max_dam_height = reservoir.max_dam_height.min(elevation_above_pp as f64);
        }

        area_at_elevation[(elevation_above_pp + 1).min(max_wall_height) as usize] += find_area(&p);
        modelling_array.set_value(p.row, p.col, iterator);

        for d in DIRECTIONS.iter() {
            let neighbor = ArrayCoordinate::new(p.row + d.row, p.col + d.col, p.origin);
            if flow_directions.within(neighbor.row, neighbor.col)
                && flow_directions.flows_to(&neighbor, &p)
                && (dem_filled.get_value(neighbor.row, neighbor.col) as i32 - pour_elevation)
                    < max_wall_height
            {
                q.push_back(neighbor);
            }
        }
    }

    for ih in 1..bands {
        cumulative_area_at_elevation[ih] = cumulative_area_at_elevation[ih - 1] + area_at_elevation[ih];
        volume_at_elevation[ih] = volume_at_elevation[ih - 1] + 0.01 * cumulative_area_at_elevation[ih]; // area in ha, vol in GL
    }

    q.push_back(pour_point);
    while let Some(p) = q.pop_front() {
        let elevation = dem_filled.get_value(p.row, p.col) as i32;
        let elevation_above_pp = (elevation - reservoir.elevation).max(0);
        for d in DIRECTIONS.iter() {
            let neighbor = ArrayCoordinate::new(p.row + d.row, p.col + d.col, p.origin);
            if flow_directions.within(neighbor.row, neighbor.col) {
                if flow_directions.flows_to(&neighbor, &p)
                    && (dem_filled.get_value(neighbor.row, neighbor.col) as i32 - pour_elevation)
                        < max_wall_height
                {
                    q.push_back(neighbor);
                }
                // dam walls only run along coordinate-orthogonal boundary steps
                if d.row * d.col == 0
                    && modelling_array.get_value(neighbor.row, neighbor.col) < iterator
                {
                    let neighbor_band = dem_filled.get_value(neighbor.row, neighbor.col) as i32
                        - reservoir.elevation;
                    let band =
                        elevation_above_pp.max(neighbor_band).min(max_wall_height) as usize;
                    dam_length_at_elevation[band] += find_orthogonal_nn_distance(&p, &neighbor);
                }
            }
        }
    }

    for ih in 0..vars.dam_wall_heights.len() {
        let height = vars.dam_wall_heights[ih] as i32;
        reservoir.areas.push(cumulative_area_at_elevation[height as usize]);
        let mut dam_volume = 0.0;
        for jh in 0..height {
            dam_volume += vars.dam_volume((height - jh) as f64, dam_length_at_elevation[jh as usize]);
        }
        reservoir.dam_volumes.push(dam_volume);
        reservoir
            .volumes
            .push(volume_at_elevation[height as usize] + 0.5 * dam_volume);
        reservoir.water_rocks.push(reservoir.volumes[ih] / reservoir.dam_volumes[ih]);
    }

    reservoir
}

struct ReservoirWriters {
    csv_file: BufWriter<File>,
    csv_data_file: BufWriter<File>,
}

fn open_reservoir_writers(ctx: &SearchContext) -> Result<ReservoirWriters, Error> {
    let loc = &ctx.vars.file_storage_location;
    create_dir_all(format!("{}output/reservoirs", loc))?;
    create_dir_all(format!("{}processing_files/reservoirs", loc))?;
    let stem = ctx.config.filename();
    let mut csv_file = BufWriter::new(File::create(format!(
        "{}output/reservoirs/{}_reservoirs.csv",
        loc, stem
    ))?);
    write_rough_reservoir_csv_header(&mut csv_file, &ctx.vars)?;
    let mut csv_data_file = BufWriter::new(File::create(format!(
        "{}processing_files/reservoirs/{}_reservoirs_data.csv",
        loc, stem
    ))?);
    write_rough_reservoir_data_header(&mut csv_data_file)?;
    Ok(ReservoirWriters {
        csv_file,
        csv_data_file,
    })
}

/// Surveys every unfiltered pour point (or the ocean rim) and writes the
/// retained candidates to the reservoir CSVs. Returns the retained count.
pub fn model_reservoirs(
    ctx: &SearchContext,
    pour_points: &Grid<bool>,
    flow_directions: &Grid<i8>,
    dem_filled: &Grid<i16>,
    flow_accumulation: &Grid<i32>,
    filter: &Grid<bool>,
) -> Result<usize, Error> {
    let vars = &ctx.vars;
    let border = vars.border;
    let square = ctx.config.grid_square;
    let mut writers = open_reservoir_writers(ctx)?;

    let mut count = 0usize;
    let rows = dem_filled.rows();
    let columns = dem_filled.columns();

    if ctx.config.search_type == SearchType::Ocean {
        // Ocean-edge cells: above sea level, draining directly into the
        // flooded ocean mask, outside the filter.
        let origin = square.origin(border);
        let mut edge_cells = vec![];
        for row in border + 1..rows - border - 1 {
            for col in border + 1..columns - border - 1 {
                if filter.get_value(row, col) {
                    continue;
                }
                let d = DIRECTIONS[flow_directions.get_value(row, col) as usize];
                if dem_filled.get_value(row, col) as f64 >= 1.0 - EPS
                    && pour_points.get_value(row + d.row, col + d.col)
                {
                    edge_cells.push(ArrayCoordinate::new(row, col, origin));
                }
            }
        }
        if let Some(pp) = edge_cells.last().copied() {
            let mut reservoir = RoughReservoir::brownfield(pp, 0);
            reservoir.identifier = format!("{}_OCEAN", square);
            reservoir.ocean = true;
            reservoir.watershed_area = 0.0;
            reservoir.max_dam_height = 0.0;
            for _ in 0..vars.dam_wall_heights.len() {
                reservoir.areas.push(0.0);
                reservoir.dam_volumes.push(0.0);
                reservoir.volumes.push(INF);
                reservoir.water_rocks.push(INF);
            }
            count = edge_cells.len();
            reservoir.shape = ReservoirShape::Brownfield {
                shape_bound: edge_cells,
                elevations: vec![],
            };
            write_rough_reservoir_csv(&mut writers.csv_file, &reservoir)?;
            write_rough_reservoir_data(&mut writers.csv_data_file, &reservoir)?;
        }
    } else {
        let mut model: Grid<i32> = Grid::new(rows, columns, 0, 0)?;
        let mut i = 0;
        for row in border..rows - border {
            for col in border..columns - border {
                if !pour_points.get_value(row, col) || filter.get_value(row, col) {
                    continue;
                }
                let pour_point = ArrayCoordinate::new(row, col, square.origin(border));
                i += 1;
                let mut reservoir = model_greenfield_reservoir(
                    pour_point,
                    flow_directions,
                    dem_filled,
                    filter,
                    &mut model,
                    i,
                    ctx,
                );
                if max_of(&reservoir.volumes) >= vars.min_reservoir_volume
                    && max_of(&reservoir.water_rocks) >= vars.min_reservoir_water_rock
                    && reservoir.max_dam_height >= vars.min_max_dam_height
                {
                    reservoir.watershed_area =
                        find_area(&pour_point) * flow_accumulation.get_value(row, col) as f64;
                    reservoir.identifier = format!("{}_RES{}", square, i);
                    write_rough_reservoir_csv(&mut writers.csv_file, &reservoir)?;
                    write_rough_reservoir_data(&mut writers.csv_data_file, &reservoir)?;
                    count += 1;
                }
            }
        }
    }
    Ok(count)
}

fn debug_dump<T: Copy + num_traits::cast::AsPrimitive<f64>>(
    grid: &Grid<T>,
    kind: &str,
    ctx: &SearchContext,
) -> Result<(), Error> {
    if !ctx.vars.debug_output {
        return Ok(());
    }
    let loc = &ctx.vars.file_storage_location;
    create_dir_all(format!("{}debug/{}", loc, kind))?;
    write_ascii_grid(
        &format!("{}debug/{}/{}_{}.asc", loc, kind, ctx.config.grid_square, kind),
        grid,
    )
}

fn rounded_dem(filled_no_flat: &Grid<f64>) -> Result<Grid<i16>, Error> {
    let mut dem_filled: Grid<i16> = Grid::new(
        filled_no_flat.rows(),
        filled_no_flat.columns(),
        0,
        filled_no_flat.nodata as i16,
    )?;
    dem_filled.copy_georef_from(filled_no_flat);
    for row in 0..filled_no_flat.rows() {
        for col in 0..filled_no_flat.columns() {
            dem_filled.set_value(
                row,
                col,
                convert_to_int(filled_no_flat.get_value(row, col)) as i16,
            );
        }
    }
    Ok(dem_filled)
}

/// The screening stage driver: terrain conditioning and reservoir survey
/// for greenfield/ocean runs, existing-reservoir conversion for the rest.
pub fn run_screening(ctx: &SearchContext) -> Result<(), Error> {
    let logger = &ctx.config.logger;
    let vars = &ctx.vars;
    let loc = &vars.file_storage_location;
    let start = Instant::now();
    println!("Screening started for {}", ctx.config.filename());

    if ctx.config.search_type.not_existing() {
        let dem = read_dem_with_borders(ctx.config.grid_square, vars.border, loc, logger)?;

        let mut t = Instant::now();
        let filter = read_filter(&dem, &vars.filter_filenames, ctx)?;
        logger.debug(&format!("Filter runtime: {}", get_formatted_elapsed_time(t)));
        debug_dump(&bool_as_byte_grid(&filter)?, "filter", ctx)?;

        t = Instant::now();
        let dem_filled_no_flat = fill(&dem)?;
        let dem_filled = rounded_dem(&dem_filled_no_flat)?;
        logger.debug(&format!("Fill runtime: {}", get_formatted_elapsed_time(t)));
        debug_dump(&dem_filled, "DEM_filled", ctx)?;

        t = Instant::now();
        let flow_directions = flow_direction(&dem_filled_no_flat, vars.border, ctx)?;
        logger.debug(&format!(
            "Flow directions runtime: {}",
            get_formatted_elapsed_time(t)
        ));
        debug_dump(&flow_directions, "flow_directions", ctx)?;
        create_dir_all(format!("{}processing_files/flow_directions", loc))?;
        write_binary_grid(
            &flow_directions_filename(loc, ctx.config.grid_square),
            &flow_directions,
        )?;

        t = Instant::now();
        let flow_accumulation = find_flow_accumulation(&flow_directions, &dem_filled_no_flat)?;
        logger.debug(&format!(
            "Flow accumulation runtime: {}",
            get_formatted_elapsed_time(t)
        ));
        debug_dump(&flow_accumulation, "flow_accumulation", ctx)?;
        drop(dem_filled_no_flat);

        let pour_points = if ctx.config.search_type == SearchType::Ocean {
            let ocean = find_ocean(&dem)?;
            debug_dump(&bool_as_byte_grid(&ocean)?, "ocean", ctx)?;
            ocean
        } else {
            let streams = find_streams(&flow_accumulation, ctx)?;
            debug_dump(&bool_as_byte_grid(&streams)?, "streams", ctx)?;
            let pour_points = find_pour_points(&streams, &flow_directions, &dem_filled, ctx)?;
            debug_dump(&bool_as_byte_grid(&pour_points)?, "pour_points", ctx)?;
            pour_points
        };
        drop(dem);

        let t = Instant::now();
        let count = model_reservoirs(
            ctx,
            &pour_points,
            &flow_directions,
            &dem_filled,
            &flow_accumulation,
            &filter,
        )?;
        logger.debug(&format!(
            "Found {} reservoirs. Runtime: {}",
            count,
            get_formatted_elapsed_time(t)
        ));
        println!(
            "Screening finished for {}. Runtime: {}",
            ctx.config.filename(),
            get_formatted_elapsed_time(start)
        );
    } else {
        if ctx.config.search_type == SearchType::BulkPit {
            let t = Instant::now();
            let dem = read_dem_with_borders(ctx.config.grid_square, vars.border, loc, logger)?;
            let dem_filled = rounded_dem(&fill(&dem)?)?;
            depression_volume_finding(&dem_filled, ctx)?;
            println!(
                "Volume finding finished for {}. Runtime: {}",
                ctx.config.grid_square,
                get_formatted_elapsed_time(t)
            );
        }

        let mut writers = open_reservoir_writers(ctx)?;

        let existing_reservoirs = if ctx.config.search_type.single() {
            vec![get_existing_reservoir(&ctx.config.name, ctx)?]
        } else {
            get_existing_reservoirs(ctx.config.grid_square, ctx)?
        };
        if existing_reservoirs.is_empty() {
            println!("No existing reservoirs in {}", ctx.config.grid_square);
            return Ok(());
        }

        let dem_filled_no_flat =
            if ctx.config.search_type == SearchType::BulkExisting && vars.use_tiled_rivers {
                Some(fill(&read_dem_with_borders(
                    ctx.config.grid_square,
                    vars.border,
                    loc,
                    logger,
                )?)?)
            } else {
                None
            };

        for r in &existing_reservoirs {
            let mut reservoir = existing_reservoir_to_rough_reservoir(r, vars);
            reservoir.pit = ctx.config.search_type.pit();
            if reservoir.river {
                if let Some(no_flat) = &dem_filled_no_flat {
                    // assign each river vertex the lowest filled elevation in
                    // its 11x11 neighbourhood
                    let bound: Vec<ArrayCoordinate> = reservoir.brownfield_bound().to_vec();
                    let mut elevations = Vec::with_capacity(bound.len());
                    for ac in &bound {
                        let mut temp_elevation = i32::MAX;
                        for dy in -5isize..6 {
                            for dx in -5isize..6 {
                                let n =
                                    ArrayCoordinate::new(ac.row + dy, ac.col + dx, ac.origin);
                                let geo = convert_to_geographic(&n);
                                if no_flat.contains_geo(geo) {
                                    temp_elevation = temp_elevation.min(no_flat.get_geo(geo) as i32);
                                }
                            }
                        }
                        elevations.push(temp_elevation);
                    }
                    if let Some(first) = elevations.first() {
                        reservoir.elevation = *first;
                    }
                    if let ReservoirShape::Brownfield {
                        elevations: slot, ..
                    } = &mut reservoir.shape
                    {
                        *slot = elevations;
                    }
                }
            }
            write_rough_reservoir_csv(&mut writers.csv_file, &reservoir)?;
            write_rough_reservoir_data(&mut writers.csv_data_file, &reservoir)?;
        }
        println!(
            "Screening finished for {}. Runtime: {}",
            ctx.config.filename(),
            get_formatted_elapsed_time(start)
        );
    }
    Ok(())
}

/// Boolean masks are dumped as 0/1 byte grids for inspection.
fn bool_as_byte_grid(mask: &Grid<bool>) -> Result<Grid<i8>, Error> {
    let mut out: Grid<i8> = Grid::new(mask.rows(), mask.columns(), 0, -1)?;
    out.copy_georef_from(mask);
    for row in 0..mask.rows() {
        for col in 0..mask.columns() {
            out.set_value(row, col, mask.get_value(row, col) as i8);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use phes_common::configs::{SearchConfig, SearchContext, Variables};
    use phes_common::structures::GridSquare;

    fn test_context() -> SearchContext {
        let mut vars = Variables::default();
        vars.border = 0;
        vars.stream_threshold = 3;
        vars.contour_height = 5;
        let mut config = SearchConfig::new();
        config.grid_square = GridSquare::new(-23, 146);
        SearchContext { config, vars }
    }

    fn flat_dem_with_pit(n: isize) -> Grid<i16> {
        let mut dem: Grid<i16> = Grid::new(n, n, 10, -9999).unwrap();
        dem.set_origin(GridSquare::new(-23, 146).origin(0));
        dem.set_value(n / 2, n / 2, 9);
        dem
    }

    #[test]
    fn test_fill_raises_pit_and_breaks_flats() {
        let dem = flat_dem_with_pit(5);
        let filled = fill(&dem).unwrap();
        // the pit is raised to the plateau level (within a few epsilon)
        let centre = filled.get_value(2, 2);
        assert!(centre >= 10.0);
        assert!(centre < 10.0 + 100.0 * phes_common::EPS);
        // every cell still rounds back to the integer plateau
        for row in 0..5 {
            for col in 0..5 {
                assert_eq!(
                    phes_common::utils::convert_to_int(filled.get_value(row, col)),
                    10
                );
            }
        }
        // the epsilon tilt leaves every interior cell strictly above the
        // plateau, so no flat region survives
        for row in 1..4 {
            for col in 1..4 {
                assert!(filled.get_value(row, col) > 10.0);
            }
        }
    }

    #[test]
    fn test_fill_random_dem_leaves_no_interior_sinks() {
        use rand::rngs::SmallRng;
        use rand::{Rng, SeedableRng};
        let mut rng = SmallRng::seed_from_u64(42);
        let n = 24isize;
        let mut dem: Grid<i16> = Grid::new(n, n, 0, -9999).unwrap();
        dem.set_origin(GridSquare::new(-23, 146).origin(0));
        for row in 0..n {
            for col in 0..n {
                dem.set_value(row, col, rng.gen_range(0..50));
            }
        }
        let filled = fill(&dem).unwrap();
        // filling never lowers ground
        for row in 0..n {
            for col in 0..n {
                assert!(filled.get_value(row, col) >= dem.get_value(row, col) as f64);
            }
        }
        // no interior cell remains a local minimum
        for row in 1..n - 1 {
            for col in 1..n - 1 {
                let z = filled.get_value(row, col);
                let has_lower = DIRECTIONS
                    .iter()
                    .any(|d| filled.get_value(row + d.row, col + d.col) < z);
                assert!(has_lower, "sink left at ({}, {})", row, col);
            }
        }
    }

    #[test]
    fn test_flow_directions_drain_every_cell() {
        let ctx = test_context();
        let dem = flat_dem_with_pit(5);
        let filled = fill(&dem).unwrap();
        let fd = flow_direction(&filled, 0, &ctx).unwrap();
        // interior cells: the downstream neighbour is strictly lower
        for row in 1..4 {
            for col in 1..4 {
                let d = phes_common::structures::DIRECTIONS[fd.get_value(row, col) as usize];
                assert!(
                    filled.get_value(row + d.row, col + d.col) < filled.get_value(row, col),
                    "cell ({}, {}) does not drain",
                    row,
                    col
                );
            }
        }
        // fixed boundary pattern
        assert_eq!(fd.get_value(0, 0), 5);
        assert_eq!(fd.get_value(0, 4), 7);
        assert_eq!(fd.get_value(4, 4), 1);
        assert_eq!(fd.get_value(4, 0), 3);
        assert_eq!(fd.get_value(2, 0), 4);
        assert_eq!(fd.get_value(0, 2), 6);
    }

    #[test]
    fn test_flow_accumulation_partitions_grid() {
        let ctx = test_context();
        // a tilted plane draining east
        let mut dem: Grid<i16> = Grid::new(6, 6, 0, -9999).unwrap();
        dem.set_origin(GridSquare::new(-23, 146).origin(0));
        for row in 0..6 {
            for col in 0..6 {
                dem.set_value(row, col, (100 - 5 * col) as i16);
            }
        }
        let filled = fill(&dem).unwrap();
        let fd = flow_direction(&filled, 0, &ctx).unwrap();
        let acc = find_flow_accumulation(&fd, &filled).unwrap();
        let mut total = 0;
        let mut terminal_sum = 0;
        for row in 0..6 {
            for col in 0..6 {
                let a = acc.get_value(row, col);
                assert!(a >= 1);
                total += 1;
                let d = phes_common::structures::DIRECTIONS[fd.get_value(row, col) as usize];
                if !acc.within(row + d.row, col + d.col) {
                    terminal_sum += a;
                }
            }
        }
        assert_eq!(terminal_sum, total);
    }

    #[test]
    fn test_streams_and_pour_points() {
        let ctx = test_context();
        // a valley: column 3 is the stream bed, draining south and dropping
        // 3 m per row; everything else slopes toward it
        let mut dem: Grid<i16> = Grid::new(10, 7, 0, -9999).unwrap();
        dem.set_origin(GridSquare::new(-23, 146).origin(0));
        for row in 0..10isize {
            for col in 0..7isize {
                let valley = (col - 3).abs() as i16 * 10;
                dem.set_value(row, col, 100 - 3 * row as i16 + valley);
            }
        }
        let filled = fill(&dem).unwrap();
        let fd = flow_direction(&filled, 0, &ctx).unwrap();
        let acc = find_flow_accumulation(&fd, &filled).unwrap();
        let streams = find_streams(&acc, &ctx).unwrap();
        // accumulation grows along the valley floor
        assert!(acc.get_value(8, 3) > acc.get_value(1, 3));
        assert!(streams.get_value(8, 3));
        let dem_filled = rounded_dem(&filled).unwrap();
        let pour_points = find_pour_points(&streams, &fd, &dem_filled, &ctx).unwrap();
        let mut count = 0;
        for row in 0..10 {
            for col in 0..7 {
                if pour_points.get_value(row, col) {
                    count += 1;
                    assert!(streams.get_value(row, col));
                }
            }
        }
        // the stream drops through several 5 m contours
        assert!(count >= 1);
    }

    #[test]
    fn test_ocean_flood_stops_at_land() {
        let mut dem: Grid<i16> = Grid::new(6, 6, 0, -9999).unwrap();
        dem.set_origin(GridSquare::new(-23, 146).origin(0));
        // northern half is land, southern half is sea level
        for row in 0..3 {
            for col in 0..6 {
                dem.set_value(row, col, 50);
            }
        }
        // an inland lake at sea level, not connected to the boundary zeros
        dem.set_value(1, 2, 0);
        let ocean = find_ocean(&dem).unwrap();
        assert!(ocean.get_value(5, 0));
        assert!(ocean.get_value(4, 3));
        assert!(!ocean.get_value(1, 2));
        assert!(!ocean.get_value(0, 0));
    }

    #[test]
    fn test_greenfield_reservoir_in_symmetric_basin() {
        let mut ctx = test_context();
        ctx.vars.border = 0;
        // a 20x20 bowl: pour point at the rim gap, floor at 100 rising to 120
        let n = 21isize;
        let mut dem: Grid<i16> = Grid::new(n, n, 0, -9999).unwrap();
        dem.set_origin(GridSquare::new(-23, 146).origin(0));
        let centre = 10isize;
        for row in 0..n {
            for col in 0..n {
                let dist = (((row - centre).pow(2) + (col - centre).pow(2)) as f64).sqrt();
                let h = 100.0 + dist.min(10.0) * 2.0;
                dem.set_value(row, col, h as i16);
            }
        }
        // cut a drainage notch north of the centre so the basin drains out
        for row in 0..centre {
            dem.set_value(row, centre, (98 - (centre - row)) as i16);
        }
        let filled = fill(&dem).unwrap();
        let fd = flow_direction(&filled, 0, &ctx).unwrap();
        let dem_filled = rounded_dem(&filled).unwrap();
        let filter: Grid<bool> = Grid::new(n, n, false, false).unwrap();
        let mut model: Grid<i32> = Grid::new(n, n, 0, 0).unwrap();
        let pour_point =
            ArrayCoordinate::new(centre, centre, dem_filled.array_origin());
        let reservoir =
            model_greenfield_reservoir(pour_point, &fd, &dem_filled, &filter, &mut model, 1, &ctx);

        // volumes grow monotonically with wall height
        for i in 1..reservoir.volumes.len() {
            assert!(reservoir.volumes[i] >= reservoir.volumes[i - 1]);
        }
        assert!(reservoir.volumes.iter().any(|v| *v > 0.0));
        // a basin this small is cheap to dam: water/rock over the minimum
        assert!(max_of(&reservoir.water_rocks) > ctx.vars.min_reservoir_water_rock);
        assert_eq!(reservoir.elevation, 100);
    }

    #[test]
    fn test_ocean_rim_emits_single_ocean_reservoir() {
        use crate::csv::read_rough_reservoir_data;

        let mut ctx = test_context();
        ctx.config.search_type = SearchType::Ocean;
        ctx.vars.border = 2;
        let dir = std::env::temp_dir().join("phes_ocean_rim");
        std::fs::create_dir_all(&dir).unwrap();
        ctx.vars.file_storage_location = format!("{}/", dir.to_str().unwrap());

        // land in the north, sea level from row 7 south
        let n = 12isize;
        let mut dem: Grid<i16> = Grid::new(n, n, 0, -9999).unwrap();
        dem.set_origin(ctx.config.grid_square.origin(2));
        for row in 0..7 {
            for col in 0..n {
                dem.set_value(row, col, 50);
            }
        }
        let ocean = find_ocean(&dem).unwrap();
        // everything drains south
        let mut fd: Grid<i8> = Grid::new(n, n, 2, -1).unwrap();
        fd.copy_georef_from(&dem);
        let acc: Grid<i32> = Grid::new(n, n, 1, -1).unwrap();
        let filter: Grid<bool> = Grid::new(n, n, false, false).unwrap();

        let count = model_reservoirs(&ctx, &ocean, &fd, &dem, &acc, &filter).unwrap();
        // the interior land row above the waterline, cols 3..=8
        assert_eq!(count, 6);

        let written = read_rough_reservoir_data(
            &format!(
                "{}processing_files/reservoirs/{}_reservoirs_data.csv",
                ctx.vars.file_storage_location,
                ctx.config.filename()
            ),
            &ctx.vars,
        )
        .unwrap();
        assert_eq!(written.len(), 1);
        let reservoir = &written[0];
        assert!(reservoir.ocean);
        assert!(reservoir.is_brownfield());
        assert_eq!(reservoir.identifier, format!("{}_OCEAN", ctx.config.grid_square));
        assert_eq!(reservoir.elevation, 0);
        assert_eq!(reservoir.brownfield_bound().len(), 6);
        assert!(reservoir.volumes.iter().all(|v| *v >= phes_common::INF / 10.0));
        for cell in reservoir.brownfield_bound() {
            assert_eq!(cell.row, 6);
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_world_utm_filename() {
        // Canberra: zone 55, band H
        let name = find_world_utm_filename(GeographicCoordinate::new(-35.3, 149.1));
        assert_eq!(name, "55H");
        // London: zone 30, band U
        let name = find_world_utm_filename(GeographicCoordinate::new(51.5, -0.1));
        assert_eq!(name, "30U");
    }
}
