/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/

//! Re-grows a reservoir on the padded DEM at a committed (or solved) dam
//! wall height: the footprint BFS shared by the pretty-set stage and the
//! KML constructor, plus boundary tracing and country attribution.

use crate::existing::Country;
use crate::kml::ReservoirKmlCoordinates;
use crate::reservoir::{update_reservoir_boundary_flat, Reservoir};
use phes_common::algorithms::{compress_poly, corner_cut_poly, point_in_polygons};
use phes_common::configs::SearchContext;
use phes_common::structures::{
    convert_to_geographic, find_area, find_orthogonal_nn_distance, geographic_to_array,
    ArrayCoordinate, GeographicCoordinate, DIRECTIONS, SECONDS_PER_DEGREE,
};
use phes_raster::dem::BigModel;
use phes_raster::Grid;
use std::collections::{HashSet, VecDeque};
use std::io::Error;

/// Result of flooding a reservoir footprint at one wall height.
struct Footprint {
    cells: Vec<ArrayCoordinate>,
    inside: HashSet<(isize, isize)>,
    volume: f64,
    area: f64,
    hit_seen: bool,
    hit_nodata: bool,
}

/// Row/col shift translating big-model indices into a neighbouring
/// flow-direction raster's frame.
fn frame_offset(big: &Grid<i16>, fd: &Grid<i8>) -> (isize, isize) {
    let drow = ((fd.origin().lat - big.origin().lat) * SECONDS_PER_DEGREE).round() as isize;
    let dcol = ((big.origin().lon - fd.origin().lon) * SECONDS_PER_DEGREE).round() as isize;
    (drow, dcol)
}

/// Floods the cells draining to `pour_point` that sit below the dam crest,
/// accumulating area and volume by elevation band. `pour_point` is in the
/// big-model frame; flow directions are looked up through `offset`.
fn grow_reservoir(
    pour_point: ArrayCoordinate,
    pour_elevation: i32,
    dam_height: f64,
    big_model: &BigModel,
    fd: &Grid<i8>,
    offset: (isize, isize),
    seen: Option<&Grid<bool>>,
) -> Footprint {
    let dem = &big_model.dem;
    let bands = dam_height.ceil() as usize + 2;
    let mut area_at_elevation = vec![0f64; bands];
    let mut footprint = Footprint {
        cells: vec![],
        inside: HashSet::new(),
        volume: 0.0,
        area: 0.0,
        hit_seen: false,
        hit_nodata: false,
    };

    let fd_coord = |c: &ArrayCoordinate| {
        ArrayCoordinate::new(c.row + offset.0, c.col + offset.1, c.origin)
    };

    let mut q: VecDeque<ArrayCoordinate> = VecDeque::new();
    q.push_back(pour_point);
    footprint.inside.insert((pour_point.row, pour_point.col));
    while let Some(p) = q.pop_front() {
        let elevation = dem.get_value(p.row, p.col) as i32;
        if (elevation as f64) < -2000.0 {
            footprint.hit_nodata = true;
        }
        if let Some(mask) = seen {
            if mask.get_value(p.row, p.col) {
                footprint.hit_seen = true;
            }
        }
        let elevation_above_pp = (elevation - pour_elevation).max(0) as usize;
        area_at_elevation[(elevation_above_pp + 1).min(bands - 1)] += find_area(&p);
        footprint.cells.push(p);

        for d in DIRECTIONS.iter() {
            let neighbor = ArrayCoordinate::new(p.row + d.row, p.col + d.col, p.origin);
            if !dem.within(neighbor.row, neighbor.col)
                || footprint.inside.contains(&(neighbor.row, neighbor.col))
            {
                continue;
            }
            let n_fd = fd_coord(&neighbor);
            let p_fd = fd_coord(&p);
            if fd.within(n_fd.row, n_fd.col)
                && fd.flows_to(&n_fd, &p_fd)
                && ((dem.get_value(neighbor.row, neighbor.col) as i32 - pour_elevation) as f64)
                    < dam_height
            {
                footprint.inside.insert((neighbor.row, neighbor.col));
                q.push_back(neighbor);
            }
        }
    }

    let mut cumulative_area = vec![0f64; bands];
    let mut volume_at_elevation = vec![0f64; bands];
    for ih in 1..bands {
        cumulative_area[ih] = cumulative_area[ih - 1] + area_at_elevation[ih];
        volume_at_elevation[ih] = volume_at_elevation[ih - 1] + 0.01 * cumulative_area[ih];
    }
    let h0 = (dam_height.floor() as usize).min(bands - 1);
    let frac = dam_height - dam_height.floor();
    footprint.volume =
        volume_at_elevation[h0] + frac * 0.01 * cumulative_area[(h0 + 1).min(bands - 1)];
    footprint.area = cumulative_area[h0]
        + frac * (cumulative_area[(h0 + 1).min(bands - 1)] - cumulative_area[h0]);
    footprint
}

/// Dam length (m) and embankment volume (GL) along the footprint boundary.
fn dam_geometry(
    footprint: &Footprint,
    pour_elevation: i32,
    dam_height: f64,
    big_model: &BigModel,
    ctx: &SearchContext,
) -> (f64, f64) {
    let dem = &big_model.dem;
    let bands = dam_height.ceil() as usize + 1;
    let mut dam_length_at_elevation = vec![0f64; bands];
    for p in &footprint.cells {
        let elevation_above_pp = (dem.get_value(p.row, p.col) as i32 - pour_elevation).max(0);
        for d in DIRECTIONS.iter() {
            if d.row * d.col != 0 {
                continue;
            }
            let neighbor = ArrayCoordinate::new(p.row + d.row, p.col + d.col, p.origin);
            if footprint.inside.contains(&(neighbor.row, neighbor.col)) {
                continue;
            }
            let neighbor_band = dem.get_value(neighbor.row, neighbor.col) as i32 - pour_elevation;
            let band = (elevation_above_pp.max(neighbor_band) as usize).min(bands - 1);
            dam_length_at_elevation[band] += find_orthogonal_nn_distance(p, &neighbor);
        }
    }
    let mut dam_length = 0.0;
    let mut dam_volume = 0.0;
    for (j, length) in dam_length_at_elevation.iter().enumerate() {
        if (j as f64) < dam_height {
            dam_length += length;
            dam_volume += ctx.vars.dam_volume(dam_height - j as f64, *length);
        }
    }
    (dam_length, dam_volume)
}

/// Traces the footprint boundary clockwise through the Moore neighbourhood,
/// returning boundary cells in order.
fn convert_to_polygon(
    inside: &HashSet<(isize, isize)>,
    origin_cell: &ArrayCoordinate,
) -> Vec<ArrayCoordinate> {
    let start = match inside.iter().min() {
        Some(s) => *s,
        None => return vec![],
    };
    let mut boundary = vec![];
    let mut current = start;
    let mut search_dir = 6usize; // entered from the west, scan from north
    let limit = 4 * inside.len() + 8;
    loop {
        boundary.push(ArrayCoordinate::new(current.0, current.1, origin_cell.origin));
        if boundary.len() > limit {
            break;
        }
        let mut moved = false;
        for k in 0..8 {
            let dir = (search_dir + k) % 8;
            let candidate = (
                current.0 + DIRECTIONS[dir].row,
                current.1 + DIRECTIONS[dir].col,
            );
            if inside.contains(&candidate) {
                current = candidate;
                search_dir = (dir + 6) % 8;
                moved = true;
                break;
            }
        }
        if !moved || current == start {
            break;
        }
    }
    boundary
}

/// Smooths and compresses a traced boundary into a geographic polygon.
fn polish_polygon(boundary: &[ArrayCoordinate]) -> Vec<GeographicCoordinate> {
    let geo: Vec<GeographicCoordinate> = boundary.iter().map(convert_to_geographic).collect();
    if geo.len() < 3 {
        return geo;
    }
    compress_poly(&corner_cut_poly(&corner_cut_poly(&geo)))
}

/// Boundary cells whose outside neighbour sits below the dam crest; these
/// are the cells a dam wall must run along.
fn dam_wall_cells(
    footprint: &Footprint,
    crest_elevation: f64,
    big_model: &BigModel,
) -> Vec<ArrayCoordinate> {
    let dem = &big_model.dem;
    let mut cells = vec![];
    for p in &footprint.cells {
        for d in DIRECTIONS.iter() {
            if d.row * d.col != 0 {
                continue;
            }
            let neighbor = (p.row + d.row, p.col + d.col);
            if !footprint.inside.contains(&neighbor)
                && (dem.get_value(neighbor.0, neighbor.1) as f64) < crest_elevation
            {
                cells.push(*p);
                break;
            }
        }
    }
    cells
}

/// Re-grows `reservoir` on the big model. With a non-negative volume the
/// wall height is binary-searched until the grown volume lands within the
/// configured accuracy of the target (stored volume plus the half-dam
/// credit); otherwise the committed `dam_height` is used as-is. Returns
/// false when the reservoir cannot be built: no flow data, footprint
/// overlap, no-data ground, or a wall outside the height limits.
pub fn model_reservoir(
    reservoir: &mut Reservoir,
    mut coordinates: Option<&mut ReservoirKmlCoordinates>,
    seen: Option<&Grid<bool>>,
    used_points: Option<&mut Vec<ArrayCoordinate>>,
    big_model: &BigModel,
    countries: &[Country],
    ctx: &SearchContext,
) -> Result<bool, Error> {
    let vars = &ctx.vars;
    let geo = convert_to_geographic(&reservoir.pour_point);
    let tile = match big_model.tile_index_for(geo) {
        Some(tile) => tile,
        None => return Ok(false),
    };
    let fd = match &big_model.flow_directions[tile] {
        Some(fd) => fd,
        None => return Ok(false),
    };
    let offset = frame_offset(&big_model.dem, fd);
    let pour_point = geographic_to_array(geo, big_model.dem.origin());
    if !big_model.dem.within(pour_point.row, pour_point.col) {
        return Ok(false);
    }
    let pour_elevation = reservoir.elevation;

    let dam_height;
    let footprint;
    if reservoir.volume >= 0.0 {
        let target = reservoir.volume * (1.0 + 0.5 / reservoir.water_rock);
        let mut lo = 0.0;
        let mut hi = reservoir.max_dam_height.min(vars.max_wall_height());
        let mut solved: Option<(f64, Footprint)> = None;
        for _ in 0..50 {
            let mid = 0.5 * (lo + hi);
            let fp = grow_reservoir(pour_point, pour_elevation, mid, big_model, fd, offset, seen);
            if fp.volume > target * (1.0 + vars.volume_accuracy) {
                hi = mid;
            } else if fp.volume < target * (1.0 - vars.volume_accuracy) {
                lo = mid;
            } else {
                solved = Some((mid, fp));
                break;
            }
            if hi - lo < 1e-3 {
                break;
            }
        }
        match solved {
            Some((h, fp)) => {
                dam_height = h;
                footprint = fp;
            }
            None => return Ok(false),
        }
        if dam_height < vars.minimum_dam_height {
            return Ok(false);
        }
    } else {
        dam_height = reservoir.dam_height;
        footprint = grow_reservoir(
            pour_point,
            pour_elevation,
            dam_height,
            big_model,
            fd,
            offset,
            seen,
        );
        reservoir.volume = footprint.volume;
    }

    if footprint.hit_seen || footprint.hit_nodata {
        return Ok(false);
    }
    if dam_height > reservoir.max_dam_height {
        return Ok(false);
    }

    let (dam_length, dam_volume) =
        dam_geometry(&footprint, pour_elevation, dam_height, big_model, ctx);

    reservoir.dam_height = dam_height;
    reservoir.area = footprint.area;
    reservoir.dam_length = dam_length;
    reservoir.dam_volume = dam_volume;
    if dam_volume > 0.0 {
        reservoir.water_rock = footprint.volume / dam_volume;
    }
    if footprint.area > 0.0 {
        reservoir.average_water_depth = footprint.volume / footprint.area;
    }
    for cell in &footprint.cells {
        update_reservoir_boundary_flat(&mut reservoir.shape_bound, *cell);
    }

    if let Some(country) = countries
        .iter()
        .find(|c| point_in_polygons(geo, &c.polygons))
    {
        reservoir.country = country.name.clone();
    }

    if let Some(coordinates) = coordinates.as_deref_mut() {
        let boundary = convert_to_polygon(&footprint.inside, &pour_point);
        let polygon = polish_polygon(&boundary);
        let crest = pour_elevation as f64 + dam_height;
        coordinates.reservoir = ReservoirKmlCoordinates::coordinate_string(&polygon, crest);
        let wall = dam_wall_cells(&footprint, crest, big_model);
        let wall_geo: Vec<GeographicCoordinate> =
            wall.iter().map(convert_to_geographic).collect();
        coordinates.dam = vec![ReservoirKmlCoordinates::coordinate_string(&wall_geo, crest)];
    }

    if let Some(used) = used_points {
        used.extend(footprint.cells.iter().copied());
    }
    Ok(true)
}

/// The constructor stage driver: re-grows one screened reservoir at a
/// requested dam height and writes a KML document for it.
pub fn run_reservoir_constructor(
    ctx: &SearchContext,
    res_id: &str,
    dam_height: f64,
) -> Result<(), Error> {
    use crate::csv::read_rough_reservoir_data;
    use crate::existing::read_countries;
    use crate::kml::output_kml;
    use phes_common::utils::get_formatted_elapsed_time;
    use std::fs::{create_dir_all, File};
    use std::io::Write;
    use std::time::Instant;

    let t = Instant::now();
    println!("Reservoir constructor started for {}", ctx.config.grid_square);
    let loc = &ctx.vars.file_storage_location;

    let big_model = BigModel::init(
        ctx.config.grid_square,
        ctx.vars.border,
        loc,
        &ctx.config.logger,
    )?;
    let reservoirs = read_rough_reservoir_data(
        &format!(
            "{}processing_files/reservoirs/{}_reservoirs_data.csv",
            loc, ctx.config.grid_square
        ),
        &ctx.vars,
    )?;
    ctx.config
        .logger
        .debug(&format!("Read in {} reservoirs", reservoirs.len()));

    let countries = match read_countries(&format!("{}input/countries/countries.txt", loc)) {
        Ok(countries) => countries,
        Err(_) => {
            ctx.config.logger.debug("No country polygons found");
            vec![]
        }
    };

    for rough in reservoirs.iter().filter(|r| r.identifier == res_id) {
        let mut reservoir = Reservoir::init(rough.pour_point, rough.elevation);
        reservoir.identifier = rough.identifier.clone();
        reservoir.latitude = rough.latitude;
        reservoir.longitude = rough.longitude;
        reservoir.volume = -1.0;
        reservoir.dam_height = dam_height;
        reservoir.max_dam_height = rough.max_dam_height.max(dam_height);
        let mut coordinates = ReservoirKmlCoordinates::default();
        if model_reservoir(
            &mut reservoir,
            Some(&mut coordinates),
            None,
            None,
            &big_model,
            &countries,
            ctx,
        )? {
            create_dir_all(format!("{}output", loc))?;
            let mut kml_file =
                File::create(format!("{}output/{}.kml", loc, reservoir.identifier))?;
            kml_file.write_all(output_kml(&reservoir, &coordinates).as_bytes())?;
        } else {
            ctx.config
                .logger
                .error(&format!("Could not build {} at {} m", res_id, dam_height));
        }
    }
    println!(
        "Reservoir constructor finished for {}. Runtime: {}",
        ctx.config.grid_square,
        get_formatted_elapsed_time(t)
    );
    Ok(())
}
