/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/

//! Ingestion of existing reservoirs, rivers and mine pits from the polygon
//! interchange files produced by the external vector converter, plus the
//! depression-volume pass that maintains the pit altitude-volume table.

use crate::reservoir::{
    AltitudeVolumePair, ExistingPit, ExistingReservoir, ReservoirShape, RoughReservoir,
};
use phes_common::algorithms::geographic_polygon_area;
use phes_common::configs::{SearchContext, Variables};
use phes_common::structures::{
    find_area, geographic_to_array, get_origin, ArrayCoordinate, GeographicCoordinate, GridSquare,
};
use phes_raster::{polygon_to_raster, Grid};
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufRead, BufReader, Error, ErrorKind};

const EXISTING_RESERVOIR_SHAPES: &str = "existing_reservoirs_shapes.txt";

fn malformed(filename: &str, what: &str) -> Error {
    Error::new(
        ErrorKind::InvalidData,
        format!("Malformed record in {}: {}", filename, what),
    )
}

/// A named set of polygons, as read from the country interchange file.
#[derive(Clone, Debug)]
pub struct Country {
    pub name: String,
    pub polygons: Vec<Vec<GeographicCoordinate>>,
}

/// Parses a whitespace-separated `lat lon lat lon ...` vertex list.
fn parse_vertices(field: &str, filename: &str) -> Result<Vec<GeographicCoordinate>, Error> {
    let values: Vec<&str> = field.split_whitespace().collect();
    if values.len() % 2 != 0 {
        return Err(malformed(filename, "odd vertex value count"));
    }
    let mut polygon = Vec::with_capacity(values.len() / 2);
    for pair in values.chunks(2) {
        let lat = pair[0]
            .parse::<f64>()
            .map_err(|_| malformed(filename, &format!("bad latitude '{}'", pair[0])))?;
        let lon = pair[1]
            .parse::<f64>()
            .map_err(|_| malformed(filename, &format!("bad longitude '{}'", pair[1])))?;
        polygon.push(GeographicCoordinate::new(lat, lon));
    }
    Ok(polygon)
}

/// Reads the country polygon file: one polygon per line, `NAME;lat lon ...`,
/// consecutive lines with the same name forming a multi-polygon.
pub fn read_countries(filename: &str) -> Result<Vec<Country>, Error> {
    let f = File::open(filename)?;
    let reader = BufReader::new(f);
    let mut countries: Vec<Country> = vec![];
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let (name, tail) = line
            .split_once(';')
            .ok_or_else(|| malformed(filename, "missing name separator"))?;
        let polygon = parse_vertices(tail, filename)?;
        match countries.iter_mut().find(|c| c.name == name) {
            Some(country) => country.polygons.push(polygon),
            None => countries.push(Country {
                name: name.to_string(),
                polygons: vec![polygon],
            }),
        }
    }
    Ok(countries)
}

/// Reads the reservoir polygon file (`name;lat lon ...`), returning the
/// polygon for each named reservoir.
fn read_reservoir_polygons(
    filename: &str,
) -> Result<Vec<(String, Vec<GeographicCoordinate>)>, Error> {
    let f = File::open(filename)?;
    let reader = BufReader::new(f);
    let mut shapes = vec![];
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let (name, tail) = line
            .split_once(';')
            .ok_or_else(|| malformed(filename, "missing name separator"))?;
        shapes.push((name.to_string(), parse_vertices(tail, filename)?));
    }
    Ok(shapes)
}

fn parse_reservoir_csv_line(
    line: &str,
    filename: &str,
) -> Result<(ExistingReservoir, Vec<AltitudeVolumePair>), Error> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 5 {
        return Err(malformed(filename, "too few fields"));
    }
    let parse_f64 = |s: &str| {
        s.trim()
            .parse::<f64>()
            .map_err(|_| malformed(filename, &format!("bad float '{}'", s)))
    };
    let parse_i32 = |s: &str| {
        s.trim()
            .parse::<i32>()
            .map_err(|_| malformed(filename, &format!("bad integer '{}'", s)))
    };
    let reservoir = ExistingReservoir::init(
        fields[0].trim(),
        parse_f64(fields[1])?,
        parse_f64(fields[2])?,
        parse_i32(fields[3])?,
        parse_f64(fields[4])?,
    );
    let mut pairs = vec![];
    let mut i = 5;
    while i + 1 < fields.len() {
        if fields[i].trim().is_empty() {
            break;
        }
        pairs.push(AltitudeVolumePair {
            altitude: parse_i32(fields[i])?,
            volume: parse_f64(fields[i + 1])?,
        });
        i += 2;
    }
    pairs.sort_by_key(|p| p.altitude);
    Ok((reservoir, pairs))
}

/// Reads the single existing-reservoir CSV DB (header row then one record
/// per reservoir, keyed by identifier).
pub fn read_existing_reservoir_data(filename: &str) -> Result<Vec<ExistingReservoir>, Error> {
    let f = File::open(filename)?;
    let reader = BufReader::new(f);
    let mut reservoirs = vec![];
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if i == 0 || line.trim().is_empty() {
            continue;
        }
        reservoirs.push(parse_reservoir_csv_line(&line, filename)?.0);
    }
    Ok(reservoirs)
}

/// Reads the same CSV keeping the altitude-volume columns, for pit modes.
pub fn read_existing_pit_data(filename: &str) -> Result<Vec<ExistingPit>, Error> {
    let f = File::open(filename)?;
    let reader = BufReader::new(f);
    let mut pits = vec![];
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if i == 0 || line.trim().is_empty() {
            continue;
        }
        let (reservoir, volumes) = parse_reservoir_csv_line(&line, filename)?;
        pits.push(ExistingPit { reservoir, volumes });
    }
    Ok(pits)
}

fn existing_csv_path(ctx: &SearchContext) -> String {
    format!(
        "{}input/existing_reservoirs/{}",
        ctx.vars.file_storage_location, ctx.vars.existing_reservoirs_csv
    )
}

fn shapes_path(ctx: &SearchContext) -> String {
    format!(
        "{}input/existing_reservoirs/{}",
        ctx.vars.file_storage_location, EXISTING_RESERVOIR_SHAPES
    )
}

/// Attaches polygons to CSV-sourced reservoirs and computes their areas.
fn with_polygons(
    mut reservoirs: Vec<ExistingReservoir>,
    ctx: &SearchContext,
) -> Result<Vec<ExistingReservoir>, Error> {
    let shapes = read_reservoir_polygons(&shapes_path(ctx))?;
    for r in reservoirs.iter_mut() {
        if let Some((_, polygon)) = shapes.iter().find(|(name, _)| *name == r.identifier) {
            r.polygon = polygon.clone();
            r.area = geographic_polygon_area(&r.polygon);
        }
    }
    Ok(reservoirs)
}

/// Reads a per-tile river or bluefield polygon layer:
/// `name,volume,elevation,river,lat lon lat lon ...`
fn read_tiled_layer(filename: &str) -> Result<Vec<ExistingReservoir>, Error> {
    let f = File::open(filename)?;
    let reader = BufReader::new(f);
    let mut reservoirs = vec![];
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if i == 0 || line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 5 {
            return Err(malformed(filename, "expected 5 fields"));
        }
        let volume = fields[1]
            .trim()
            .parse::<f64>()
            .map_err(|_| malformed(filename, "bad volume"))?;
        let elevation = fields[2]
            .trim()
            .parse::<i32>()
            .map_err(|_| malformed(filename, "bad elevation"))?;
        let river = fields[3].trim() == "1";
        let mut r = ExistingReservoir::init(fields[0].trim(), 0.0, 0.0, elevation, volume);
        r.river = river;
        r.polygon = parse_vertices(fields[4], filename)?;
        reservoirs.push(r);
    }
    Ok(reservoirs)
}

fn centroid(polygon: &[GeographicCoordinate]) -> GeographicCoordinate {
    let mut lat = 0.0;
    let mut lon = 0.0;
    for gc in polygon {
        lat += gc.lat;
        lon += gc.lon;
    }
    let n = polygon.len().max(1) as f64;
    GeographicCoordinate::new(lat / n, lon / n)
}

/// All existing reservoirs whose centroid falls in the given tile, from the
/// configured combination of the central DB and tiled river/bluefield
/// layers. Centroid-derived coordinates are used consistently so later
/// stages agree on tile assignment.
pub fn get_existing_reservoirs(
    grid_square: GridSquare,
    ctx: &SearchContext,
) -> Result<Vec<ExistingReservoir>, Error> {
    let loc = &ctx.vars.file_storage_location;
    let mut candidates: Vec<(ExistingReservoir, bool)> = vec![];

    if ctx.vars.use_tiled_rivers {
        let filename = format!("{}input/river_polygon_tiles/{}_rivers.csv", loc, grid_square);
        match read_tiled_layer(&filename) {
            Ok(rs) => candidates.extend(rs.into_iter().map(|r| (r, true))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                ctx.config.logger.debug(&format!("No file: {}", filename))
            }
            Err(e) => return Err(e),
        }
    }
    if ctx.vars.use_tiled_bluefield {
        let filename = format!(
            "{}input/bluefield_polygon_tiles/{}_bluefield.csv",
            loc, grid_square
        );
        match read_tiled_layer(&filename) {
            Ok(rs) => candidates.extend(rs.into_iter().map(|r| (r, true))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                ctx.config.logger.debug(&format!("No file: {}", filename))
            }
            Err(e) => return Err(e),
        }
    }
    if !ctx.vars.use_tiled_rivers && !ctx.vars.use_tiled_bluefield {
        let reservoirs = read_existing_reservoir_data(&existing_csv_path(ctx))?;
        candidates.extend(with_polygons(reservoirs, ctx)?.into_iter().map(|r| (r, false)));
    }

    let mut to_return = vec![];
    for (mut reservoir, from_tiles) in candidates {
        if reservoir.polygon.is_empty() {
            continue;
        }
        let centre = centroid(&reservoir.polygon);
        if from_tiles {
            reservoir.latitude = centre.lat;
            reservoir.longitude = centre.lon;
        }
        if grid_square.contains(centre) {
            reservoir.area = geographic_polygon_area(&reservoir.polygon);
            to_return.push(reservoir);
        }
    }
    Ok(to_return)
}

/// Looks up a single existing reservoir by name in the central DB.
pub fn get_existing_reservoir(name: &str, ctx: &SearchContext) -> Result<ExistingReservoir, Error> {
    let filename = existing_csv_path(ctx);
    let reservoirs = with_polygons(read_existing_reservoir_data(&filename)?, ctx)?;
    reservoirs
        .into_iter()
        .find(|r| r.identifier == name)
        .ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("Could not find reservoir with name {} in {}", name, filename),
            )
        })
}

/// The tile holding a reservoir's centroid.
pub fn get_square_coordinate(reservoir: &ExistingReservoir) -> GridSquare {
    GridSquare::new(
        reservoir.latitude.floor() as i32,
        reservoir.longitude.floor() as i32,
    )
}

/// Pit records for every pit whose centroid falls inside the tile.
pub fn get_pit_details(grid_square: GridSquare, ctx: &SearchContext) -> Result<Vec<ExistingPit>, Error> {
    let pits = read_existing_pit_data(&existing_csv_path(ctx))?;
    Ok(pits
        .into_iter()
        .filter(|p| {
            grid_square.contains(GeographicCoordinate::new(
                p.reservoir.latitude,
                p.reservoir.longitude,
            ))
        })
        .collect())
}

/// Pit record for a single named pit.
pub fn get_pit_details_by_name(name: &str, ctx: &SearchContext) -> Result<ExistingPit, Error> {
    let filename = existing_csv_path(ctx);
    read_existing_pit_data(&filename)?
        .into_iter()
        .find(|p| p.reservoir.identifier == name)
        .ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("Could not find pit with name {} in {}", name, filename),
            )
        })
}

/// Converts an existing reservoir into a brownfield rough reservoir whose
/// per-wall-height payloads are constant and whose boundary is the polygon
/// in array coordinates.
pub fn existing_reservoir_to_rough_reservoir(
    r: &ExistingReservoir,
    vars: &Variables,
) -> RoughReservoir {
    let origin = get_origin(r.latitude, r.longitude, vars.border);
    let pour_point = geographic_to_array(
        GeographicCoordinate::new(r.latitude, r.longitude),
        origin,
    );
    let mut reservoir = RoughReservoir::brownfield(pour_point, r.elevation);
    reservoir.identifier = r.identifier.clone();
    reservoir.river = r.river;
    reservoir.latitude = r.latitude;
    reservoir.longitude = r.longitude;
    reservoir.bottom_elevation = r.elevation;
    for _ in 0..vars.dam_wall_heights.len() {
        reservoir.volumes.push(r.volume);
        reservoir.dam_volumes.push(0.0);
        reservoir.areas.push(r.area);
        reservoir.water_rocks.push(1_000_000_000.0);
    }
    let shape_bound = r
        .polygon
        .iter()
        .map(|c| geographic_to_array(*c, origin))
        .collect();
    reservoir.shape = ReservoirShape::Brownfield {
        shape_bound,
        elevations: vec![],
    };
    reservoir
}

/// Rasterizes each pit polygon over the filled DEM, integrates cumulative
/// (area, volume) by elevation band and rewrites the altitude-volume sample
/// columns of the existing-reservoirs CSV in place.
pub fn depression_volume_finding(dem: &Grid<i16>, ctx: &SearchContext) -> Result<(), Error> {
    let filename = existing_csv_path(ctx);
    let reservoirs = with_polygons(read_existing_reservoir_data(&filename)?, ctx)?;
    let n_pairs = ctx.vars.num_altitude_volume_pairs;

    let mut modified: Vec<(String, Vec<String>)> = vec![];
    for reservoir in &reservoirs {
        let gc = GeographicCoordinate::new(reservoir.latitude, reservoir.longitude);
        if !ctx.config.grid_square.contains(gc) || reservoir.polygon.is_empty() {
            continue;
        }

        let mut extent: Grid<bool> = Grid::new(dem.rows(), dem.columns(), false, false)?;
        extent.copy_georef_from(dem);
        polygon_to_raster(&reservoir.polygon, &mut extent);

        // Lowest and highest elevation within the pit polygon
        let mut min_elevation: i16 = 32767;
        let mut max_elevation: i16 = 0;
        for row in 0..extent.rows() {
            for col in 0..extent.columns() {
                if extent.get_value(row, col) {
                    min_elevation = min_elevation.min(dem.get_value(row, col));
                    max_elevation = max_elevation.max(dem.get_value(row, col));
                }
            }
        }
        if min_elevation > max_elevation {
            ctx.config.logger.debug(&format!(
                "Pit {} has no cells inside the DEM extent",
                reservoir.identifier
            ));
            continue;
        }

        let bands = (max_elevation - min_elevation) as usize + 2;
        let mut area_at_elevation = vec![0f64; bands];
        let mut cumulative_area_at_elevation = vec![0f64; bands];
        let mut volume_at_elevation = vec![0f64; bands];

        let origin = dem.array_origin();
        for row in 0..extent.rows() {
            for col in 0..extent.columns() {
                if extent.get_value(row, col) {
                    let elevation_above_pp =
                        (dem.get_value(row, col) - min_elevation).max(0) as usize;
                    area_at_elevation[elevation_above_pp + 1] +=
                        find_area(&ArrayCoordinate::new(row, col, origin));
                }
            }
        }
        for ih in 1..bands {
            cumulative_area_at_elevation[ih] =
                cumulative_area_at_elevation[ih - 1] + area_at_elevation[ih];
            volume_at_elevation[ih] =
                volume_at_elevation[ih - 1] + 0.01 * cumulative_area_at_elevation[ih];
        }

        let depth = (max_elevation - min_elevation) as f64;
        let mut cols = vec![
            min_elevation.to_string(),
            volume_at_elevation[bands - 1].to_string(),
        ];
        for ih in 1..=n_pairs {
            let height = (ih as f64 * depth / n_pairs as f64).round() as usize;
            cols.push((min_elevation as i32 + height as i32).to_string());
            cols.push(volume_at_elevation[height.min(bands - 1)].to_string());
        }
        modified.push((reservoir.identifier.clone(), cols));
    }

    // Rewrite the elevation, volume and sample columns of the touched rows
    let f = File::open(&filename)?;
    let reader = BufReader::new(f);
    let mut lines = vec![];
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if i == 0 {
            lines.push(line);
            continue;
        }
        let mut fields: Vec<String> = line.split(',').map(|s| s.to_string()).collect();
        if let Some((_, cols)) = modified
            .iter()
            .find(|(name, _)| fields.first().map(|f| f.trim()) == Some(name.as_str()))
        {
            fields.truncate(3);
            fields.extend(cols.iter().cloned());
        }
        lines.push(fields.join(","));
    }
    let mut out = File::create(&filename)?;
    for line in lines {
        writeln!(out, "{}", line)?;
    }
    Ok(())
}
