/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/

//! The pairing stage: matches upper to lower reservoirs across the 3×3 tile
//! neighbourhood under head, slope, volume, water-rock and cost gates, and
//! ranks the survivors by figure of merit.

use crate::csv::{
    read_rough_reservoir_data, write_rough_pair_csv, write_rough_pair_csv_header,
    write_rough_pair_data, write_rough_pair_data_header,
};
use crate::existing::{
    get_existing_reservoir, get_pit_details, get_pit_details_by_name, get_square_coordinate,
};
use crate::fom::{max_fom, set_fom};
use crate::reservoir::{
    ExistingPit, Pair, Reservoir, ReservoirShape, RoughReservoir,
};
use phes_common::algorithms::linear_interpolate;
use phes_common::configs::{SearchContext, SearchType, Test};
use phes_common::structures::{
    convert_to_geographic, find_distance, find_distance_sqd, find_distance_sqd_geo,
    geographic_to_array, ArrayCoordinate, GeographicCoordinate,
};
use phes_common::utils::{convert_to_int, get_formatted_elapsed_time, max_of};
use phes_common::INF;
use rstar::primitives::GeomWithData;
use rstar::RTree;
use std::collections::HashSet;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Error, ErrorKind};
use std::time::Instant;

/// Spatial index over a brownfield boundary, in latitude/longitude space
/// scaled so Euclidean nearest matches the ground metric at the reservoir's
/// own latitude.
struct BoundIndex {
    tree: RTree<GeomWithData<[f64; 2], usize>>,
    coslat: f64,
}

impl BoundIndex {
    fn build(reservoir: &RoughReservoir) -> Option<BoundIndex> {
        let bound = reservoir.brownfield_bound();
        if bound.is_empty() {
            return None;
        }
        let coslat = reservoir.latitude.to_radians().cos();
        let points: Vec<GeomWithData<[f64; 2], usize>> = bound
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let geo = convert_to_geographic(c);
                GeomWithData::new([geo.lat, geo.lon * coslat], i)
            })
            .collect();
        Some(BoundIndex {
            tree: RTree::bulk_load(points),
            coslat,
        })
    }

    /// Index of the boundary vertex nearest to `point`.
    fn nearest(&self, point: GeographicCoordinate) -> Option<usize> {
        self.tree
            .nearest_neighbor(&[point.lat, point.lon * self.coslat])
            .map(|geom| geom.data)
    }
}

/// Interpolated boundary points of a reservoir at the given wall height: the
/// eight directional extrema (plus the pour point) for greenfields, the full
/// boundary for brownfields.
fn find_points_to_test(
    reservoir: &RoughReservoir,
    wall_height: f64,
    pour_point: &ArrayCoordinate,
    dam_wall_heights: &[f64],
) -> Vec<GeographicCoordinate> {
    let mut bound = vec![];
    match &reservoir.shape {
        ReservoirShape::Greenfield { shape_bound } => {
            let one_point = [*pour_point; 8];
            let mut i = 0;
            while dam_wall_heights[i] < wall_height && i < dam_wall_heights.len() - 1 {
                i += 1;
            }
            let lower_wall_height = if i > 0 { dam_wall_heights[i - 1] } else { 0.0 };
            let lower_shape = if i > 0 { &shape_bound[i - 1] } else { &one_point };
            let inv_wall_height_interval = 1.0 / (dam_wall_heights[i] - lower_wall_height);
            for j in 0..8 {
                let point1 = convert_to_geographic(&lower_shape[j]);
                let point2 = convert_to_geographic(&shape_bound[i][j]);
                let f = (wall_height - lower_wall_height) * inv_wall_height_interval;
                bound.push(GeographicCoordinate::new(
                    point1.lat + (point2.lat - point1.lat) * f,
                    point1.lon + (point2.lon - point1.lon) * f,
                ));
            }
            bound.push(convert_to_geographic(pour_point));
        }
        ReservoirShape::Brownfield { shape_bound, .. } => {
            for c in shape_bound {
                bound.push(convert_to_geographic(c));
            }
        }
    }
    bound
}

/// Least squared distance between the two reservoirs' boundary points at
/// the given wall heights; the pour points are moved to the closest vertex
/// pair found.
fn find_least_distance_sqd(
    upper: &RoughReservoir,
    lower: &RoughReservoir,
    upper_wall_height: f64,
    lower_wall_height: f64,
    upper_pour_point: &mut ArrayCoordinate,
    lower_pour_point: &mut ArrayCoordinate,
    dam_wall_heights: &[f64],
) -> f64 {
    let mut mindist2 = INF;
    let upper_points =
        find_points_to_test(upper, upper_wall_height, upper_pour_point, dam_wall_heights);
    let lower_points =
        find_points_to_test(lower, lower_wall_height, lower_pour_point, dam_wall_heights);

    for p1 in &upper_points {
        for p2 in &lower_points {
            let dist2 = find_distance_sqd_geo(*p1, *p2);
            if mindist2 > dist2 {
                mindist2 = dist2;
                *upper_pour_point = geographic_to_array(*p1, upper_pour_point.origin);
                *lower_pour_point = geographic_to_array(*p2, lower_pour_point.origin);
            }
        }
    }
    mindist2
}

fn max_altitude(pairs: &[crate::reservoir::AltitudeVolumePair]) -> i32 {
    pairs.last().map(|p| p.altitude).unwrap_or(0)
}

fn get_altitudes(pit: &ExistingPit) -> Vec<f64> {
    pit.volumes.iter().map(|p| p.altitude as f64).collect()
}

fn get_volumes(pit: &ExistingPit) -> Vec<f64> {
    pit.volumes.iter().map(|p| p.volume).collect()
}

/// Stored volume between two elevations of a pit, from its sampled
/// altitude-volume curve.
pub fn pit_volume(pit: &ExistingPit, bottom_elevation: i32, top_elevation: i32) -> f64 {
    linear_interpolate(top_elevation as f64, &get_altitudes(pit), &get_volumes(pit))
        - linear_interpolate(bottom_elevation as f64, &get_altitudes(pit), &get_volumes(pit))
}

/// Searches pit floor elevations and depths for a configuration meeting the
/// required volume while the head ratio stays inside the allowed
/// variability. Returns the chosen (required volume, head) on success.
fn determine_pit_elevation_and_volume(
    upper: &RoughReservoir,
    lower: &RoughReservoir,
    energy_capacity: f64,
    pit_details: &ExistingPit,
    ctx: &SearchContext,
) -> Option<(f64, i32)> {
    let vars = &ctx.vars;
    let (greenfield, pit) = if upper.is_brownfield() {
        (lower, upper)
    } else {
        (upper, lower)
    };

    let mut pit_elevation = pit.elevation;
    while pit_elevation < max_altitude(&pit_details.volumes) {
        let pit_max_dam_height = (max_altitude(&pit_details.volumes) - pit_elevation) as f64;
        let mut pit_depth = 0;
        while (pit_depth as f64) < pit_max_dam_height {
            pit_depth += 1;
            let volume = pit_volume(pit_details, pit_elevation, pit_elevation + pit_depth);
            let greenfield_wall_height =
                linear_interpolate(volume, &greenfield.volumes, &vars.dam_wall_heights);
            let head = convert_to_int(
                ((0.5 * greenfield_wall_height + greenfield.elevation as f64)
                    - (0.5 * pit_depth as f64 + pit_elevation as f64))
                    .abs(),
            );
            if head < vars.min_head || head > vars.max_head {
                continue;
            }
            let head_ratio = (head as f64 + 0.5 * (greenfield_wall_height + pit_depth as f64))
                / (head as f64 - 0.5 * (greenfield_wall_height + pit_depth as f64));

            if head_ratio > 1.0 + vars.max_head_variability || head_ratio < 0.0 {
                break;
            }
            if volume < vars.required_volume(energy_capacity, head as f64) {
                continue;
            }
            return Some((volume, head));
        }
        pit_elevation += vars.pit_height_resolution;
    }
    None
}

/// Full acceptance test of one (upper, lower) candidate for one Test:
/// volume solvability, dam wall heights, water-rock, refined geometry and
/// FOM, in the order cheap to expensive.
#[allow(clippy::too_many_arguments)]
fn check_good_pair(
    upper: &RoughReservoir,
    lower: &RoughReservoir,
    test: &Test,
    fom_cap: f64,
    pit_details: Option<&ExistingPit>,
    ctx: &SearchContext,
) -> Result<Option<Pair>, Error> {
    let vars = &ctx.vars;
    let mut head = upper.elevation - lower.elevation;
    let mut required_volume = vars.required_volume(test.energy_capacity, head as f64);
    if max_of(&upper.volumes) < required_volume
        || max_of(&lower.volumes) < required_volume * (if lower.river { 5.0 } else { 1.0 })
    {
        return Ok(None);
    }

    let pit_mode = ctx.config.search_type.pit();
    let single_pit = if pit_mode {
        let wanted = if upper.is_brownfield() {
            &upper.identifier
        } else {
            &lower.identifier
        };
        match pit_details {
            Some(p) if p.reservoir.identifier == *wanted => Some(p),
            Some(p) if ctx.config.search_type == SearchType::SinglePit => Some(p),
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!(
                        "No pit details in the existing reservoirs CSV for reservoir with ID: {}",
                        wanted
                    ),
                ))
            }
        }
    } else {
        None
    };

    if let Some(pit) = single_pit {
        match determine_pit_elevation_and_volume(upper, lower, test.energy_capacity, pit, ctx) {
            Some((volume, pit_head)) => {
                required_volume = volume;
                head = pit_head;
            }
            None => return Ok(None),
        }
    }

    let mut upper_water_rock_estimate = INF;
    let mut lower_water_rock_estimate = INF;

    let upper_dam_wall_height = if !upper.is_brownfield() {
        let height = linear_interpolate(required_volume, &upper.volumes, &vars.dam_wall_heights);
        upper_water_rock_estimate = required_volume
            / linear_interpolate(height, &vars.dam_wall_heights, &upper.dam_volumes);
        height
    } else if let Some(pit) = single_pit {
        linear_interpolate(
            required_volume + pit_volume(pit, pit.reservoir.elevation, upper.elevation),
            &get_volumes(pit),
            &get_altitudes(pit),
        ) - upper.elevation as f64
    } else {
        vars.dam_wall_heights[0]
    };

    let lower_dam_wall_height = if !lower.is_brownfield() && !lower.ocean {
        let height = linear_interpolate(required_volume, &lower.volumes, &vars.dam_wall_heights);
        lower_water_rock_estimate = required_volume
            / linear_interpolate(height, &vars.dam_wall_heights, &lower.dam_volumes);
        height
    } else if let Some(pit) = single_pit {
        linear_interpolate(
            required_volume + pit_volume(pit, pit.reservoir.elevation, lower.elevation),
            &get_volumes(pit),
            &get_altitudes(pit),
        ) - lower.elevation as f64
    } else {
        vars.dam_wall_heights[0]
    };

    if (!upper.is_brownfield() && upper_dam_wall_height > upper.max_dam_height)
        || (!lower.is_brownfield() && !lower.ocean && lower_dam_wall_height > lower.max_dam_height)
    {
        return Ok(None);
    }

    if (upper_water_rock_estimate * lower_water_rock_estimate)
        < vars.min_pair_water_rock * (upper_water_rock_estimate + lower_water_rock_estimate)
    {
        return Ok(None);
    }

    let mut upper_coordinates = upper.pour_point;
    let mut lower_coordinates = lower.pour_point;
    let least_distance = find_least_distance_sqd(
        upper,
        lower,
        upper_dam_wall_height,
        lower_dam_wall_height,
        &mut upper_coordinates,
        &mut lower_coordinates,
        &vars.dam_wall_heights,
    );

    if (head as f64 * 0.001).powi(2) < least_distance * vars.min_slope.powi(2) {
        return Ok(None);
    }

    // For ocean searches the refined lower coordinate becomes the outlet.
    let lower_pour_point = if ctx.config.search_type == SearchType::Ocean {
        lower_coordinates
    } else {
        lower.pour_point
    };

    let mut upper_reservoir = Reservoir::init(upper.pour_point, upper.elevation);
    upper_reservoir.identifier = upper.identifier.clone();
    upper_reservoir.volume = required_volume;
    if !upper.is_brownfield() {
        upper_reservoir.dam_volume =
            linear_interpolate(upper_dam_wall_height, &vars.dam_wall_heights, &upper.dam_volumes);
        upper_reservoir.area =
            linear_interpolate(upper_dam_wall_height, &vars.dam_wall_heights, &upper.areas);
    } else {
        upper_reservoir.area = upper.areas[0];
    }
    upper_reservoir.water_rock = upper_water_rock_estimate;
    upper_reservoir.dam_height = upper_dam_wall_height;
    upper_reservoir.max_dam_height = upper.max_dam_height;
    upper_reservoir.watershed_area = upper.watershed_area;
    upper_reservoir.brownfield = upper.is_brownfield();
    upper_reservoir.river = upper.river;
    upper_reservoir.pit = upper.pit;

    let mut lower_reservoir = Reservoir::init(lower_pour_point, lower.elevation);
    lower_reservoir.identifier = lower.identifier.clone();
    lower_reservoir.volume = required_volume;
    if !lower.is_brownfield() {
        lower_reservoir.dam_volume =
            linear_interpolate(lower_dam_wall_height, &vars.dam_wall_heights, &lower.dam_volumes);
        lower_reservoir.area =
            linear_interpolate(lower_dam_wall_height, &vars.dam_wall_heights, &lower.areas);
    } else {
        lower_reservoir.area = lower.areas[0];
    }
    lower_reservoir.water_rock = lower_water_rock_estimate;
    lower_reservoir.dam_height = lower_dam_wall_height;
    lower_reservoir.max_dam_height = lower.max_dam_height;
    lower_reservoir.watershed_area = lower.watershed_area;
    lower_reservoir.brownfield = lower.is_brownfield();
    lower_reservoir.river = lower.river;
    lower_reservoir.pit = lower.pit;
    lower_reservoir.ocean = lower.ocean;

    let mut pair = Pair {
        identifier: format!("{} & {}", upper.identifier, lower.identifier),
        head,
        distance: least_distance.sqrt(),
        pp_distance: find_distance(&upper_reservoir.pour_point, &lower_reservoir.pour_point),
        slope: 0.0,
        required_volume,
        water_rock: 1.0 / (1.0 / upper_water_rock_estimate + 1.0 / lower_water_rock_estimate),
        fom: 0.0,
        category: 'Z',
        energy_capacity: test.energy_capacity,
        storage_time: test.storage_time,
        country: String::new(),
        upper: upper_reservoir,
        lower: lower_reservoir,
    };
    pair.slope = pair.head as f64 / pair.distance * 0.001;

    set_fom(&mut pair, vars);
    if pair.fom > fom_cap {
        return Ok(None);
    }
    Ok(Some(pair))
}

struct PairWriters {
    csv_file: BufWriter<File>,
    csv_data_file: BufWriter<File>,
}

/// Matches every upper against every lower, retaining at most the
/// configured number of cheapest lowers per upper per Test, and writes the
/// survivors. Returns the per-Test pair counts.
fn pairing(
    upper_reservoirs: &[RoughReservoir],
    lower_reservoirs: &[RoughReservoir],
    pit_details: &[ExistingPit],
    writers: &mut PairWriters,
    ctx: &SearchContext,
    existing_existing_allowed: bool,
) -> Result<Vec<usize>, Error> {
    let vars = &ctx.vars;
    let mut pairs = vec![0usize; vars.tests.len()];
    let mut temp_pairs: Vec<Vec<Pair>> = vec![vec![]; vars.tests.len()];

    // boundary indexes for brownfield sides, built once
    let upper_indexes: Vec<Option<BoundIndex>> =
        upper_reservoirs.iter().map(BoundIndex::build).collect();
    let lower_indexes: Vec<Option<BoundIndex>> =
        lower_reservoirs.iter().map(BoundIndex::build).collect();

    let retention_cap = if ctx.config.search_type.pit() {
        1
    } else {
        vars.max_lowers_per_upper
    };

    for (iupper, upper_reservoir) in upper_reservoirs.iter().enumerate() {
        let coslat = upper_reservoir.latitude.to_radians().cos();
        for (ilower, lower_orig) in lower_reservoirs.iter().enumerate() {
            let mut head = upper_reservoir.elevation - lower_orig.elevation;
            if !upper_reservoir.river && !lower_orig.river {
                if head < vars.min_head || head > vars.max_head {
                    continue;
                }
            }
            if !existing_existing_allowed
                && upper_reservoir.is_brownfield()
                && lower_orig.is_brownfield()
            {
                continue;
            }

            // pour-point separation, refined to boundary vertices for
            // brownfield sides
            let mut min_dist_sqd = find_distance_sqd(
                &upper_reservoir.pour_point,
                &lower_orig.pour_point,
                coslat,
            );
            if let Some(index) = &upper_indexes[iupper] {
                if let Some(i) = index.nearest(convert_to_geographic(&lower_orig.pour_point)) {
                    min_dist_sqd = find_distance_sqd(
                        &upper_reservoir.brownfield_bound()[i],
                        &lower_orig.pour_point,
                        coslat,
                    );
                }
            }
            let mut river_lower: Option<RoughReservoir> = None;
            if let Some(index) = &lower_indexes[ilower] {
                if let Some(i) = index.nearest(convert_to_geographic(&upper_reservoir.pour_point)) {
                    let bound = lower_orig.brownfield_bound();
                    min_dist_sqd =
                        find_distance_sqd(&bound[i], &upper_reservoir.pour_point, coslat);
                    if lower_orig.river {
                        // the nearest river vertex becomes the lower's pour
                        // point and supplies its elevation
                        let mut adopted = lower_orig.clone();
                        adopted.pour_point = bound[i];
                        if let ReservoirShape::Brownfield { elevations, .. } = &lower_orig.shape {
                            if let Some(e) = elevations.get(i) {
                                adopted.elevation = *e;
                            }
                        }
                        river_lower = Some(adopted);
                    }
                }
            }
            let lower_reservoir = river_lower.as_ref().unwrap_or(lower_orig);

            if upper_reservoir.river {
                continue;
            }

            head = upper_reservoir.elevation - lower_reservoir.elevation;
            if head < vars.min_head || head > vars.max_head {
                continue;
            }
            if (head as f64 * 0.001).powi(2) <= min_dist_sqd * vars.min_pp_slope.powi(2) {
                continue;
            }

            for (itest, test) in vars.tests.iter().enumerate() {
                let fom_cap = max_fom(test, vars);
                let pit = pit_details.iter().find(|p| {
                    p.reservoir.identifier
                        == *if upper_reservoir.is_brownfield() {
                            &upper_reservoir.identifier
                        } else {
                            &lower_reservoir.identifier
                        }
                });
                let pit = if ctx.config.search_type == SearchType::SinglePit {
                    pit.or_else(|| pit_details.first())
                } else {
                    pit
                };
                if let Some(pair) =
                    check_good_pair(upper_reservoir, lower_reservoir, test, fom_cap, pit, ctx)?
                {
                    temp_pairs[itest].push(pair);
                    temp_pairs[itest].sort_by(|a, b| {
                        a.fom
                            .partial_cmp(&b.fom)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then_with(|| a.identifier.cmp(&b.identifier))
                    });
                    temp_pairs[itest].truncate(retention_cap);
                }
            }
        }

        for itest in 0..vars.tests.len() {
            for pair in &temp_pairs[itest] {
                write_rough_pair_csv(&mut writers.csv_file, pair)?;
                write_rough_pair_data(&mut writers.csv_data_file, pair)?;
                pairs[itest] += 1;
            }
            temp_pairs[itest].clear();
        }
    }
    Ok(pairs)
}

/// The pairing stage driver: reads the uppers for this run and the lowers
/// of the 3×3 neighbourhood, pairs them and reports per-Test counts.
pub fn run_pairing(ctx: &mut SearchContext) -> Result<(), Error> {
    let t = Instant::now();
    println!("Pairing started for {}", ctx.config.filename());

    let loc = ctx.vars.file_storage_location.clone();
    let mut pit_details: Vec<ExistingPit> = vec![];

    let upper_reservoirs = if ctx.config.search_type.existing() {
        if ctx.config.search_type.single() {
            let reservoir = get_existing_reservoir(&ctx.config.name, ctx)?;
            ctx.config.grid_square = get_square_coordinate(&reservoir);
        }
        let mut uppers = read_rough_reservoir_data(
            &format!(
                "{}processing_files/reservoirs/{}_reservoirs_data.csv",
                loc,
                ctx.config.filename()
            ),
            &ctx.vars,
        )?;
        if ctx.config.search_type == SearchType::BulkExisting {
            let greenfields = read_rough_reservoir_data(
                &format!(
                    "{}processing_files/reservoirs/{}_reservoirs_data.csv",
                    loc, ctx.config.grid_square
                ),
                &ctx.vars,
            )?;
            uppers.extend(greenfields);
        }
        if ctx.config.search_type == SearchType::BulkPit {
            pit_details = get_pit_details(ctx.config.grid_square, ctx)?;
        } else if ctx.config.search_type == SearchType::SinglePit {
            pit_details = vec![get_pit_details_by_name(&ctx.config.name, ctx)?];
        }
        uppers
    } else {
        read_rough_reservoir_data(
            &format!(
                "{}processing_files/reservoirs/{}_reservoirs_data.csv",
                loc, ctx.config.grid_square
            ),
            &ctx.vars,
        )?
    };

    let mut lower_reservoirs: Vec<RoughReservoir> = vec![];
    let mut lower_ids: HashSet<String> = HashSet::new();
    let dedup = matches!(
        ctx.config.search_type,
        SearchType::BulkExisting | SearchType::BulkPit
    );
    for neighbor in ctx.config.grid_square.neighbors() {
        let filename = format!(
            "{}processing_files/reservoirs/{}{}_reservoirs_data.csv",
            loc,
            ctx.config.search_type.lowers_prefix(),
            neighbor
        );
        match read_rough_reservoir_data(&filename, &ctx.vars) {
            Ok(temp) => {
                for reservoir in temp {
                    if dedup && lower_ids.contains(&reservoir.identifier) {
                        continue;
                    }
                    lower_ids.insert(reservoir.identifier.clone());
                    lower_reservoirs.push(reservoir);
                }
            }
            Err(_) => {
                ctx.config
                    .logger
                    .debug(&format!("Could not import reservoirs from {}", filename));
            }
        }
    }
    ctx.config
        .logger
        .debug(&format!("Read in {} uppers", upper_reservoirs.len()));
    ctx.config
        .logger
        .debug(&format!("Read in {} lowers", lower_reservoirs.len()));

    create_dir_all(format!("{}output/pairs", loc))?;
    create_dir_all(format!("{}processing_files/pairs", loc))?;
    let mut csv_file = BufWriter::new(File::create(format!(
        "{}output/pairs/{}_rough_pairs.csv",
        loc,
        ctx.config.filename()
    ))?);
    write_rough_pair_csv_header(&mut csv_file)?;
    let mut csv_data_file = BufWriter::new(File::create(format!(
        "{}processing_files/pairs/{}_rough_pairs_data.csv",
        loc,
        ctx.config.filename()
    ))?);
    write_rough_pair_data_header(&mut csv_data_file)?;
    let mut writers = PairWriters {
        csv_file,
        csv_data_file,
    };

    let mut counts = pairing(
        &upper_reservoirs,
        &lower_reservoirs,
        &pit_details,
        &mut writers,
        ctx,
        true,
    )?;
    if ctx.config.search_type.existing() {
        let reversed = pairing(
            &lower_reservoirs,
            &upper_reservoirs,
            &pit_details,
            &mut writers,
            ctx,
            false,
        )?;
        for (a, b) in counts.iter_mut().zip(reversed) {
            *a += b;
        }
    }

    let mut total = 0;
    for (itest, test) in ctx.vars.tests.iter().enumerate() {
        ctx.config.logger.debug(&format!(
            "{} {}GWh {}h pairs",
            counts[itest], test.energy_capacity, test.storage_time
        ));
        total += counts[itest];
    }
    println!(
        "Pairing finished for {}. Found {} pairs. Runtime: {}",
        ctx.config.filename(),
        total,
        get_formatted_elapsed_time(t)
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use phes_common::configs::{SearchConfig, SearchContext, Variables};
    use phes_common::structures::{get_origin, GridSquare};
    use crate::reservoir::AltitudeVolumePair;

    fn test_context() -> SearchContext {
        SearchContext {
            config: SearchConfig::new(),
            vars: Variables::default(),
        }
    }

    /// A greenfield candidate whose volume curve is linear in wall height.
    fn synthetic_greenfield(
        identifier: &str,
        lat: f64,
        lon: f64,
        elevation: i32,
        gl_per_metre: f64,
        vars: &Variables,
    ) -> RoughReservoir {
        let origin = get_origin(lat, lon, vars.border);
        let pour_point = geographic_to_array(GeographicCoordinate::new(lat, lon), origin);
        let mut r = RoughReservoir::greenfield(pour_point, elevation, vars);
        r.identifier = identifier.to_string();
        r.latitude = lat;
        r.longitude = lon;
        for h in &vars.dam_wall_heights {
            r.volumes.push(gl_per_metre * h);
            r.dam_volumes.push(0.05 * gl_per_metre * h);
            r.areas.push(3.0 * h);
            r.water_rocks.push(20.0);
        }
        r
    }

    #[test]
    fn test_good_pair_is_accepted_and_scored() {
        let mut ctx = test_context();
        ctx.config.grid_square = GridSquare::new(-23, 146);
        let vars = ctx.vars.clone();
        // ~500 m head over ~2 km
        let upper = synthetic_greenfield("UP", -22.5, 146.5, 700, 2.0, &vars);
        let lower = synthetic_greenfield("LOW", -22.5, 146.52, 200, 2.0, &vars);
        let test = Test { energy_capacity: 15.0, storage_time: 18 };
        let pair = check_good_pair(&upper, &lower, &test, max_fom(&test, &vars), None, &ctx)
            .unwrap()
            .expect("pair should pass all gates");
        assert_eq!(pair.head, 500);
        assert_eq!(pair.identifier, "UP & LOW");
        // invariant: required volume satisfiable by both sides
        assert!(pair.required_volume <= max_of(&upper.volumes));
        // refined slope gate held
        assert!(pair.distance * pair.distance * vars.min_slope.powi(2)
            <= (pair.head as f64 * 0.001).powi(2));
        assert!(pair.category != 'Z' || pair.fom > 0.0);
    }

    #[test]
    fn test_insufficient_volume_is_rejected() {
        let ctx = test_context();
        let vars = ctx.vars.clone();
        let upper = synthetic_greenfield("UP", -22.5, 146.5, 700, 0.001, &vars);
        let lower = synthetic_greenfield("LOW", -22.5, 146.52, 200, 2.0, &vars);
        let test = Test { energy_capacity: 150.0, storage_time: 168 };
        let pair = check_good_pair(&upper, &lower, &test, max_fom(&test, &vars), None, &ctx).unwrap();
        assert!(pair.is_none());
    }

    #[test]
    fn test_flat_pair_fails_slope_gate() {
        let ctx = test_context();
        let vars = ctx.vars.clone();
        // 100 m head over ~50 km: hopeless slope
        let upper = synthetic_greenfield("UP", -22.5, 146.5, 300, 2.0, &vars);
        let lower = synthetic_greenfield("LOW", -22.5, 147.0, 200, 2.0, &vars);
        let test = Test { energy_capacity: 2.0, storage_time: 6 };
        let pair = check_good_pair(&upper, &lower, &test, max_fom(&test, &vars), None, &ctx).unwrap();
        assert!(pair.is_none());
    }

    #[test]
    fn test_head_ratio_rejects_deep_pit_at_low_head() {
        // A pit of depth ~100 paired at ~80 m head: the head ratio
        // denominator goes negative, so no configuration is usable.
        let mut ctx = test_context();
        ctx.config.search_type = SearchType::SinglePit;
        ctx.vars.min_head = 50;
        let vars = ctx.vars.clone();
        let greenfield = synthetic_greenfield("GF", -22.5, 146.5, 80, 2.0, &vars);
        let mut pit_res = crate::reservoir::ExistingReservoir::init("PIT", -22.5, 146.52, 100, 0.0);
        pit_res.bottom_elevation = 0;
        let pit = ExistingPit {
            reservoir: pit_res,
            volumes: (0..=10)
                .map(|i| AltitudeVolumePair { altitude: i * 10, volume: i as f64 * 30.0 })
                .collect(),
        };
        let mut lower = crate::existing::existing_reservoir_to_rough_reservoir(
            &pit.reservoir,
            &vars,
        );
        lower.identifier = "PIT".to_string();
        lower.pit = true;
        lower.elevation = 0;
        let result = determine_pit_elevation_and_volume(&greenfield, &lower, 50.0, &pit, &ctx);
        assert!(result.is_none());
    }

    #[test]
    fn test_river_lower_adopts_nearest_vertex() {
        let mut ctx = test_context();
        ctx.config.grid_square = GridSquare::new(-23, 146);
        ctx.vars.use_tiled_rivers = true;
        let vars = ctx.vars.clone();
        let upper = synthetic_greenfield("UP", -22.5, 146.5, 500, 5.0, &vars);

        // a river running north-south at lon 146.52 with known elevations
        let origin = get_origin(-22.5, 146.52, vars.border);
        let mut river = RoughReservoir::brownfield(
            geographic_to_array(GeographicCoordinate::new(-22.5, 146.52), origin),
            120,
        );
        river.identifier = "RIVER".to_string();
        river.river = true;
        river.latitude = -22.5;
        river.longitude = 146.52;
        for _ in &vars.dam_wall_heights {
            river.volumes.push(1.0e6);
            river.dam_volumes.push(0.0);
            river.areas.push(1000.0);
            river.water_rocks.push(1.0e9);
        }
        let mut bound = vec![];
        let mut elevations = vec![];
        for i in 0..40 {
            let lat = -22.7 + i as f64 * 0.01;
            bound.push(geographic_to_array(
                GeographicCoordinate::new(lat, 146.52),
                origin,
            ));
            // the vertex closest to the upper (-22.5) is given a distinctive
            // elevation
            elevations.push(if (lat + 22.5).abs() < 0.005 { 123 } else { 200 });
        }
        river.shape = ReservoirShape::Brownfield {
            shape_bound: bound.clone(),
            elevations,
        };

        let index = BoundIndex::build(&river).expect("river bound should index");
        let nearest = index
            .nearest(convert_to_geographic(&upper.pour_point))
            .expect("nearest vertex");
        // vertex 20 sits at lat -22.5, the upper's latitude
        assert_eq!(nearest, 20);
        if let ReservoirShape::Brownfield { elevations, .. } = &river.shape {
            assert_eq!(elevations[nearest], 123);
        }
    }

    #[test]
    fn test_retention_keeps_cheapest_lowers() {
        let mut ctx = test_context();
        ctx.config.grid_square = GridSquare::new(-23, 146);
        ctx.vars.max_lowers_per_upper = 2;
        ctx.vars.tests = vec![Test { energy_capacity: 15.0, storage_time: 18 }];
        let vars = ctx.vars.clone();
        let upper = synthetic_greenfield("UP", -22.5, 146.5, 700, 2.0, &vars);
        // three viable lowers at slightly different distances, hence FOMs
        let lowers = vec![
            synthetic_greenfield("L1", -22.5, 146.52, 200, 2.0, &vars),
            synthetic_greenfield("L2", -22.5, 146.53, 200, 2.0, &vars),
            synthetic_greenfield("L3", -22.5, 146.54, 200, 2.0, &vars),
        ];
        let dir = std::env::temp_dir().join("phes_pairing_retention");
        std::fs::create_dir_all(&dir).unwrap();
        let mut writers = PairWriters {
            csv_file: BufWriter::new(File::create(dir.join("pairs.csv")).unwrap()),
            csv_data_file: BufWriter::new(File::create(dir.join("pairs_data.csv")).unwrap()),
        };
        let counts = pairing(&[upper], &lowers, &[], &mut writers, &ctx, true).unwrap();
        assert_eq!(counts[0], 2);
        std::fs::remove_dir_all(&dir).ok();
    }
}
