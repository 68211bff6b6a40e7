/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/

//! The pretty-set stage: walks each Test's pairs in ascending FOM order,
//! re-grows their reservoirs on the DEM and keeps only those whose
//! footprints do not collide with anything already accepted.

use crate::constructor::model_reservoir;
use crate::csv::{read_rough_pair_data, write_rough_pair_data, write_rough_pair_data_header};
use crate::existing::get_existing_reservoir;
use crate::reservoir::Pair;
use phes_common::configs::SearchContext;
use phes_common::structures::ArrayCoordinate;
use phes_common::utils::get_formatted_elapsed_time;
use phes_common::INF;
use phes_raster::dem::BigModel;
use phes_raster::{polygon_to_raster, Grid};
use std::collections::HashSet;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Error};
use std::time::Instant;

/// Accepts or rejects one pair against the already-committed footprints.
/// On acceptance the pair's cells are marked in `seen`.
pub fn check_pair(
    pair: &mut Pair,
    seen: &mut Grid<bool>,
    big_model: &BigModel,
    used_with_river: &mut HashSet<String>,
    ctx: &SearchContext,
) -> Result<bool, Error> {
    // a river lower retires its upper from further river pairings
    if pair.lower.river && used_with_river.contains(&pair.upper.identifier) {
        return Ok(false);
    }
    if pair.lower.river && !ctx.vars.use_tiled_rivers {
        return Ok(false);
    }

    let mut used_points: Vec<ArrayCoordinate> = vec![];
    if !pair.upper.brownfield
        && !model_reservoir(
            &mut pair.upper,
            None,
            Some(&*seen),
            Some(&mut used_points),
            big_model,
            &[],
            ctx,
        )?
    {
        return Ok(false);
    }
    if !pair.lower.brownfield
        && !pair.lower.ocean
        && !model_reservoir(
            &mut pair.lower,
            None,
            Some(&*seen),
            Some(&mut used_points),
            big_model,
            &[],
            ctx,
        )?
    {
        return Ok(false);
    }

    // a greenfield paired against an effectively unbounded brownfield must
    // not dwarf it in surface area
    if pair.upper.brownfield && pair.upper.volume > INF / 10.0 && !pair.lower.brownfield {
        if pair.lower.area > ctx.vars.max_bluefield_surface_area_ratio * pair.upper.area {
            return Ok(false);
        }
    }
    if pair.lower.brownfield && pair.lower.volume > INF / 10.0 && !pair.upper.brownfield {
        if pair.upper.area > ctx.vars.max_bluefield_surface_area_ratio * pair.lower.area {
            return Ok(false);
        }
    }

    for point in &used_points {
        seen.set_value(point.row, point.col, true);
    }
    if pair.lower.river {
        used_with_river.insert(pair.upper.identifier.clone());
    }
    Ok(true)
}

/// The pretty-set stage driver.
pub fn run_pretty_set(ctx: &mut SearchContext) -> Result<(), Error> {
    let t = Instant::now();
    println!("Pretty set started for {}", ctx.config.filename());
    let loc = ctx.vars.file_storage_location.clone();

    let mut pairs = read_rough_pair_data(
        &format!(
            "{}processing_files/pairs/{}_rough_pairs_data.csv",
            loc,
            ctx.config.filename()
        ),
        &ctx.vars,
    )?;

    create_dir_all(format!("{}processing_files/pretty_set_pairs", loc))?;
    let mut csv_data_file = BufWriter::new(File::create(format!(
        "{}processing_files/pretty_set_pairs/{}_rough_pretty_set_pairs_data.csv",
        loc,
        ctx.config.filename()
    ))?);
    write_rough_pair_data_header(&mut csv_data_file)?;

    let total_pairs: usize = pairs.iter().map(|p| p.len()).sum();
    if total_pairs == 0 {
        println!("No pairs found");
        println!(
            "Pretty set finished for {}. Runtime: {}",
            ctx.config.filename(),
            get_formatted_elapsed_time(t)
        );
        return Ok(());
    }

    let single_reservoir = if ctx.config.search_type.single() {
        let reservoir = get_existing_reservoir(&ctx.config.name, ctx)?;
        ctx.config.grid_square = crate::existing::get_square_coordinate(&reservoir);
        Some(reservoir)
    } else {
        None
    };

    let big_model = BigModel::init(
        ctx.config.grid_square,
        ctx.vars.border,
        &loc,
        &ctx.config.logger,
    )?;
    let mut used_with_river: HashSet<String> = HashSet::new();

    for itest in 0..ctx.vars.tests.len() {
        // stable sort: FOM ties keep file order
        pairs[itest].sort_by(|a, b| {
            a.fom.partial_cmp(&b.fom).unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut seen: Grid<bool> =
            Grid::new(big_model.dem.rows(), big_model.dem.columns(), false, false)?;
        seen.copy_georef_from(&big_model.dem);
        if let Some(reservoir) = &single_reservoir {
            polygon_to_raster(&reservoir.polygon, &mut seen);
        }

        let mut count = 0;
        for j in 0..pairs[itest].len() {
            let mut pair = pairs[itest][j].clone();
            if check_pair(&mut pair, &mut seen, &big_model, &mut used_with_river, ctx)? {
                write_rough_pair_data(&mut csv_data_file, &pair)?;
                count += 1;
            }
        }
        ctx.config.logger.debug(&format!(
            "{} {}GWh {}h Pairs",
            count,
            ctx.vars.tests[itest].energy_capacity,
            ctx.vars.tests[itest].storage_time
        ));
    }
    println!(
        "Pretty set finished for {}. Runtime: {}",
        ctx.config.filename(),
        get_formatted_elapsed_time(t)
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constructor::fixtures::bowl_big_model;
    use crate::reservoir::{Pair, Reservoir};
    use phes_common::configs::{SearchConfig, SearchContext, Variables};
    use phes_common::structures::GridSquare;

    fn test_context() -> SearchContext {
        let mut vars = Variables::default();
        vars.border = 0;
        vars.minimum_dam_height = 2.0;
        let mut config = SearchConfig::new();
        config.grid_square = GridSquare::new(-23, 146);
        SearchContext { config, vars }
    }

    fn bowl_pair(fom: f64, pp: phes_common::structures::ArrayCoordinate) -> Pair {
        let mut upper = Reservoir::init(pp, 100);
        upper.identifier = format!("UP{}", fom);
        upper.max_dam_height = 48.0;
        upper.water_rock = 10.0;
        upper.volume = 0.02;
        // the lower side is a brownfield lake, so only the upper is re-grown
        let mut lower = Reservoir::init(pp, 0);
        lower.identifier = "LAKE".to_string();
        lower.brownfield = true;
        Pair {
            identifier: format!("{} & {}", upper.identifier, lower.identifier),
            upper,
            lower,
            head: 100,
            distance: 1.0,
            pp_distance: 1.0,
            slope: 0.1,
            required_volume: 0.02,
            water_rock: 10.0,
            fom,
            category: 'B',
            energy_capacity: 15.0,
            storage_time: 18,
            country: String::new(),
        }
    }

    #[test]
    fn test_overlapping_pairs_keep_cheapest() {
        let ctx = test_context();
        let (big, pp) = bowl_big_model(41);
        let mut seen: Grid<bool> = Grid::new(41, 41, false, false).unwrap();
        seen.copy_georef_from(&big.dem);
        let mut used_with_river = HashSet::new();

        // two pairs re-growing the same bowl: FOM 100 wins, FOM 110 collides
        let mut cheap = bowl_pair(100.0, pp);
        let mut dear = bowl_pair(110.0, pp);
        assert!(check_pair(&mut cheap, &mut seen, &big, &mut used_with_river, &ctx).unwrap());
        assert!(!check_pair(&mut dear, &mut seen, &big, &mut used_with_river, &ctx).unwrap());
    }

    #[test]
    fn test_river_lower_retires_upper() {
        let ctx = test_context();
        let (big, pp) = bowl_big_model(41);
        let mut seen: Grid<bool> = Grid::new(41, 41, false, false).unwrap();
        seen.copy_georef_from(&big.dem);
        let mut used_with_river = HashSet::new();
        used_with_river.insert("UP100".to_string());

        let mut pair = bowl_pair(100.0, pp);
        pair.lower.river = true;
        assert!(!check_pair(&mut pair, &mut seen, &big, &mut used_with_river, &ctx).unwrap());
    }
}
