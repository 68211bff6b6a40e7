/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/

//! The figure-of-merit cost model: dam, powerhouse, tunnel and (for ocean
//! lowers) lining and marine-outlet terms, plus category bracketing.

use crate::reservoir::Pair;
use phes_common::configs::{Test, Variables};

fn calculate_power_house_cost(power: f64, head: f64, vars: &Variables) -> f64 {
    vars.powerhouse_coeff * power.min(800.0).powf(vars.power_exp) / head.powf(vars.head_exp)
}

fn calculate_tunnel_cost(power: f64, head: f64, separation: f64, vars: &Variables) -> f64 {
    ((vars.power_slope_factor * power.min(800.0) + vars.slope_int)
        * head.powf(vars.head_coeff)
        * separation
        * 1000.0)
        + (vars.power_offset * power.min(800.0) + vars.tunnel_fixed)
}

/// Computes the pair's FOM (power cost plus storage-time-weighted energy
/// cost) and assigns its cost-bracket letter. Heads above 800 m split the
/// powerhouse in two; ocean lowers add lining and marine-outlet terms.
pub fn set_fom(pair: &mut Pair, vars: &Variables) {
    let separation = pair.distance;
    let head = pair.head as f64;
    let power = 1000.0 * pair.energy_capacity / pair.storage_time as f64;
    let mut energy_cost = vars.dam_cost
        / (pair.water_rock
            * vars.generation_efficiency
            * vars.usable_volume
            * vars.water_density
            * vars.gravity
            * head)
        * vars.j_gwh_conversion
        / vars.cubic_metres_gl_conversion;
    let power_cost;
    if head > 800.0 {
        let power_house_cost = 2.0 * calculate_power_house_cost(power / 2.0, head / 2.0, vars);
        let tunnel_cost = 2.0 * calculate_tunnel_cost(power / 2.0, head / 2.0, separation, vars);
        power_cost = 0.001 * (power_house_cost + tunnel_cost) / power.min(800.0);
    } else {
        let mut power_house_cost = calculate_power_house_cost(power, head, vars);
        let tunnel_cost = calculate_tunnel_cost(power, head, separation, vars);
        if pair.lower.ocean {
            let total_lining_cost = vars.lining_cost * pair.upper.area * vars.meters_per_hectare;
            power_house_cost *= vars.sea_power_scaling;
            let marine_outlet_cost =
                vars.ref_marine_cost * power * vars.ref_head / (vars.ref_power * head);
            power_cost = 0.001
                * ((power_house_cost + tunnel_cost) / power.min(800.0) + marine_outlet_cost / power);
            energy_cost += 0.000001 * total_lining_cost / pair.energy_capacity;
        } else {
            power_cost = 0.001 * (power_house_cost + tunnel_cost) / power.min(800.0);
        }
    }

    pair.fom = power_cost + energy_cost * pair.storage_time as f64;
    pair.category = 'Z';
    let mut i = 0;
    while i < vars.category_cutoffs.len()
        && pair.fom
            <= vars.category_cutoffs[i].power_cost
                + pair.storage_time as f64 * vars.category_cutoffs[i].storage_cost
    {
        pair.category = vars.category_cutoffs[i].category;
        i += 1;
    }
}

/// The loosest FOM a pair may carry and still be written, padded by the
/// configured tolerance.
pub fn max_fom(test: &Test, vars: &Variables) -> f64 {
    (vars.category_cutoffs[0].storage_cost * test.storage_time as f64
        + vars.category_cutoffs[0].power_cost)
        * (1.0 + vars.tolerance_on_fom)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::reservoir::{Pair, Reservoir};
    use phes_common::configs::Variables;
    use phes_common::structures::{ArrayCoordinate, GeographicCoordinate};

    fn test_pair(head: i32, water_rock: f64) -> Pair {
        let origin = GeographicCoordinate::new(-22.0, 146.0);
        let reservoir = Reservoir::init(ArrayCoordinate::new(0, 0, origin), 0);
        Pair {
            upper: reservoir.clone(),
            lower: reservoir,
            identifier: String::new(),
            head,
            distance: 2.0,
            pp_distance: 2.0,
            slope: 0.0,
            required_volume: 100.0,
            water_rock,
            fom: 0.0,
            category: 'Z',
            energy_capacity: 150.0,
            storage_time: 18,
            country: String::new(),
        }
    }

    #[test]
    fn test_higher_water_rock_is_cheaper() {
        let vars = Variables::default();
        let mut cheap = test_pair(500, 20.0);
        let mut dear = test_pair(500, 3.0);
        set_fom(&mut cheap, &vars);
        set_fom(&mut dear, &vars);
        assert!(cheap.fom < dear.fom);
    }

    #[test]
    fn test_higher_head_is_cheaper() {
        let vars = Variables::default();
        let mut high = test_pair(700, 10.0);
        let mut low = test_pair(150, 10.0);
        set_fom(&mut high, &vars);
        set_fom(&mut low, &vars);
        assert!(high.fom < low.fom);
    }

    #[test]
    fn test_category_ordering() {
        let vars = Variables::default();
        let mut pair = test_pair(700, 30.0);
        set_fom(&mut pair, &vars);
        // a deep, cheap pair lands in a better bracket than a shallow, dear one
        let mut worse = test_pair(120, 2.0);
        set_fom(&mut worse, &vars);
        assert!(pair.category <= worse.category);
    }

    #[test]
    fn test_ocean_lower_costs_more() {
        let vars = Variables::default();
        let mut plain = test_pair(500, 10.0);
        let mut ocean = test_pair(500, 10.0);
        ocean.lower.ocean = true;
        ocean.upper.area = 100.0;
        set_fom(&mut plain, &vars);
        set_fom(&mut ocean, &vars);
        assert!(ocean.fom > plain.fom);
    }

    #[test]
    fn test_max_fom_scales_with_storage_time(){
        let vars = Variables::default();
        let short = max_fom(&phes_common::configs::Test { energy_capacity: 5.0, storage_time: 6 }, &vars);
        let long = max_fom(&phes_common::configs::Test { energy_capacity: 5.0, storage_time: 168 }, &vars);
        assert!(long > short);
    }
}
