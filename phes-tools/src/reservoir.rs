/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/

//! Reservoir and pair records passed between pipeline stages.

use phes_common::configs::Variables;
use phes_common::structures::{
    convert_to_geographic, ArrayCoordinate, GeographicCoordinate, DIRECTIONS,
};

/// Shape payload distinguishing greenfield candidates (directional extrema
/// per candidate wall height) from brownfield ones (a fixed boundary,
/// possibly with per-vertex elevations for rivers).
#[derive(Clone, Debug, PartialEq)]
pub enum ReservoirShape {
    Greenfield {
        /// Eight directional extrema per candidate wall height, indexed by
        /// the direction table.
        shape_bound: Vec<[ArrayCoordinate; 8]>,
    },
    Brownfield {
        shape_bound: Vec<ArrayCoordinate>,
        /// Per-vertex nearest-boundary elevations, populated for rivers.
        elevations: Vec<i32>,
    },
}

/// A candidate impoundment surveyed by the screening stage.
#[derive(Clone, Debug, PartialEq)]
pub struct RoughReservoir {
    pub identifier: String,
    pub river: bool,
    pub ocean: bool,
    pub pit: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: i32,
    pub bottom_elevation: i32,
    pub pour_point: ArrayCoordinate,
    /// Per-dam-wall-height stored volumes (GL), monotone non-decreasing.
    pub volumes: Vec<f64>,
    pub dam_volumes: Vec<f64>,
    pub areas: Vec<f64>,
    pub water_rocks: Vec<f64>,
    pub watershed_area: f64,
    pub max_dam_height: f64,
    pub shape: ReservoirShape,
}

impl RoughReservoir {
    /// A fresh greenfield candidate at a pour point, with every directional
    /// extremum collapsed onto the pour point.
    pub fn greenfield(pour_point: ArrayCoordinate, elevation: i32, vars: &Variables) -> RoughReservoir {
        let geo = convert_to_geographic(&pour_point);
        let shape_bound = vec![[pour_point; 8]; vars.dam_wall_heights.len()];
        RoughReservoir {
            identifier: String::new(),
            river: false,
            ocean: false,
            pit: false,
            latitude: geo.lat,
            longitude: geo.lon,
            elevation,
            bottom_elevation: elevation,
            pour_point,
            volumes: vec![],
            dam_volumes: vec![],
            areas: vec![],
            water_rocks: vec![],
            watershed_area: 0.0,
            max_dam_height: vars.max_wall_height(),
            shape: ReservoirShape::Greenfield { shape_bound },
        }
    }

    /// A brownfield candidate with an empty boundary; the caller fills the
    /// shape and per-height payloads.
    pub fn brownfield(pour_point: ArrayCoordinate, elevation: i32) -> RoughReservoir {
        let geo = convert_to_geographic(&pour_point);
        RoughReservoir {
            identifier: String::new(),
            river: false,
            ocean: false,
            pit: false,
            latitude: geo.lat,
            longitude: geo.lon,
            elevation,
            bottom_elevation: elevation,
            pour_point,
            volumes: vec![],
            dam_volumes: vec![],
            areas: vec![],
            water_rocks: vec![],
            watershed_area: 0.0,
            max_dam_height: 0.0,
            shape: ReservoirShape::Brownfield {
                shape_bound: vec![],
                elevations: vec![],
            },
        }
    }

    pub fn is_brownfield(&self) -> bool {
        matches!(self.shape, ReservoirShape::Brownfield { .. })
    }

    /// Boundary cells of a brownfield candidate; empty for greenfields.
    pub fn brownfield_bound(&self) -> &[ArrayCoordinate] {
        match &self.shape {
            ReservoirShape::Brownfield { shape_bound, .. } => shape_bound,
            ReservoirShape::Greenfield { .. } => &[],
        }
    }
}

/// Tightens the per-wall-height directional extrema of a greenfield
/// candidate with a newly flooded cell. A cell contributes to every band
/// whose wall height reaches its elevation above the pour point.
pub fn update_reservoir_boundary(
    dam_shape_bounds: &mut [[ArrayCoordinate; 8]],
    point: ArrayCoordinate,
    elevation_above_pp: i32,
    dam_wall_heights: &[f64],
) {
    for (ih, dam_height) in dam_wall_heights.iter().enumerate() {
        if *dam_height >= elevation_above_pp as f64 {
            for (i, d) in DIRECTIONS.iter().enumerate() {
                if d.row * point.row + d.col * point.col
                    > d.row * dam_shape_bounds[ih][i].row + d.col * dam_shape_bounds[ih][i].col
                {
                    dam_shape_bounds[ih][i] = point;
                }
            }
        }
    }
}

/// Height-independent variant used while materializing a concrete reservoir.
pub fn update_reservoir_boundary_flat(dam_shape_bounds: &mut [ArrayCoordinate], point: ArrayCoordinate) {
    for (i, d) in DIRECTIONS.iter().enumerate() {
        if d.row * point.row + d.col * point.col
            > d.row * dam_shape_bounds[i].row + d.col * dam_shape_bounds[i].col
        {
            dam_shape_bounds[i].row = point.row;
            dam_shape_bounds[i].col = point.col;
        }
    }
}

/// An existing water body or mine pit read from the vector inputs.
#[derive(Clone, Debug)]
pub struct ExistingReservoir {
    pub identifier: String,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: i32,
    pub bottom_elevation: i32,
    pub volume: f64,
    pub area: f64,
    pub river: bool,
    pub polygon: Vec<GeographicCoordinate>,
}

impl ExistingReservoir {
    pub fn init(identifier: &str, latitude: f64, longitude: f64, elevation: i32, volume: f64) -> ExistingReservoir {
        ExistingReservoir {
            identifier: identifier.to_string(),
            latitude,
            longitude,
            elevation,
            bottom_elevation: elevation,
            volume,
            area: 0.0,
            river: false,
            polygon: vec![],
        }
    }
}

/// A sampled point on a pit's depth-volume curve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AltitudeVolumePair {
    pub altitude: i32,
    pub volume: f64,
}

/// An existing mine pit: the reservoir header plus its sorted
/// altitude-volume curve.
#[derive(Clone, Debug)]
pub struct ExistingPit {
    pub reservoir: ExistingReservoir,
    pub volumes: Vec<AltitudeVolumePair>,
}

/// A concrete impoundment with a committed dam height, as carried inside a
/// pair record.
#[derive(Clone, Debug)]
pub struct Reservoir {
    pub identifier: String,
    pub brownfield: bool,
    pub river: bool,
    pub pit: bool,
    pub ocean: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: i32,
    pub pour_point: ArrayCoordinate,
    pub volume: f64,
    pub dam_volume: f64,
    pub dam_length: f64,
    pub area: f64,
    pub water_rock: f64,
    pub watershed_area: f64,
    pub average_water_depth: f64,
    pub dam_height: f64,
    pub max_dam_height: f64,
    pub country: String,
    pub shape_bound: Vec<ArrayCoordinate>,
}

impl Reservoir {
    pub fn init(pour_point: ArrayCoordinate, elevation: i32) -> Reservoir {
        let geo = convert_to_geographic(&pour_point);
        Reservoir {
            identifier: String::new(),
            brownfield: false,
            river: false,
            pit: false,
            ocean: false,
            latitude: geo.lat,
            longitude: geo.lon,
            elevation,
            pour_point,
            volume: 0.0,
            dam_volume: 0.0,
            dam_length: 0.0,
            area: 0.0,
            water_rock: 0.0,
            watershed_area: 0.0,
            average_water_depth: 0.0,
            dam_height: 0.0,
            max_dam_height: 0.0,
            country: String::new(),
            shape_bound: vec![pour_point; DIRECTIONS.len()],
        }
    }
}

/// An (upper, lower) reservoir pairing with its engineering estimates and
/// figure-of-merit cost.
#[derive(Clone, Debug)]
pub struct Pair {
    pub upper: Reservoir,
    pub lower: Reservoir,
    pub identifier: String,
    pub head: i32,
    pub distance: f64,
    pub pp_distance: f64,
    pub slope: f64,
    pub required_volume: f64,
    pub water_rock: f64,
    pub fom: f64,
    pub category: char,
    pub energy_capacity: f64,
    pub storage_time: i32,
    pub country: String,
}

#[cfg(test)]
mod test {
    use super::*;
    use phes_common::configs::Variables;
    use phes_common::structures::{ArrayCoordinate, GeographicCoordinate};

    fn pp() -> ArrayCoordinate {
        ArrayCoordinate::new(100, 100, GeographicCoordinate::new(-22.0, 146.0))
    }

    #[test]
    fn test_greenfield_bounds_start_at_pour_point() {
        let vars = Variables::default();
        let r = RoughReservoir::greenfield(pp(), 250, &vars);
        match &r.shape {
            ReservoirShape::Greenfield { shape_bound } => {
                assert_eq!(shape_bound.len(), vars.dam_wall_heights.len());
                assert!(shape_bound.iter().all(|b| b.iter().all(|c| *c == pp())));
            }
            _ => panic!("expected greenfield shape"),
        }
        assert_eq!(r.max_dam_height, vars.max_wall_height());
        assert!(!r.is_brownfield());
    }

    #[test]
    fn test_update_boundary_tracks_directional_extrema() {
        let vars = Variables::default();
        let mut bounds = vec![[pp(); 8]; vars.dam_wall_heights.len()];
        // a cell to the east at 5 m above the pour point
        let east = ArrayCoordinate::new(100, 110, pp().origin);
        update_reservoir_boundary(&mut bounds, east, 5, &vars.dam_wall_heights);
        // east extremum (direction 0) moved for every band
        for band in bounds.iter() {
            assert_eq!(band[0], east);
            // west extremum (direction 4) unchanged
            assert_eq!(band[4], pp());
        }
        // a higher cell only contributes to tall-wall bands
        let mut bounds = vec![[pp(); 8]; vars.dam_wall_heights.len()];
        let far_east = ArrayCoordinate::new(100, 130, pp().origin);
        update_reservoir_boundary(&mut bounds, far_east, 25, &vars.dam_wall_heights);
        assert_eq!(bounds[0][0], pp()); // 10 m band untouched
        assert_eq!(bounds[2][0], far_east); // 30 m band tracks it
    }

    #[test]
    fn test_reservoir_init_shape_bound() {
        let r = Reservoir::init(pp(), 250);
        assert_eq!(r.shape_bound.len(), 8);
        assert_eq!(r.elevation, 250);
        assert!((r.latitude - (-22.0 - 100.5 / 3600.0)).abs() < 1e-9);
    }
}
