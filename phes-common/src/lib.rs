/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/
pub mod algorithms;
pub mod configs;
pub mod structures;
pub mod utils;

/// Epsilon used for the depression-fill tilt and for sea-level comparisons.
/// Small enough that filled elevations round back to the integer DEM almost
/// everywhere, strictly positive so flats drain.
pub const EPS: f64 = 1.0e-6;

/// Large finite sentinel used for unbounded volumes and failed interpolation.
/// Kept finite so it survives CSV round-trips and `INF / 10` comparisons.
pub const INF: f64 = 1.0e18;
