/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/

//! Pipeline stages for pumped-hydro energy storage site search: screening a
//! 1°×1° DEM tile for candidate reservoirs, pairing uppers with lowers,
//! selecting a conflict-free subset and materializing reservoirs for
//! export. Each stage persists its output to CSV before the next begins.

pub mod constructor;
pub mod csv;
pub mod existing;
pub mod fom;
pub mod kml;
pub mod pairing;
pub mod pretty_set;
pub mod reservoir;
pub mod screening;

use phes_common::configs::{SearchConfig, SearchContext, Variables};
use std::io::Error;

/// Builds the context every stage binary starts from: the parsed CLI
/// surface plus `variables.json` (or its defaults) from the working
/// directory.
pub fn init_context(args: &[String]) -> Result<SearchContext, Error> {
    let config = SearchConfig::from_args(args)?;
    let vars = Variables::load("variables.json")?;
    Ok(SearchContext { config, vars })
}
