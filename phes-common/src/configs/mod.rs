/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/
use crate::structures::GridSquare;
use crate::utils::energy_capacity_to_string;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Error, ErrorKind};

/// One (energy capacity, storage time) requirement that every candidate pair
/// is classified against.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Test {
    pub energy_capacity: f64,
    pub storage_time: i32,
}

impl Test {
    /// Label used in file names and log lines, e.g. `150GWh_18h`.
    pub fn label(&self) -> String {
        format!(
            "{}GWh_{}h",
            energy_capacity_to_string(self.energy_capacity),
            self.storage_time
        )
    }
}

/// A cost bracket rule. A pair earns `category` while
/// `FOM ≤ power_cost + storage_time · storage_cost`; rules are ordered from
/// loosest to tightest so a linear pass settles on the best letter.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct CategoryCutoff {
    pub storage_cost: f64,
    pub power_cost: f64,
    pub category: char,
}

/// Process-wide tunables, backed by a `variables.json` file. Every field has
/// a default so a missing file or a sparse file is usable; pass the structure
/// by reference into each stage rather than holding global state.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Variables {
    /// Root of the input/output tree. Empty for the working directory,
    /// otherwise must end with a path separator.
    pub file_storage_location: String,
    /// Padding width in cells stitched around the centre tile; equal to the
    /// maximum reservoir extent at the tallest dam wall.
    pub border: isize,
    /// Candidate dam-wall heights in metres, monotonically increasing.
    pub dam_wall_heights: Vec<f64>,
    /// Minimum upstream cell count for a cell to qualify as a stream.
    pub stream_threshold: i32,
    /// A pour point is emitted where a stream crosses a multiple of this
    /// elevation, in metres.
    pub contour_height: i32,
    pub freeboard: f64,
    pub cwidth: f64,
    pub dambatter: f64,
    pub min_reservoir_volume: f64,
    pub min_reservoir_water_rock: f64,
    pub min_max_dam_height: f64,
    pub min_head: i32,
    pub max_head: i32,
    pub min_pp_slope: f64,
    pub min_slope: f64,
    pub min_pair_water_rock: f64,
    pub max_lowers_per_upper: usize,
    pub tolerance_on_fom: f64,
    pub water_density: f64,
    pub gravity: f64,
    pub generation_efficiency: f64,
    pub usable_volume: f64,
    pub j_gwh_conversion: f64,
    pub cubic_metres_gl_conversion: f64,
    pub dam_cost: f64,
    pub powerhouse_coeff: f64,
    pub power_exp: f64,
    pub head_exp: f64,
    pub power_slope_factor: f64,
    pub slope_int: f64,
    pub head_coeff: f64,
    pub power_offset: f64,
    pub tunnel_fixed: f64,
    pub lining_cost: f64,
    pub sea_power_scaling: f64,
    pub ref_marine_cost: f64,
    pub ref_power: f64,
    pub ref_head: f64,
    pub meters_per_hectare: f64,
    pub category_cutoffs: Vec<CategoryCutoff>,
    pub tests: Vec<Test>,
    /// Relative tolerance when binary-searching a wall height to a volume.
    pub volume_accuracy: f64,
    pub minimum_dam_height: f64,
    pub max_head_variability: f64,
    pub pit_height_resolution: i32,
    pub num_altitude_volume_pairs: usize,
    pub max_bluefield_surface_area_ratio: f64,
    pub use_tiled_rivers: bool,
    pub use_tiled_bluefield: bool,
    pub existing_reservoirs_csv: String,
    pub filter_filenames: Vec<String>,
    pub debug_output: bool,
}

impl Default for Variables {
    fn default() -> Variables {
        Variables {
            file_storage_location: String::new(),
            border: 3600,
            dam_wall_heights: (1..=30).map(|i| (i * 10) as f64).collect(),
            stream_threshold: 110,
            contour_height: 10,
            freeboard: 1.5,
            cwidth: 10.0,
            dambatter: 3.0,
            min_reservoir_volume: 1.0,
            min_reservoir_water_rock: 3.0,
            min_max_dam_height: 10.0,
            min_head: 100,
            max_head: 1600,
            min_pp_slope: 0.05,
            min_slope: 0.10,
            min_pair_water_rock: 1.5,
            max_lowers_per_upper: 5,
            tolerance_on_fom: 0.2,
            water_density: 1000.0,
            gravity: 9.8,
            generation_efficiency: 0.9,
            usable_volume: 0.85,
            j_gwh_conversion: 3.6e12,
            cubic_metres_gl_conversion: 1.0e6,
            dam_cost: 168.0,
            powerhouse_coeff: 63_500_000.0,
            power_exp: 0.75,
            head_exp: 0.5,
            power_slope_factor: 1730.0,
            slope_int: 1_400_000.0,
            head_coeff: -0.5,
            power_offset: 71_000.0,
            tunnel_fixed: 17_000_000.0,
            lining_cost: 20.0,
            sea_power_scaling: 1.15,
            ref_marine_cost: 3_100_000.0,
            ref_power: 225.0,
            ref_head: 65.0,
            meters_per_hectare: 10_000.0,
            category_cutoffs: vec![
                CategoryCutoff { storage_cost: 42.0, power_cost: 4200.0, category: 'E' },
                CategoryCutoff { storage_cost: 28.0, power_cost: 2800.0, category: 'D' },
                CategoryCutoff { storage_cost: 21.0, power_cost: 2100.0, category: 'C' },
                CategoryCutoff { storage_cost: 14.0, power_cost: 1400.0, category: 'B' },
                CategoryCutoff { storage_cost: 7.0, power_cost: 700.0, category: 'A' },
            ],
            tests: vec![
                Test { energy_capacity: 2.0, storage_time: 6 },
                Test { energy_capacity: 5.0, storage_time: 18 },
                Test { energy_capacity: 15.0, storage_time: 18 },
                Test { energy_capacity: 50.0, storage_time: 50 },
                Test { energy_capacity: 150.0, storage_time: 168 },
            ],
            volume_accuracy: 0.05,
            minimum_dam_height: 5.0,
            max_head_variability: 0.35,
            pit_height_resolution: 10,
            num_altitude_volume_pairs: 10,
            max_bluefield_surface_area_ratio: 50.0,
            use_tiled_rivers: false,
            use_tiled_bluefield: false,
            existing_reservoirs_csv: "existing_reservoirs.csv".to_string(),
            filter_filenames: vec![],
            debug_output: false,
        }
    }
}

impl Variables {
    /// Loads settings from a JSON file, falling back to defaults when the
    /// file is absent. A present-but-malformed file is a hard error.
    pub fn load(file_path: &str) -> Result<Variables, Error> {
        match fs::read_to_string(file_path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                Error::new(
                    ErrorKind::InvalidData,
                    format!("Failed to parse {}: {}", file_path, e),
                )
            }),
            Err(_) => Ok(Variables::default()),
        }
    }

    /// Tallest candidate dam wall in metres.
    pub fn max_wall_height(&self) -> f64 {
        self.dam_wall_heights.last().copied().unwrap_or(0.0)
    }

    /// Embankment volume in GL for a dam of the given height (m) and
    /// length (m): V = (h+freeboard)·(cwidth + dambatter·(h+freeboard))·L/1e6.
    pub fn dam_volume(&self, height: f64, length: f64) -> f64 {
        ((height + self.freeboard) * (self.cwidth + self.dambatter * (height + self.freeboard))
            / 1_000_000.0)
            * length
    }

    /// Water volume in GL required to store `energy` GWh at the given head.
    pub fn required_volume(&self, energy: f64, head: f64) -> f64 {
        (energy * self.j_gwh_conversion)
            / (head
                * self.water_density
                * self.gravity
                * self.generation_efficiency
                * self.usable_volume
                * self.cubic_metres_gl_conversion)
    }
}

/// Which of the six search modes a run is executing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchType {
    Greenfield,
    Ocean,
    SingleExisting,
    BulkExisting,
    BulkPit,
    SinglePit,
}

impl SearchType {
    pub fn existing(&self) -> bool {
        matches!(
            self,
            SearchType::SingleExisting
                | SearchType::BulkExisting
                | SearchType::BulkPit
                | SearchType::SinglePit
        )
    }

    pub fn not_existing(&self) -> bool {
        matches!(self, SearchType::Greenfield | SearchType::Ocean)
    }

    pub fn grid_cell(&self) -> bool {
        matches!(
            self,
            SearchType::Greenfield
                | SearchType::Ocean
                | SearchType::BulkExisting
                | SearchType::BulkPit
        )
    }

    pub fn single(&self) -> bool {
        matches!(self, SearchType::SingleExisting | SearchType::SinglePit)
    }

    pub fn pit(&self) -> bool {
        matches!(self, SearchType::BulkPit | SearchType::SinglePit)
    }

    /// Filename prefix.
    pub fn prefix(&self) -> &'static str {
        match self {
            SearchType::Ocean => "ocean_",
            SearchType::SinglePit => "single_pit_",
            SearchType::BulkPit => "pit_",
            SearchType::BulkExisting => "existing_",
            _ => "",
        }
    }

    /// Used when reading the 8 neighbouring cells in pairing (an ocean
    /// search reads ocean lowers; all other cases regular neighbours).
    pub fn lowers_prefix(&self) -> &'static str {
        match self {
            SearchType::Ocean => "ocean_",
            SearchType::BulkExisting => "existing_",
            _ => "",
        }
    }
}

/// Println-based logger with two levels. `error` always prints; `debug` and
/// `warning` only under debug.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Logger {
    Debug,
    Error,
}

impl Logger {
    /// A trailing `1` CLI argument enables debug output.
    pub fn from_flag(flag: &str) -> Logger {
        if flag.trim().parse::<i32>().unwrap_or(0) != 0 {
            Logger::Debug
        } else {
            Logger::Error
        }
    }

    pub fn output_debug(&self) -> bool {
        *self == Logger::Debug
    }

    pub fn error(&self, message: &str) {
        println!("{}", message);
    }

    pub fn debug(&self, message: &str) {
        if self.output_debug() {
            println!("{}", message);
        }
    }

    pub fn warning(&self, message: &str) {
        if self.output_debug() {
            println!("{}", message);
        }
    }
}

/// Formats a reservoir name for use in file names.
pub fn format_for_filename(s: &str) -> String {
    s.replace(' ', "_").replace('"', "")
}

/// Parsed command-line surface shared by every stage binary. Accepts either
/// `<lon> <lat> [debug]` or a mode prefix (`ocean`, `bulk_existing`,
/// `bulk_pit`, `pit <name>`, `reservoir <name>`).
#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub search_type: SearchType,
    pub grid_square: GridSquare,
    pub name: String,
    pub logger: Logger,
}

impl SearchConfig {
    pub fn new() -> SearchConfig {
        SearchConfig {
            search_type: SearchType::Greenfield,
            grid_square: GridSquare::new(0, 0),
            name: String::new(),
            logger: Logger::Error,
        }
    }

    pub fn from_args(args: &[String]) -> Result<SearchConfig, Error> {
        let missing = || Error::new(ErrorKind::InvalidInput, "Not enough arguments.");
        let mut config = SearchConfig::new();
        let mut i = 1;
        let mut arg1 = args.get(i).ok_or_else(missing)?.clone();

        if arg1 == "ocean" {
            config.search_type = SearchType::Ocean;
            i += 1;
            arg1 = args.get(i).ok_or_else(missing)?.clone();
        }
        if arg1 == "bulk_existing" {
            config.search_type = SearchType::BulkExisting;
            i += 1;
            arg1 = args.get(i).ok_or_else(missing)?.clone();
        } else if arg1 == "bulk_pit" {
            config.search_type = SearchType::BulkPit;
            i += 1;
            arg1 = args.get(i).ok_or_else(missing)?.clone();
        }

        if arg1 == "pit" || arg1 == "reservoir" {
            config.search_type = if arg1 == "pit" {
                SearchType::SinglePit
            } else {
                SearchType::SingleExisting
            };
            i += 1;
            config.name = args.get(i).ok_or_else(missing)?.clone();
            if let Some(flag) = args.get(i + 1) {
                config.logger = Logger::from_flag(flag);
            }
        } else {
            match arg1.parse::<i32>() {
                Ok(lon) => {
                    let lat = args
                        .get(i + 1)
                        .ok_or_else(missing)?
                        .parse::<i32>()
                        .map_err(|_| Error::new(ErrorKind::InvalidInput, "Bad latitude."))?;
                    config.grid_square = GridSquare::new(lat, lon);
                    if let Some(flag) = args.get(i + 2) {
                        config.logger = Logger::from_flag(flag);
                    }
                }
                Err(_) => {
                    config.search_type = SearchType::SingleExisting;
                    config.name = arg1;
                    if let Some(flag) = args.get(i + 1) {
                        config.logger = Logger::from_flag(flag);
                    }
                }
            }
        }
        Ok(config)
    }

    /// Stem used for this run's output files.
    pub fn filename(&self) -> String {
        if self.search_type.grid_cell() {
            format!("{}{}", self.search_type.prefix(), self.grid_square)
        } else {
            format!("{}{}", self.search_type.prefix(), format_for_filename(&self.name))
        }
    }
}

/// Everything a stage needs to run: the parsed CLI surface and the loaded
/// tunables. Built once in each binary's `main` and passed by reference.
#[derive(Clone, Debug)]
pub struct SearchContext {
    pub config: SearchConfig,
    pub vars: Variables,
}

#[cfg(test)]
mod test {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        let mut v = vec!["prog".to_string()];
        v.extend(list.iter().map(|s| s.to_string()));
        v
    }

    #[test]
    fn test_grid_cell_args() {
        let c = SearchConfig::from_args(&args(&["146", "-23"])).unwrap();
        assert_eq!(c.search_type, SearchType::Greenfield);
        assert_eq!(c.grid_square, GridSquare::new(-23, 146));
        assert_eq!(c.logger, Logger::Error);
        assert_eq!(c.filename(), "s23_e146");
    }

    #[test]
    fn test_debug_flag() {
        let c = SearchConfig::from_args(&args(&["146", "-23", "1"])).unwrap();
        assert!(c.logger.output_debug());
    }

    #[test]
    fn test_ocean_prefix() {
        let c = SearchConfig::from_args(&args(&["ocean", "146", "-23"])).unwrap();
        assert_eq!(c.search_type, SearchType::Ocean);
        assert_eq!(c.filename(), "ocean_s23_e146");
    }

    #[test]
    fn test_single_pit() {
        let c = SearchConfig::from_args(&args(&["pit", "Old Quarry"])).unwrap();
        assert_eq!(c.search_type, SearchType::SinglePit);
        assert_eq!(c.filename(), "single_pit_Old_Quarry");
    }

    #[test]
    fn test_bare_name_is_single_existing() {
        let c = SearchConfig::from_args(&args(&["Lake Echo"])).unwrap();
        assert_eq!(c.search_type, SearchType::SingleExisting);
        assert_eq!(c.name, "Lake Echo");
    }

    #[test]
    fn test_default_variables() {
        let v = Variables::default();
        assert_eq!(v.max_wall_height(), 300.0);
        assert_eq!(v.dam_wall_heights.len(), 30);
        // 1 m³ of water at 1 m head holds ~9.8 J usable before losses
        let vol = v.required_volume(150.0, 500.0);
        assert!(vol > 100.0 && vol < 200.0);
    }

    #[test]
    fn test_test_labels() {
        assert_eq!(Test { energy_capacity: 150.0, storage_time: 18 }.label(), "150GWh_18h");
        assert_eq!(Test { energy_capacity: 2.0, storage_time: 6 }.label(), "2.0GWh_6h");
    }
}
