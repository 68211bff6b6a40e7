/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/
use std::time::Instant;

/// Rounds half away from zero, matching the convention used when snapping
/// filled elevations and geographic coordinates to cell indices.
pub fn convert_to_int(f: f64) -> i32 {
    if f >= 0.0 {
        (f + 0.5) as i32
    } else {
        (f - 0.5) as i32
    }
}

/// Maximum of a slice of doubles; very small sentinel for empty input.
pub fn max_of(a: &[f64]) -> f64 {
    let mut amax = -1.0e20;
    for v in a {
        if *v > amax {
            amax = *v;
        }
    }
    amax
}

/// Formats a double with a fixed number of decimal places.
pub fn dtos(f: f64, nd: usize) -> String {
    format!("{:.*}", nd, f)
}

/// Energy capacities under 10 GWh keep one decimal place, larger ones are
/// rounded, matching the test-label convention in file names.
pub fn energy_capacity_to_string(energy_capacity: f64) -> String {
    if energy_capacity < 10.0 - crate::EPS {
        dtos(energy_capacity, 1)
    } else {
        convert_to_int(energy_capacity).to_string()
    }
}

/// Returns a formatted string of elapsed time, e.g.
/// `1min 34.852s`
pub fn get_formatted_elapsed_time(instant: Instant) -> String {
    let dur = instant.elapsed();
    let minutes = dur.as_secs() / 60;
    let sub_sec = dur.as_secs() % 60;
    let sub_milli = dur.subsec_millis();
    if minutes > 0 {
        return format!("{}min {}.{}s", minutes, sub_sec, sub_milli);
    }
    format!("{}.{}s", sub_sec, sub_milli)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_convert_to_int_rounds_half_away_from_zero() {
        assert_eq!(convert_to_int(1.5), 2);
        assert_eq!(convert_to_int(1.49), 1);
        assert_eq!(convert_to_int(-1.5), -2);
        assert_eq!(convert_to_int(-1.49), -1);
        assert_eq!(convert_to_int(0.0), 0);
    }

    #[test]
    fn test_energy_capacity_labels() {
        assert_eq!(energy_capacity_to_string(2.0), "2.0");
        assert_eq!(energy_capacity_to_string(150.0), "150");
    }

    #[test]
    fn test_max_of() {
        assert_eq!(max_of(&[1.0, 9.0, 3.0]), 9.0);
    }
}
