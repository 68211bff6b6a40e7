/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/

//! Minimal KML assembly for exported reservoirs: a tinted polygon for the
//! water surface and line strings for the dam walls.

use crate::reservoir::Reservoir;
use phes_common::structures::GeographicCoordinate;

pub const KML_START: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<kml xmlns=\"http://www.opengis.net/kml/2.2\">\n\
<Document>\n\
  <Style id=\"reservoir\">\n\
    <LineStyle><color>ff0000ff</color><width>2</width></LineStyle>\n\
    <PolyStyle><color>7fff8800</color></PolyStyle>\n\
  </Style>\n\
  <Style id=\"dam\">\n\
    <LineStyle><color>ff000000</color><width>3</width></LineStyle>\n\
  </Style>\n";

pub const KML_END: &str = "</Document>\n</kml>\n";

/// Coordinate strings for one reservoir, ready to splice into placemarks.
#[derive(Clone, Debug, Default)]
pub struct ReservoirKmlCoordinates {
    pub reservoir: String,
    pub dam: Vec<String>,
}

impl ReservoirKmlCoordinates {
    /// KML `lon,lat,alt` triplets separated by spaces, closed back to the
    /// first vertex.
    pub fn coordinate_string(polygon: &[GeographicCoordinate], elevation: f64) -> String {
        let mut parts: Vec<String> = polygon
            .iter()
            .map(|p| format!("{:.6},{:.6},{:.1}", p.lon, p.lat, elevation))
            .collect();
        if let Some(first) = parts.first().cloned() {
            parts.push(first);
        }
        parts.join(" ")
    }
}

/// Placemark for the water surface at full supply level.
pub fn get_reservoir_kml(reservoir: &Reservoir, coordinates: &ReservoirKmlCoordinates) -> String {
    format!(
        "  <Placemark>\n\
         \x20   <name>{}</name>\n\
         \x20   <description>Elevation {} m, dam height {:.1} m, volume {:.1} GL, area {:.1} ha, country {}</description>\n\
         \x20   <styleUrl>#reservoir</styleUrl>\n\
         \x20   <Polygon>\n\
         \x20     <altitudeMode>absolute</altitudeMode>\n\
         \x20     <outerBoundaryIs><LinearRing><coordinates>{}</coordinates></LinearRing></outerBoundaryIs>\n\
         \x20   </Polygon>\n\
         \x20 </Placemark>\n",
        reservoir.identifier,
        reservoir.elevation,
        reservoir.dam_height,
        reservoir.volume,
        reservoir.area,
        reservoir.country,
        coordinates.reservoir
    )
}

/// Placemarks for the dam wall segments.
pub fn get_dam_kml(reservoir: &Reservoir, coordinates: &ReservoirKmlCoordinates) -> String {
    let mut out = String::new();
    for (i, dam) in coordinates.dam.iter().enumerate() {
        out.push_str(&format!(
            "  <Placemark>\n\
             \x20   <name>{} dam {}</name>\n\
             \x20   <styleUrl>#dam</styleUrl>\n\
             \x20   <LineString>\n\
             \x20     <altitudeMode>absolute</altitudeMode>\n\
             \x20     <coordinates>{}</coordinates>\n\
             \x20   </LineString>\n\
             \x20 </Placemark>\n",
            reservoir.identifier,
            i + 1,
            dam
        ));
    }
    out
}

/// A complete single-reservoir KML document.
pub fn output_kml(reservoir: &Reservoir, coordinates: &ReservoirKmlCoordinates) -> String {
    let mut out = String::from(KML_START);
    out.push_str(&get_reservoir_kml(reservoir, coordinates));
    out.push_str(&get_dam_kml(reservoir, coordinates));
    out.push_str(KML_END);
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use phes_common::structures::{ArrayCoordinate, GeographicCoordinate};

    #[test]
    fn test_coordinate_string_closes_ring() {
        let polygon = vec![
            GeographicCoordinate::new(-22.5, 146.5),
            GeographicCoordinate::new(-22.5, 146.6),
            GeographicCoordinate::new(-22.6, 146.6),
        ];
        let s = ReservoirKmlCoordinates::coordinate_string(&polygon, 450.0);
        let parts: Vec<&str> = s.split(' ').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], parts[3]);
        assert!(parts[0].starts_with("146.5"));
    }

    #[test]
    fn test_output_kml_is_well_formed_enough() {
        let origin = GeographicCoordinate::new(-22.0, 146.0);
        let mut reservoir = Reservoir::init(ArrayCoordinate::new(10, 10, origin), 450);
        reservoir.identifier = "s23_e146_RES1".to_string();
        let mut coordinates = ReservoirKmlCoordinates::default();
        coordinates.reservoir = "146.5,-22.5,450.0".to_string();
        coordinates.dam = vec!["146.6,-22.6,450.0".to_string()];
        let kml = output_kml(&reservoir, &coordinates);
        assert!(kml.starts_with("<?xml"));
        assert!(kml.contains("s23_e146_RES1"));
        assert!(kml.ends_with("</kml>\n"));
        assert_eq!(kml.matches("<Placemark>").count(), 2);
        assert_eq!(kml.matches("</Placemark>").count(), 2);
    }
}
