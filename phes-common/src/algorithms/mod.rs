// private sub-module defined in other files
mod interpolate;
mod poly_ops;

// exports identifiers from private sub-modules in the current module namespace
pub use self::interpolate::linear_interpolate;
pub use self::poly_ops::{
    compress_poly, corner_cut_poly, find_polygon_intersections, geographic_polygon_area,
    geographic_polygon_area_signed, point_in_polygons, EARTH_RADIUS_KM, SQ_KM_TO_HA,
};
