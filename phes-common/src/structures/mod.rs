// private sub-module defined in other files
mod coordinates;

// exports identifiers from private sub-modules in the current module namespace
pub use self::coordinates::{
    convert_to_geographic, find_area, find_distance, find_distance_geo, find_distance_sqd,
    find_distance_sqd_geo, find_distance_sqd_geo_coslat, find_orthogonal_nn_distance,
    geographic_to_array, geographic_to_array_res, get_origin, ArrayCoordinate,
    ArrayCoordinateWithHeight, Direction, GeographicCoordinate, GridSquare, CELL_RESOLUTION_M,
    DIRECTIONS, SECONDS_PER_DEGREE,
};
