/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/
use crate::Grid;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use phes_common::structures::GeographicCoordinate;
use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::{Error, ErrorKind};

const MAGIC: &[u8; 8] = b"PHESGRD1";

/// Cell types storable in the binary grid format. The single-byte code is
/// part of the wire format.
pub trait GridDataType: Copy {
    const CODE: u8;
    fn write_cell<W: Write>(self, writer: &mut W) -> Result<(), Error>;
    fn read_cell<R: Read>(reader: &mut R) -> Result<Self, Error>;
}

impl GridDataType for i8 {
    const CODE: u8 = 1;
    fn write_cell<W: Write>(self, writer: &mut W) -> Result<(), Error> {
        writer.write_i8(self)
    }
    fn read_cell<R: Read>(reader: &mut R) -> Result<i8, Error> {
        reader.read_i8()
    }
}

impl GridDataType for i16 {
    const CODE: u8 = 2;
    fn write_cell<W: Write>(self, writer: &mut W) -> Result<(), Error> {
        writer.write_i16::<LittleEndian>(self)
    }
    fn read_cell<R: Read>(reader: &mut R) -> Result<i16, Error> {
        reader.read_i16::<LittleEndian>()
    }
}

impl GridDataType for i32 {
    const CODE: u8 = 4;
    fn write_cell<W: Write>(self, writer: &mut W) -> Result<(), Error> {
        writer.write_i32::<LittleEndian>(self)
    }
    fn read_cell<R: Read>(reader: &mut R) -> Result<i32, Error> {
        reader.read_i32::<LittleEndian>()
    }
}

impl GridDataType for f64 {
    const CODE: u8 = 8;
    fn write_cell<W: Write>(self, writer: &mut W) -> Result<(), Error> {
        writer.write_f64::<LittleEndian>(self)
    }
    fn read_cell<R: Read>(reader: &mut R) -> Result<f64, Error> {
        reader.read_f64::<LittleEndian>()
    }
}

/// Writes a grid in the compact little-endian intermediate format used for
/// rasters handed between stages (flow directions in particular).
pub fn write_binary_grid<T: GridDataType>(file_name: &str, grid: &Grid<T>) -> Result<(), Error> {
    let f = File::create(file_name)?;
    let mut writer = BufWriter::new(f);
    writer.write_all(MAGIC)?;
    writer.write_u8(T::CODE)?;
    writer.write_i32::<LittleEndian>(grid.rows() as i32)?;
    writer.write_i32::<LittleEndian>(grid.columns() as i32)?;
    writer.write_f64::<LittleEndian>(grid.origin().lat)?;
    writer.write_f64::<LittleEndian>(grid.origin().lon)?;
    writer.write_f64::<LittleEndian>(grid.lat_res())?;
    writer.write_f64::<LittleEndian>(grid.lon_res())?;
    grid.nodata.write_cell(&mut writer)?;
    for row in 0..grid.rows() {
        for col in 0..grid.columns() {
            grid.get_value(row, col).write_cell(&mut writer)?;
        }
    }
    Ok(())
}

/// Reads a grid written by `write_binary_grid`. The stored cell-type code
/// must match `T`.
pub fn read_binary_grid<T: GridDataType>(file_name: &str) -> Result<Grid<T>, Error> {
    let f = File::open(file_name)?;
    let mut reader = BufReader::new(f);
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("{} is not a PHES binary grid", file_name),
        ));
    }
    let code = reader.read_u8()?;
    if code != T::CODE {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!(
                "{} holds cell type code {}, expected {}",
                file_name,
                code,
                T::CODE
            ),
        ));
    }
    let rows = reader.read_i32::<LittleEndian>()? as isize;
    let columns = reader.read_i32::<LittleEndian>()? as isize;
    let lat = reader.read_f64::<LittleEndian>()?;
    let lon = reader.read_f64::<LittleEndian>()?;
    let lat_res = reader.read_f64::<LittleEndian>()?;
    let lon_res = reader.read_f64::<LittleEndian>()?;
    let nodata = T::read_cell(&mut reader)?;
    let mut grid = Grid::new(rows, columns, nodata, nodata)?;
    grid.set_georef(GeographicCoordinate::new(lat, lon), lat_res, lon_res);
    for row in 0..rows {
        for col in 0..columns {
            grid.set_value(row, col, T::read_cell(&mut reader)?);
        }
    }
    Ok(grid)
}

#[cfg(test)]
mod test {
    use super::{read_binary_grid, write_binary_grid};
    use crate::Grid;
    use phes_common::structures::GeographicCoordinate;

    #[test]
    fn test_binary_round_trip_flow_directions() {
        let mut g: Grid<i8> = Grid::new(6, 7, 0, -1).unwrap();
        g.set_origin(GeographicCoordinate::new(-22.0, 146.0));
        for row in 0..6 {
            for col in 0..7 {
                g.set_value(row, col, ((row + col) % 8) as i8);
            }
        }
        let path = std::env::temp_dir().join("phes_binary_round_trip.bgr");
        let path = path.to_str().unwrap().to_string();
        write_binary_grid(&path, &g).unwrap();
        let back: Grid<i8> = read_binary_grid(&path).unwrap();
        assert_eq!(back.rows(), 6);
        assert_eq!(back.columns(), 7);
        for row in 0..6 {
            for col in 0..7 {
                assert_eq!(back.get_value(row, col), g.get_value(row, col));
            }
        }
        assert!((back.origin().lat - g.origin().lat).abs() < 1e-12);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_type_code_mismatch_is_rejected() {
        let g: Grid<i8> = Grid::new(2, 2, 0, -1).unwrap();
        let path = std::env::temp_dir().join("phes_binary_type_mismatch.bgr");
        let path = path.to_str().unwrap().to_string();
        write_binary_grid(&path, &g).unwrap();
        let res: Result<Grid<i16>, _> = read_binary_grid(&path);
        assert!(res.is_err());
        std::fs::remove_file(&path).ok();
    }
}
