/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/
use crate::Grid;
use num_traits::cast::AsPrimitive;
use phes_common::structures::GeographicCoordinate;
use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::{Error, ErrorKind};

/// Reads an ESRI ASCII grid. Accepts either a square `cellsize` or the `dx`/
/// `dy` pair GDAL emits for non-square cells (which the pixel-doubling
/// upsample produces).
pub fn read_ascii_grid(file_name: &str) -> Result<Grid<f64>, Error> {
    let f = File::open(file_name)?;
    let f = BufReader::new(f);

    let mut rows = 0isize;
    let mut columns = 0isize;
    let mut xllcorner = f64::NEG_INFINITY;
    let mut yllcorner = f64::NEG_INFINITY;
    let mut cellsize_x = f64::NEG_INFINITY;
    let mut cellsize_y = f64::NEG_INFINITY;
    let mut nodata = -9999f64;
    let mut data: Vec<f64> = vec![];

    let malformed = |line: &str| {
        Error::new(
            ErrorKind::InvalidData,
            format!("Malformed ASCII grid line: {}", line),
        )
    };

    for line in f.lines() {
        let line = line?;
        let mut vec: Vec<&str> = line.split_whitespace().collect();
        if vec.is_empty() {
            continue;
        }
        let key = vec[0].to_lowercase();
        let tail = vec[vec.len() - 1];
        if key.contains("nrows") {
            rows = tail.parse::<isize>().map_err(|_| malformed(&line))?;
        } else if key.contains("ncols") {
            columns = tail.parse::<isize>().map_err(|_| malformed(&line))?;
        } else if key.contains("xllcorner") {
            xllcorner = tail.parse::<f64>().map_err(|_| malformed(&line))?;
        } else if key.contains("yllcorner") {
            yllcorner = tail.parse::<f64>().map_err(|_| malformed(&line))?;
        } else if key.contains("cellsize") {
            cellsize_x = tail.parse::<f64>().map_err(|_| malformed(&line))?;
            cellsize_y = cellsize_x;
        } else if key == "dx" {
            cellsize_x = tail.parse::<f64>().map_err(|_| malformed(&line))?;
        } else if key == "dy" {
            cellsize_y = tail.parse::<f64>().map_err(|_| malformed(&line))?;
        } else if key.contains("nodata_value") {
            nodata = tail.parse::<f64>().map_err(|_| malformed(&line))?;
        } else {
            vec.retain(|v| !v.trim().is_empty());
            for val in vec {
                data.push(val.parse::<f64>().map_err(|_| malformed(&line))?);
            }
        }
    }

    if rows <= 0 || columns <= 0 || data.len() != (rows * columns) as usize {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!(
                "ASCII grid {} has {} values for {}x{} cells",
                file_name,
                data.len(),
                rows,
                columns
            ),
        ));
    }
    if cellsize_x == f64::NEG_INFINITY || cellsize_y == f64::NEG_INFINITY {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("ASCII grid {} is missing a cellsize", file_name),
        ));
    }

    let mut grid = Grid::new(rows, columns, 0f64, nodata)?;
    for row in 0..rows {
        for col in 0..columns {
            grid.set_value(row, col, data[(row * columns + col) as usize]);
        }
    }
    grid.set_georef(
        GeographicCoordinate::new(yllcorner + rows as f64 * cellsize_y, xllcorner),
        -cellsize_y,
        cellsize_x,
    );
    Ok(grid)
}

/// Writes a grid as an ESRI ASCII grid, generic over the cell type.
pub fn write_ascii_grid<T: Copy + AsPrimitive<f64>>(
    file_name: &str,
    grid: &Grid<T>,
) -> Result<(), Error> {
    let f = File::create(file_name)?;
    let mut writer = BufWriter::new(f);

    let cellsize_x = grid.lon_res();
    let cellsize_y = -grid.lat_res();
    writeln!(writer, "ncols {}", grid.columns())?;
    writeln!(writer, "nrows {}", grid.rows())?;
    writeln!(writer, "xllcorner {}", grid.origin().lon)?;
    writeln!(
        writer,
        "yllcorner {}",
        grid.origin().lat - grid.rows() as f64 * cellsize_y
    )?;
    if (cellsize_x - cellsize_y).abs() < 1e-12 {
        writeln!(writer, "cellsize {}", cellsize_x)?;
    } else {
        writeln!(writer, "dx {}", cellsize_x)?;
        writeln!(writer, "dy {}", cellsize_y)?;
    }
    writeln!(writer, "NODATA_value {}", grid.nodata.as_())?;

    for row in 0..grid.rows() {
        let mut line = String::with_capacity(grid.columns() as usize * 6);
        for col in 0..grid.columns() {
            if col > 0 {
                line.push(' ');
            }
            let v: f64 = grid.get_value(row, col).as_();
            if v == v.trunc() && v.abs() < 1e15 {
                line.push_str(&format!("{}", v as i64));
            } else {
                line.push_str(&format!("{}", v));
            }
        }
        writeln!(writer, "{}", line)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{read_ascii_grid, write_ascii_grid};
    use crate::Grid;
    use phes_common::structures::GeographicCoordinate;

    #[test]
    fn test_ascii_round_trip() {
        let mut g: Grid<i16> = Grid::new(4, 5, 0, -9999).unwrap();
        g.set_origin(GeographicCoordinate::new(-22.0, 146.0));
        for row in 0..4 {
            for col in 0..5 {
                g.set_value(row, col, (row * 10 + col) as i16);
            }
        }
        let path = std::env::temp_dir().join("phes_ascii_round_trip.asc");
        let path = path.to_str().unwrap().to_string();
        write_ascii_grid(&path, &g).unwrap();
        let back = read_ascii_grid(&path).unwrap();
        assert_eq!(back.rows(), 4);
        assert_eq!(back.columns(), 5);
        assert_eq!(back.get_value(2, 3), 23.0);
        assert!((back.origin().lat - g.origin().lat).abs() < 1e-9);
        assert!((back.origin().lon - g.origin().lon).abs() < 1e-9);
        std::fs::remove_file(&path).ok();
    }
}
