//! What the surface is measured against.

use crate::{EarthworkError, PolygonError};
use elevation::{ElevationGrid, C};
use geo::geometry::Coord;
use serde::Serialize;
use std::{fmt, str::FromStr};

/// How reference elevations are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceMode {
    /// Cell-by-cell against a second (ground) grid.
    DifferenceOfGrids,

    /// Against one user-supplied altitude.
    ScalarAltitude,

    /// Against the mean surface elevation at the polygon's vertices.
    BoundaryAverageAltitude,
}

impl fmt::Display for ReferenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DifferenceOfGrids => f.write_str("difference"),
            Self::ScalarAltitude => f.write_str("scalar"),
            Self::BoundaryAverageAltitude => f.write_str("boundary"),
        }
    }
}

impl FromStr for ReferenceMode {
    type Err = EarthworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "difference" | "difference_of_grids" => Ok(Self::DifferenceOfGrids),
            "scalar" | "scalar_altitude" => Ok(Self::ScalarAltitude),
            "boundary" | "boundary_average_altitude" => Ok(Self::BoundaryAverageAltitude),
            _ => Err(EarthworkError::Parse {
                kind: "reference mode",
                value: s.to_owned(),
            }),
        }
    }
}

/// Reference elevations congruent with a clipped surface window.
#[derive(Debug, Clone, Copy)]
pub enum Reference<'a> {
    /// The reference grid over the same window.
    Grid(&'a ElevationGrid),

    /// One altitude everywhere.
    Altitude(C),
}

impl<'a> Reference<'a> {
    /// Returns the valid reference elevation at `(row, col)`.
    pub fn value(&self, row: usize, col: usize) -> Option<C> {
        match self {
            Self::Grid(grid) => grid.value(row, col),
            Self::Altitude(altitude) => Some(*altitude).filter(|a| a.is_finite()),
        }
    }

    /// The constant altitude, if this is one.
    pub fn altitude(&self) -> Option<C> {
        match self {
            Self::Grid(_) => None,
            Self::Altitude(altitude) => Some(*altitude),
        }
    }
}

/// Exterior ring vertices of `polygon`, without the closing duplicate.
pub fn boundary_vertices(polygon: &geo::Polygon<C>) -> &[Coord<C>] {
    let ring = &polygon.exterior().0;
    match (ring.first(), ring.last()) {
        (Some(first), Some(last)) if ring.len() > 1 && first == last => &ring[..ring.len() - 1],
        _ => ring,
    }
}

/// Mean of `grid`'s nearest valid cell at each boundary vertex of
/// `polygon`.
///
/// Vertices off the grid or on nodata are skipped.
pub fn boundary_average(grid: &ElevationGrid, polygon: &geo::Polygon<C>) -> Result<C, PolygonError> {
    let vertices = boundary_vertices(polygon);
    let (sum, count) = vertices
        .iter()
        .filter_map(|vertex| grid.sample(*vertex))
        .fold((0.0, 0_usize), |(sum, count), elevation| (sum + elevation, count + 1));
    if count == 0 {
        return Err(PolygonError::BoundaryOutOfRange {
            vertices: vertices.len(),
        });
    }
    #[allow(clippy::cast_precision_loss)]
    Ok(sum / count as C)
}

#[cfg(test)]
mod tests {
    use super::{boundary_average, boundary_vertices, Reference, ReferenceMode};
    use crate::PolygonError;
    use approx::assert_relative_eq;
    use elevation::{Crs, ElevationGrid, GeoTransform};
    use geo::{geometry::Coord, polygon};

    fn ramp() -> ElevationGrid {
        // Elevation equals column index, with a nodata hole at (0, 9).
        let mut samples: Vec<f64> = (0..100).map(|i| f64::from(i % 10)).collect();
        samples[9] = -9999.0;
        let gt = GeoTransform::north_up(Coord { x: 0.0, y: 10.0 }, 1.0, 1.0);
        ElevationGrid::new(10, 10, samples, gt, Crs::utm(31, true), Some(-9999.0)).unwrap()
    }

    #[test]
    fn test_vertices_skip_closing() {
        let triangle = polygon![(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 0.0, y: 4.0)];
        assert_eq!(boundary_vertices(&triangle).len(), 3);
    }

    #[test]
    fn test_boundary_average() {
        let square = polygon![
            (x: 2.5, y: 2.5),
            (x: 6.5, y: 2.5),
            (x: 6.5, y: 6.5),
            (x: 2.5, y: 6.5),
            (x: 2.5, y: 2.5),
        ];
        // Columns 2, 6, 6, 2; the closing vertex is not counted twice.
        assert_relative_eq!(boundary_average(&ramp(), &square).unwrap(), 4.0);
    }

    #[test]
    fn test_boundary_skips_nodata_and_outside() {
        let square = polygon![
            (x: 9.5, y: 9.5),
            (x: 20.0, y: 9.5),
            (x: 20.0, y: 0.5),
            (x: 1.5, y: 0.5),
            (x: 9.5, y: 9.5),
        ];
        // (9.5, 9.5) is nodata, two vertices are off the grid.
        assert_relative_eq!(boundary_average(&ramp(), &square).unwrap(), 1.0);
    }

    #[test]
    fn test_boundary_out_of_range() {
        let far = polygon![(x: 50.0, y: 50.0), (x: 60.0, y: 50.0), (x: 60.0, y: 60.0), (x: 50.0, y: 50.0)];
        assert_eq!(
            boundary_average(&ramp(), &far),
            Err(PolygonError::BoundaryOutOfRange { vertices: 3 })
        );
    }

    #[test]
    fn test_reference_values() {
        let grid = ramp();
        assert_eq!(Reference::Grid(&grid).value(0, 9), None);
        assert_eq!(Reference::Grid(&grid).value(3, 4), Some(4.0));
        assert_eq!(Reference::Altitude(2.0).value(100, 100), Some(2.0));
        assert_eq!(Reference::Altitude(f64::NAN).value(0, 0), None);
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("difference".parse::<ReferenceMode>().unwrap(), ReferenceMode::DifferenceOfGrids);
        assert_eq!("SCALAR".parse::<ReferenceMode>().unwrap(), ReferenceMode::ScalarAltitude);
        assert_eq!(
            "boundary_average_altitude".parse::<ReferenceMode>().unwrap(),
            ReferenceMode::BoundaryAverageAltitude
        );
        assert_eq!(ReferenceMode::BoundaryAverageAltitude.to_string(), "boundary");
        assert!("volume".parse::<ReferenceMode>().is_err());
    }
}
