//! Georeferenced elevation grids.
//!
//! Grids are decoded whole into memory as `f64` samples alongside an
//! affine pixel-to-world transform, a coordinate reference system, and
//! an optional nodata sentinel.
//!
//! Supported inputs are single band GeoTIFFs of any integer or float
//! sample type and SRTM/NASADEM `.hgt` tiles.

mod crs;
mod error;
mod geotiff;
mod grid;
mod hgt;
mod transform;

pub use crate::{
    crs::Crs,
    error::ElevationError,
    geotiff::write as write_geotiff,
    grid::{ElevationGrid, Sample, Window},
    hgt::HGT_NODATA,
    transform::GeoTransform,
};
use geo::geometry::{Coord, Rect};
use log::{debug, warn};
use std::{
    ffi::OsStr,
    fs::File,
    io::{BufReader, Read, Seek},
    path::Path,
};

/// Base floating point type used for all coordinates, samples, and
/// calculations.
pub type C = f64;

/// Encoding of a grid stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridFormat {
    GeoTiff,

    /// SRTM tile whose south-west sample center is `sw_corner`.
    Hgt { sw_corner: Coord<i16> },
}

impl GridFormat {
    /// Guesses the format from `path`'s extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ElevationError> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("hgt") => Ok(Self::Hgt {
                sw_corner: hgt::parse_sw_corner(path)?,
            }),
            _ => Ok(Self::GeoTiff),
        }
    }
}

/// Decoded samples and georeferencing before validation.
#[derive(Debug)]
pub(crate) struct RawGrid {
    pub(crate) dimensions: (usize, usize),
    pub(crate) samples: Vec<C>,
    pub(crate) transform: GeoTransform,
    pub(crate) crs: Option<Crs>,
    pub(crate) nodata: Option<C>,
}

/// Loads and validates elevation grids.
///
/// ```no_run
/// use elevation::{Crs, GridSource};
///
/// let grid = GridSource::new()
///     .fallback_crs(Crs::utm(31, true))
///     .nodata(-9999.0)
///     .load("surface.tif")?;
/// # Ok::<(), elevation::ElevationError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct GridSource {
    /// Replaces whatever CRS the file declares.
    crs: Option<Crs>,

    /// Used when the file declares no CRS.
    fallback_crs: Option<Crs>,

    /// Declared extent, used to rebuild a degenerate transform.
    bounds: Option<Rect<C>>,

    /// Replaces the file's nodata sentinel.
    nodata: Option<C>,
}

impl GridSource {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn crs(mut self, crs: Crs) -> Self {
        self.crs = Some(crs);
        self
    }

    #[must_use]
    pub fn fallback_crs(mut self, crs: Crs) -> Self {
        self.fallback_crs = Some(crs);
        self
    }

    #[must_use]
    pub fn bounds(mut self, bounds: Rect<C>) -> Self {
        self.bounds = Some(bounds);
        self
    }

    #[must_use]
    pub fn nodata(mut self, nodata: C) -> Self {
        self.nodata = Some(nodata);
        self
    }

    /// Returns a validated grid read from the file at `path`.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<ElevationGrid, ElevationError> {
        let path = path.as_ref();
        let now = std::time::Instant::now();
        let raw = match GridFormat::from_path(path)? {
            GridFormat::GeoTiff => geotiff::read(BufReader::new(File::open(path)?))?,
            GridFormat::Hgt { .. } => hgt::load(path)?,
        };
        let grid = self.finish(raw, &path.display().to_string())?;
        debug!("loaded {path:?}; exec: {:?}", now.elapsed());
        Ok(grid)
    }

    /// Returns a validated grid decoded from `rdr`.
    pub fn read<R: Read + Seek>(
        &self,
        rdr: R,
        format: GridFormat,
    ) -> Result<ElevationGrid, ElevationError> {
        let raw = match format {
            GridFormat::GeoTiff => geotiff::read(rdr)?,
            GridFormat::Hgt { sw_corner } => hgt::read(rdr, sw_corner)?,
        };
        self.finish(raw, "<stream>")
    }

    fn finish(&self, raw: RawGrid, name: &str) -> Result<ElevationGrid, ElevationError> {
        let RawGrid {
            dimensions: (rows, cols),
            samples,
            mut transform,
            crs,
            nodata,
        } = raw;

        let crs = self
            .crs
            .clone()
            .or(crs)
            .or_else(|| self.fallback_crs.clone())
            .ok_or_else(|| ElevationError::MissingCrs(name.to_owned()))?;

        if transform.is_degenerate() {
            match self.bounds {
                Some(bounds) => {
                    warn!("{name} has a degenerate transform, deriving it from {bounds:?}");
                    transform = GeoTransform::from_bounds(bounds, cols, rows);
                }
                None => return Err(ElevationError::InvalidTransform(transform)),
            }
        }

        ElevationGrid::new(
            rows,
            cols,
            samples,
            transform,
            crs,
            self.nodata.or(nodata),
        )
    }
}

/// Returns a validated grid read from the file at `path`.
pub fn load<P: AsRef<Path>>(path: P) -> Result<ElevationGrid, ElevationError> {
    GridSource::new().load(path)
}

#[cfg(test)]
mod tests {
    use super::{
        write_geotiff, Crs, ElevationError, ElevationGrid, GeoTransform, GridFormat, GridSource,
        RawGrid,
    };
    use geo::geometry::{Coord, Rect};
    use std::io::Cursor;

    fn raw(transform: GeoTransform, crs: Option<Crs>) -> RawGrid {
        RawGrid {
            dimensions: (2, 2),
            samples: vec![1.0; 4],
            transform,
            crs,
            nodata: None,
        }
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            GridFormat::from_path("tiles/N44W072.hgt").unwrap(),
            GridFormat::Hgt {
                sw_corner: Coord { x: -72, y: 44 }
            }
        );
        assert_eq!(GridFormat::from_path("dem.TIF").unwrap(), GridFormat::GeoTiff);
        assert!(GridFormat::from_path("bogus.hgt").is_err());
    }

    #[test]
    fn test_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.tif");
        let gt = GeoTransform::north_up(Coord { x: 0.0, y: 40.0 }, 10.0, 10.0);
        let grid = ElevationGrid::constant(4, 4, 1.0, gt, Crs::utm(31, true), Some(-9999.0))
            .unwrap();
        write_geotiff(&grid, &path).unwrap();

        let grid = GridSource::new()
            .crs(Crs::utm(32, true))
            .nodata(1.0)
            .load(&path)
            .unwrap();
        assert_eq!(grid.crs(), &Crs::utm(32, true));
        assert_eq!(grid.min_elevation(), None);

        let grid = GridSource::new()
            .fallback_crs(Crs::utm(32, true))
            .load(&path)
            .unwrap();
        assert_eq!(grid.crs(), &Crs::utm(31, true));

        let bytes = std::fs::read(&path).unwrap();
        let read = GridSource::new()
            .read(Cursor::new(bytes), GridFormat::GeoTiff)
            .unwrap();
        assert_eq!(read.dimensions(), (4, 4));
    }

    #[test]
    fn test_degenerate_transform() {
        let collapsed = GeoTransform::new(1.0, 0.0, 0.0, 0.0, 0.0, 10.0);
        let crs = Some(Crs::utm(31, true));
        assert!(matches!(
            GridSource::new().finish(raw(collapsed, crs.clone()), "flat"),
            Err(ElevationError::InvalidTransform(_))
        ));
        assert!(matches!(
            GridSource::new().finish(raw(GeoTransform::IDENTITY, crs.clone()), "flat"),
            Err(ElevationError::InvalidTransform(_))
        ));

        let bounds = Rect::new(Coord { x: 100.0, y: 200.0 }, Coord { x: 104.0, y: 204.0 });
        let grid = GridSource::new()
            .bounds(bounds)
            .finish(raw(collapsed, crs), "flat")
            .unwrap();
        assert_eq!(grid.cell_area(), 4.0);
        assert_eq!(grid.bounds(), bounds);
    }

    #[test]
    fn test_missing_crs() {
        let gt = GeoTransform::north_up(Coord { x: 0.0, y: 1.0 }, 1.0, 1.0);
        assert!(matches!(
            GridSource::new().finish(raw(gt, None), "anonymous"),
            Err(ElevationError::MissingCrs(_))
        ));
        let grid = GridSource::new()
            .fallback_crs(Crs::WGS84)
            .finish(raw(gt, None), "anonymous")
            .unwrap();
        assert_eq!(grid.crs(), &Crs::WGS84);
    }

    #[test]
    fn test_not_a_tiff() {
        let rdr = Cursor::new(b"not a tiff".to_vec());
        assert!(GridSource::new().read(rdr, GridFormat::GeoTiff).is_err());
    }
}
