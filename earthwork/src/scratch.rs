//! On-disk staging of intermediate grids.

use elevation::{write_geotiff, Crs, ElevationGrid, GridSource};
use log::{debug, warn};
use std::path::Path;
use tempfile::TempDir;

/// Scratch directory owned by one analysis run.
///
/// Grids written here are reloaded from disk so the run only ever sees
/// what a GeoTIFF can represent. The directory and everything in it
/// is removed when this is dropped.
#[derive(Debug)]
pub struct Scratch {
    dir: TempDir,
    written: usize,
}

impl Scratch {
    pub fn new() -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("earthwork-").tempdir()?;
        debug!("scratch dir {:?}", dir.path());
        Ok(Self { dir, written: 0 })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `grid` under `name` and reads it back.
    ///
    /// Grids in a system GeoTIFF keys can not describe are returned
    /// unchanged.
    pub fn spill(&mut self, name: &str, grid: ElevationGrid) -> Result<ElevationGrid, elevation::ElevationError> {
        if let Crs::Proj(_) = grid.crs() {
            warn!("{name} is in {}, keeping it in memory", grid.crs());
            return Ok(grid);
        }
        let path = self.dir.path().join(format!("{:02}-{name}.tif", self.written));
        write_geotiff(&grid, &path)?;
        self.written += 1;
        let mut source = GridSource::new().crs(grid.crs().clone());
        if let Some(nodata) = grid.nodata() {
            source = source.nodata(nodata);
        }
        source.load(&path)
    }
}
