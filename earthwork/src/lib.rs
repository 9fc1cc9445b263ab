//! Cut and fill volumes of elevation grids under polygons.
//!
//! An [`Analysis`] moves a surface grid, and optionally a ground grid,
//! into a metric coordinate system, masks each polygon's cells, and
//! integrates the surface against a reference: the ground grid, a fixed
//! altitude, or the mean surface elevation along the polygon's
//! boundary.
//!
//! ```no_run
//! use earthwork::{read_geojson, run_analysis, ReferenceMode};
//! use std::fs::File;
//!
//! let surface = elevation::load("surface.tif")?;
//! let polygons = read_geojson(File::open("pads.geojson")?)?;
//! let result = run_analysis(&surface, None, &polygons, ReferenceMode::ScalarAltitude, Some(112.5))?;
//! println!("{:.1} m³", result.total_volume_m3);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod aggregate;
mod analysis;
mod error;
mod mask;
mod polygon;
mod reference;
mod reproject;
mod scratch;

pub use crate::{
    aggregate::{aggregate, Volumes},
    analysis::{
        check_extent, run_analysis, threshold_cells, Analysis, AnalysisBuilder, AnalysisResult,
        ExtentWarning, PolygonResult,
    },
    error::{EarthworkError, GridRole, PolygonError, ReprojectError},
    mask::{clip, Clip, Mask},
    polygon::{parse_geojson, read_geojson, to_feature_collection, Polygon},
    reference::{boundary_average, boundary_vertices, Reference, ReferenceMode},
    reproject::{
        align_to, is_aligned, metric_crs_for, reproject, utm_for, utm_for_point, Resampling,
        ToMetric, Transformer,
    },
    scratch::Scratch,
};
use elevation::{ElevationGrid, GridSource};
use std::path::Path;

/// Loads the grid at `path` for `role`, attributing any failure to it.
pub fn load_grid<P: AsRef<Path>>(
    source: &GridSource,
    role: GridRole,
    path: P,
) -> Result<ElevationGrid, EarthworkError> {
    source
        .load(path)
        .map_err(|e| EarthworkError::load(role, e))
}
