//! Running a batch of polygons against one or two grids.

use crate::{
    aggregate::{aggregate, Volumes},
    mask::clip,
    reference::{boundary_average, Reference, ReferenceMode},
    reproject::{align_to, is_aligned, reproject, Resampling, ToMetric},
    scratch::Scratch,
    EarthworkError, GridRole, Polygon, PolygonError,
};
use elevation::{Crs, ElevationGrid, C};
use geo::{Contains, Intersects};
use geojson::{JsonObject, JsonValue};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Serialize, Serializer};
use std::{fmt, time::Instant};

/// Figures for one input polygon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolygonResult {
    pub polygon_id: String,
    pub attributes: JsonObject,
    pub area_m2: C,
    pub volume_m3: C,
    pub positive_volume_m3: C,
    pub negative_volume_m3: C,

    /// Constant reference elevation, for altitude based modes.
    pub reference_altitude_used: Option<C>,
    pub valid_cells: usize,
    pub nodata_cells: usize,

    /// Why the figures are zero, if they had to be.
    pub issue: Option<PolygonError>,
}

impl PolygonResult {
    fn empty(polygon: &Polygon) -> Self {
        Self {
            polygon_id: polygon.id.clone(),
            attributes: polygon.attributes.clone(),
            area_m2: 0.0,
            volume_m3: 0.0,
            positive_volume_m3: 0.0,
            negative_volume_m3: 0.0,
            reference_altitude_used: None,
            valid_cells: 0,
            nodata_cells: 0,
            issue: None,
        }
    }

    pub fn volumes(&self) -> Volumes {
        Volumes {
            area: self.area_m2,
            volume: self.volume_m3,
            positive: self.positive_volume_m3,
            negative: self.negative_volume_m3,
            valid_cells: self.valid_cells,
            nodata_cells: self.nodata_cells,
        }
    }
}

/// Figures for a whole batch, in input order.
///
/// Totals are plain sums, so overlapping polygons count their shared
/// ground more than once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub mode: ReferenceMode,

    /// System areas and volumes were measured in.
    #[serde(serialize_with = "display")]
    pub crs: Crs,
    pub polygons: Vec<PolygonResult>,
    pub total_area_m2: C,
    pub total_volume_m3: C,
    pub total_positive_volume_m3: C,
    pub total_negative_volume_m3: C,
}

fn display<S: Serializer>(crs: &Crs, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(crs)
}

/// Measures `polygons` over `primary` with default settings.
///
/// `reference` is required for [`ReferenceMode::DifferenceOfGrids`]
/// and `altitude` for [`ReferenceMode::ScalarAltitude`]; each is
/// ignored otherwise.
pub fn run_analysis(
    primary: &ElevationGrid,
    reference: Option<&ElevationGrid>,
    polygons: &[Polygon],
    mode: ReferenceMode,
    altitude: Option<C>,
) -> Result<AnalysisResult, EarthworkError> {
    let mut builder = Analysis::builder().surface(primary).mode(mode);
    if let Some(reference) = reference {
        builder = builder.reference_grid(reference);
    }
    if let Some(altitude) = altitude {
        builder = builder.altitude(altitude);
    }
    builder.build()?.run(polygons)
}

/// What each polygon's surface is compared with.
#[derive(Debug, Clone, Copy)]
enum Strategy<'a> {
    Grid(&'a ElevationGrid),
    Altitude(C),
    Boundary,
}

/// A configured analysis, reusable across polygon batches.
#[derive(Debug, Clone)]
pub struct Analysis<'a> {
    surface: &'a ElevationGrid,
    strategy: Strategy<'a>,
    target_crs: Option<Crs>,
    resampling: Resampling,
    parallel: bool,
    spill: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisBuilder<'a> {
    surface: Option<&'a ElevationGrid>,
    reference_grid: Option<&'a ElevationGrid>,
    mode: Option<ReferenceMode>,
    altitude: Option<C>,
    target_crs: Option<Crs>,
    resampling: Resampling,
    parallel: Option<bool>,
    spill: bool,
}

impl<'a> AnalysisBuilder<'a> {
    /// The surface (DSM) being measured.
    #[must_use]
    pub fn surface(mut self, surface: &'a ElevationGrid) -> Self {
        self.surface = Some(surface);
        self
    }

    /// The ground (DTM) subtracted from the surface in
    /// [`ReferenceMode::DifferenceOfGrids`].
    #[must_use]
    pub fn reference_grid(mut self, reference: &'a ElevationGrid) -> Self {
        self.reference_grid = Some(reference);
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: ReferenceMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Reference elevation for [`ReferenceMode::ScalarAltitude`].
    #[must_use]
    pub fn altitude(mut self, altitude: C) -> Self {
        self.altitude = Some(altitude);
        self
    }

    /// Metric system to measure in. Picked from the surface grid when
    /// not set. Running fails if it is not metric.
    #[must_use]
    pub fn target_crs(mut self, crs: Crs) -> Self {
        self.target_crs = Some(crs);
        self
    }

    #[must_use]
    pub fn resampling(mut self, resampling: Resampling) -> Self {
        self.resampling = resampling;
        self
    }

    /// Evaluate polygons on the rayon pool. Defaults to `true`.
    #[must_use]
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = Some(parallel);
        self
    }

    /// Stage reprojected grids through GeoTIFFs in a scratch directory.
    #[must_use]
    pub fn spill(mut self, spill: bool) -> Self {
        self.spill = spill;
        self
    }

    pub fn build(self) -> Result<Analysis<'a>, EarthworkError> {
        let surface = self.surface.ok_or(EarthworkError::Builder("surface"))?;
        let strategy = match self.mode.ok_or(EarthworkError::Builder("mode"))? {
            ReferenceMode::DifferenceOfGrids => Strategy::Grid(
                self.reference_grid
                    .ok_or(EarthworkError::Builder("reference_grid"))?,
            ),
            ReferenceMode::ScalarAltitude => Strategy::Altitude(
                self.altitude
                    .filter(|altitude| altitude.is_finite())
                    .ok_or(EarthworkError::Builder("altitude"))?,
            ),
            ReferenceMode::BoundaryAverageAltitude => Strategy::Boundary,
        };
        Ok(Analysis {
            surface,
            strategy,
            target_crs: self.target_crs,
            resampling: self.resampling,
            parallel: self.parallel.unwrap_or(true),
            spill: self.spill,
        })
    }
}

/// Grids moved into the measuring system.
struct Prepared {
    surface: ElevationGrid,
    baseline: Baseline,
}

enum Baseline {
    /// Ground grid on the surface's cells, or why it could not be put
    /// there.
    Grid(Result<ElevationGrid, String>),
    Altitude(C),
    Boundary,
}

impl<'a> Analysis<'a> {
    pub fn builder() -> AnalysisBuilder<'a> {
        AnalysisBuilder::default()
    }

    pub fn mode(&self) -> ReferenceMode {
        match self.strategy {
            Strategy::Grid(_) => ReferenceMode::DifferenceOfGrids,
            Strategy::Altitude(_) => ReferenceMode::ScalarAltitude,
            Strategy::Boundary => ReferenceMode::BoundaryAverageAltitude,
        }
    }

    /// Measures every polygon.
    ///
    /// Grid level failures abort the run. Anything confined to one
    /// polygon is recorded in its result's `issue` and the batch
    /// carries on.
    pub fn run(&self, polygons: &[Polygon]) -> Result<AnalysisResult, EarthworkError> {
        let now = Instant::now();
        // Dropped on every return, taking its files with it.
        let mut scratch = if self.spill { Some(Scratch::new()?) } else { None };
        let prepared = self.prepare(scratch.as_mut())?;
        debug!("prepare; crs: {}, exec: {:?}", prepared.surface.crs(), now.elapsed());

        let polygon_time = Instant::now();
        let results: Vec<PolygonResult> = if self.parallel {
            polygons
                .par_iter()
                .map(|polygon| prepared.evaluate(polygon))
                .collect()
        } else {
            polygons
                .iter()
                .map(|polygon| prepared.evaluate(polygon))
                .collect()
        };
        debug!("polygons; n: {}, exec: {:?}", results.len(), polygon_time.elapsed());

        let total: Volumes = results.iter().map(PolygonResult::volumes).sum();
        let result = AnalysisResult {
            mode: self.mode(),
            crs: prepared.surface.crs().clone(),
            polygons: results,
            total_area_m2: total.area,
            total_volume_m3: total.volume,
            total_positive_volume_m3: total.positive,
            total_negative_volume_m3: total.negative,
        };
        info!(
            "{} analysis of {} polygons in {}; area: {:.2} m², volume: {:.2} m³, exec: {:?}",
            result.mode,
            result.polygons.len(),
            result.crs,
            result.total_area_m2,
            result.total_volume_m3,
            now.elapsed()
        );
        Ok(result)
    }

    fn prepare(&self, scratch: Option<&mut Scratch>) -> Result<Prepared, EarthworkError> {
        let surface = reproject(self.surface, self.target_crs.as_ref(), self.resampling)
            .map_err(|e| EarthworkError::reprojection(GridRole::Surface, &e))?;
        if !surface.crs().is_locally_metric() {
            return Err(EarthworkError::Reprojection {
                role: GridRole::Surface,
                reason: format!("{} is not a metric system", surface.crs()),
            });
        }

        let (surface, baseline) = match self.strategy {
            Strategy::Altitude(altitude) => (surface, Baseline::Altitude(altitude)),
            Strategy::Boundary => (surface, Baseline::Boundary),
            Strategy::Grid(ground) => {
                let ground = reproject(ground, Some(surface.crs()), self.resampling)
                    .map_err(|e| EarthworkError::reprojection(GridRole::Reference, &e))?;
                let (surface, ground) = self.align(surface, ground);
                (surface, Baseline::Grid(ground))
            }
        };

        let Some(scratch) = scratch else {
            return Ok(Prepared { surface, baseline });
        };
        let surface = scratch
            .spill("surface", surface)
            .map_err(|e| EarthworkError::load(GridRole::Surface, e))?;
        let baseline = match baseline {
            Baseline::Grid(Ok(ground)) => {
                let ground = scratch
                    .spill("reference", ground)
                    .map_err(|e| EarthworkError::load(GridRole::Reference, e))?;
                Baseline::Grid(Ok(ground))
            }
            baseline => baseline,
        };
        Ok(Prepared { surface, baseline })
    }

    /// Resamples the coarser of two grids onto the finer one's cells.
    fn align(
        &self,
        surface: ElevationGrid,
        ground: ElevationGrid,
    ) -> (ElevationGrid, Result<ElevationGrid, String>) {
        if is_aligned(&surface, &ground) {
            return (surface, Ok(ground));
        }
        if ground.cell_area() < surface.cell_area() {
            debug!("resampling surface onto the finer reference grid");
            match align_to(&surface, &ground, self.resampling) {
                Ok(aligned) => (aligned, Ok(ground)),
                Err(e) => (surface, Err(e.to_string())),
            }
        } else {
            let aligned = align_to(&ground, &surface, self.resampling).map_err(|e| e.to_string());
            (surface, aligned)
        }
    }
}

impl Prepared {
    fn evaluate(&self, polygon: &Polygon) -> PolygonResult {
        let mut result = PolygonResult::empty(polygon);
        match self.measure(polygon) {
            Ok((volumes, altitude)) => {
                result.area_m2 = volumes.area;
                result.volume_m3 = volumes.volume;
                result.positive_volume_m3 = volumes.positive;
                result.negative_volume_m3 = volumes.negative;
                result.valid_cells = volumes.valid_cells;
                result.nodata_cells = volumes.nodata_cells;
                result.reference_altitude_used = altitude;
            }
            Err(issue) => {
                warn!("polygon {}: {issue}", polygon.id);
                result.issue = Some(issue);
            }
        }
        result
    }

    fn measure(&self, polygon: &Polygon) -> Result<(Volumes, Option<C>), PolygonError> {
        let polygon = polygon
            .to_metric_crs(Some(self.surface.crs()))
            .map_err(|e| PolygonError::Reprojection(e.to_string()))?;
        let clip = clip(&self.surface, &polygon.geometry).ok_or(PolygonError::OutsideExtent)?;
        let cell_area = self.surface.cell_area();

        let (reference, altitude) = match &self.baseline {
            Baseline::Grid(Err(reason)) => return Err(PolygonError::MisalignedGrids(reason.clone())),
            Baseline::Grid(Ok(ground)) => {
                let window = ground
                    .window(clip.window)
                    .map_err(|e| PolygonError::MisalignedGrids(e.to_string()))?;
                let volumes = aggregate(&clip.grid, &Reference::Grid(&window), &clip.mask, cell_area);
                return Ok((volumes, None));
            }
            Baseline::Altitude(altitude) => (Reference::Altitude(*altitude), *altitude),
            Baseline::Boundary => {
                let altitude = boundary_average(&self.surface, &polygon.geometry)?;
                (Reference::Altitude(altitude), altitude)
            }
        };
        Ok((aggregate(&clip.grid, &reference, &clip.mask, cell_area), Some(altitude)))
    }
}

/// Something about a polygon's placement worth telling the user before
/// running an analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtentWarning {
    CrsMismatch {
        polygon_id: String,
        polygon_crs: String,
        grid_crs: String,
    },
    Unprojectable {
        polygon_id: String,
        reason: String,
    },
    OutsideExtent {
        polygon_id: String,
    },
    PartiallyOutside {
        polygon_id: String,
    },
}

impl fmt::Display for ExtentWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CrsMismatch {
                polygon_id,
                polygon_crs,
                grid_crs,
            } => write!(f, "polygon {polygon_id} is in {polygon_crs}, grid is in {grid_crs}"),
            Self::Unprojectable { polygon_id, reason } => {
                write!(f, "polygon {polygon_id} can not be moved onto the grid: {reason}")
            }
            Self::OutsideExtent { polygon_id } => write!(f, "polygon {polygon_id} lies outside the grid"),
            Self::PartiallyOutside { polygon_id } => {
                write!(f, "polygon {polygon_id} is not entirely within the grid")
            }
        }
    }
}

/// Checks each polygon's system and placement against `grid`.
pub fn check_extent(grid: &ElevationGrid, polygons: &[Polygon]) -> Vec<ExtentWarning> {
    let footprint = grid.footprint();
    let mut warnings = Vec::new();
    for polygon in polygons {
        let polygon_id = polygon.id.clone();
        if &polygon.crs != grid.crs() {
            warnings.push(ExtentWarning::CrsMismatch {
                polygon_id: polygon_id.clone(),
                polygon_crs: polygon.crs.to_string(),
                grid_crs: grid.crs().to_string(),
            });
        }
        let geometry = match polygon.to_metric_crs(Some(grid.crs())) {
            Ok(moved) => moved.geometry,
            Err(e) => {
                warnings.push(ExtentWarning::Unprojectable {
                    polygon_id,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        if !footprint.intersects(&geometry) {
            warnings.push(ExtentWarning::OutsideExtent { polygon_id });
        } else if !footprint.contains(&geometry) {
            warnings.push(ExtentWarning::PartiallyOutside { polygon_id });
        }
    }
    warnings
}

/// Returns one square polygon per valid cell of `grid` higher than
/// `threshold`, in `grid`'s system.
pub fn threshold_cells(grid: &ElevationGrid, threshold: C) -> Vec<Polygon> {
    grid.iter()
        .filter(|sample| sample.is_valid() && sample.elevation() > threshold)
        .map(|sample| {
            let mut attributes = JsonObject::new();
            attributes.insert("elevation".to_string(), JsonValue::from(sample.elevation()));
            Polygon::new(
                format!("cell-{}-{}", sample.row(), sample.col()),
                sample.polygon(),
                grid.crs().clone(),
            )
            .with_attributes(attributes)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{check_extent, run_analysis, threshold_cells, Analysis, AnalysisBuilder, ExtentWarning};
    use crate::{EarthworkError, GridRole, Polygon, PolygonError, ReferenceMode, ToMetric};
    use approx::assert_relative_eq;
    use elevation::{Crs, ElevationGrid, GeoTransform};
    use geo::{geometry::Coord, polygon, Area};

    const NODATA: f64 = -9999.0;

    fn utm() -> Crs {
        Crs::utm(31, true)
    }

    /// 10 x 10 grid of 1 m cells covering (0, 0) .. (10, 10).
    fn flat(elevation: f64) -> ElevationGrid {
        let gt = GeoTransform::north_up(Coord { x: 0.0, y: 10.0 }, 1.0, 1.0);
        ElevationGrid::constant(10, 10, elevation, gt, utm(), Some(NODATA)).unwrap()
    }

    fn square(id: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon {
        let geometry = polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1), (x: x0, y: y0)];
        Polygon::new(id, geometry, utm())
    }

    fn whole() -> Polygon {
        square("whole", 0.0, 0.0, 10.0, 10.0)
    }

    #[test]
    fn test_scalar_scenario() {
        let result = run_analysis(&flat(5.0), None, &[whole()], ReferenceMode::ScalarAltitude, Some(2.0)).unwrap();
        let polygon = &result.polygons[0];
        assert_eq!(polygon.issue, None);
        assert_eq!(polygon.valid_cells, 100);
        assert_eq!(polygon.reference_altitude_used, Some(2.0));
        assert_relative_eq!(polygon.area_m2, 100.0);
        assert_relative_eq!(polygon.positive_volume_m3, 300.0);
        assert_relative_eq!(polygon.negative_volume_m3, 0.0);
        assert_relative_eq!(polygon.volume_m3, 300.0);
        assert_relative_eq!(result.total_volume_m3, 300.0);
        assert_eq!(result.crs, utm());
    }

    #[test]
    fn test_difference_scenario() {
        let ground = flat(3.0);
        let result = run_analysis(
            &flat(5.0),
            Some(&ground),
            &[whole()],
            ReferenceMode::DifferenceOfGrids,
            None,
        )
        .unwrap();
        assert_relative_eq!(result.polygons[0].volume_m3, 200.0);
        assert_eq!(result.polygons[0].reference_altitude_used, None);
    }

    #[test]
    fn test_zero_difference() {
        let samples = (0..100).map(f64::from).collect();
        let gt = GeoTransform::north_up(Coord { x: 0.0, y: 10.0 }, 1.0, 1.0);
        let grid = ElevationGrid::new(10, 10, samples, gt, utm(), Some(NODATA)).unwrap();
        let polygons = [whole(), square("inner", 2.0, 2.0, 7.0, 7.0)];
        let result = run_analysis(&grid, Some(&grid), &polygons, ReferenceMode::DifferenceOfGrids, None).unwrap();
        for polygon in &result.polygons {
            assert_relative_eq!(polygon.volume_m3, 0.0);
            assert!(polygon.area_m2 > 0.0);
        }
    }

    #[test]
    fn test_coarse_reference_is_aligned() {
        let gt = GeoTransform::north_up(Coord { x: 0.0, y: 10.0 }, 2.0, 2.0);
        let ground = ElevationGrid::constant(5, 5, 3.0, gt, utm(), Some(NODATA)).unwrap();
        let result = run_analysis(
            &flat(5.0),
            Some(&ground),
            &[whole()],
            ReferenceMode::DifferenceOfGrids,
            None,
        )
        .unwrap();
        assert_eq!(result.polygons[0].issue, None);
        assert_relative_eq!(result.polygons[0].volume_m3, 200.0);
    }

    #[test]
    fn test_fine_reference_is_kept() {
        let gt = GeoTransform::north_up(Coord { x: 0.0, y: 10.0 }, 0.5, 0.5);
        let ground = ElevationGrid::constant(20, 20, 3.0, gt, utm(), Some(NODATA)).unwrap();
        let result = run_analysis(
            &flat(5.0),
            Some(&ground),
            &[whole()],
            ReferenceMode::DifferenceOfGrids,
            None,
        )
        .unwrap();
        assert_eq!(result.polygons[0].valid_cells, 400);
        assert_relative_eq!(result.polygons[0].area_m2, 100.0);
        assert_relative_eq!(result.polygons[0].volume_m3, 200.0);
    }

    #[test]
    fn test_boundary_equivalence() {
        let grid = flat(5.0);
        let polygons = [whole(), square("inner", 1.0, 1.0, 9.0, 9.0)];

        let boundary = run_analysis(&grid, None, &polygons, ReferenceMode::BoundaryAverageAltitude, None).unwrap();
        // Three of the whole-grid polygon's corners sit on its far
        // edges, only the north-west one hits a cell.
        for polygon in &boundary.polygons {
            assert_eq!(polygon.reference_altitude_used, Some(5.0));
            assert_relative_eq!(polygon.volume_m3, 0.0);
        }

        let scalar = run_analysis(&grid, None, &polygons, ReferenceMode::ScalarAltitude, Some(5.0)).unwrap();
        for polygon in &scalar.polygons {
            assert_relative_eq!(polygon.volume_m3, 0.0);
        }
    }

    #[test]
    fn test_boundary_out_of_range() {
        // Covers the grid, every vertex off it.
        let big = square("big", -5.0, -5.0, 15.0, 15.0);
        let result = run_analysis(&flat(5.0), None, &[big], ReferenceMode::BoundaryAverageAltitude, None).unwrap();
        assert_eq!(
            result.polygons[0].issue,
            Some(PolygonError::BoundaryOutOfRange { vertices: 4 })
        );
        assert_relative_eq!(result.polygons[0].area_m2, 0.0);
    }

    #[test]
    fn test_batch_with_outside_polygon() {
        let polygons = [
            whole(),
            square("away", 20.0, 20.0, 30.0, 30.0),
            square("corner", 2.0, 2.0, 4.0, 4.0),
        ];
        let result = run_analysis(&flat(5.0), None, &polygons, ReferenceMode::ScalarAltitude, Some(2.0)).unwrap();
        let ids: Vec<&str> = result.polygons.iter().map(|p| p.polygon_id.as_str()).collect();
        assert_eq!(ids, ["whole", "away", "corner"]);

        assert_relative_eq!(result.polygons[0].volume_m3, 300.0);
        assert_eq!(result.polygons[1].issue, Some(PolygonError::OutsideExtent));
        assert_relative_eq!(result.polygons[1].area_m2, 0.0);
        assert_relative_eq!(result.polygons[1].volume_m3, 0.0);
        assert_eq!(result.polygons[2].issue, None);
        assert_relative_eq!(result.polygons[2].area_m2, 4.0);
        assert_relative_eq!(result.total_area_m2, 104.0);
    }

    #[test]
    fn test_area_monotonicity() {
        let polygons = [
            square("small", 3.0, 3.0, 6.0, 6.0),
            square("medium", 2.0, 2.0, 8.0, 8.0),
            whole(),
        ];
        let result = run_analysis(&flat(5.0), None, &polygons, ReferenceMode::ScalarAltitude, Some(0.0)).unwrap();
        let areas: Vec<f64> = result.polygons.iter().map(|p| p.area_m2).collect();
        assert!(areas.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn test_pixel_area() {
        // 2 m x 0.5 m cells; the polygon covers 3 x 2 of them exactly.
        let gt = GeoTransform::north_up(Coord { x: 0.0, y: 5.0 }, 2.0, 0.5);
        let grid = ElevationGrid::constant(10, 10, 1.0, gt, utm(), Some(NODATA)).unwrap();
        let polygon = square("cells", 2.0, 3.0, 8.0, 4.0);
        let result = run_analysis(&grid, None, &[polygon], ReferenceMode::ScalarAltitude, Some(0.0)).unwrap();
        assert_eq!(result.polygons[0].valid_cells, 6);
        assert_eq!(result.polygons[0].area_m2, 6.0);
        assert_eq!(result.polygons[0].volume_m3, 6.0);
    }

    #[test]
    fn test_nodata_exclusion() {
        let clean = flat(5.0);
        let mut samples = clean.samples().to_vec();
        for idx in [0, 11, 22, 55] {
            samples[idx] = NODATA;
        }
        samples[99] = f64::NAN;
        let holed = clean.with_samples(samples).unwrap();

        let run = |grid: &ElevationGrid| {
            run_analysis(grid, None, &[whole()], ReferenceMode::ScalarAltitude, Some(2.0)).unwrap()
        };
        let (before, after) = (run(&clean), run(&holed));
        assert_eq!(after.polygons[0].nodata_cells, 5);
        assert_relative_eq!(after.polygons[0].area_m2, 95.0);
        assert!(after.polygons[0].area_m2 <= before.polygons[0].area_m2);
        assert!(after.polygons[0].volume_m3.abs() <= before.polygons[0].volume_m3.abs());
    }

    #[test]
    fn test_geographic_surface() {
        // 0.01° square near Paris.
        let gt = GeoTransform::north_up(Coord { x: 2.3, y: 48.86 }, 0.001, 0.001);
        let grid = ElevationGrid::constant(10, 10, 5.0, gt, Crs::WGS84, Some(NODATA)).unwrap();
        let polygon = Polygon::new("site", grid.footprint(), Crs::WGS84);
        let result = run_analysis(&grid, None, &[polygon.clone()], ReferenceMode::ScalarAltitude, Some(2.0)).unwrap();

        assert_eq!(result.crs, Crs::Epsg(32631));
        let measured = &result.polygons[0];
        assert_eq!(measured.issue, None);
        assert_relative_eq!(measured.volume_m3, 3.0 * measured.area_m2, max_relative = 1e-9);

        let expected = polygon.to_metric_crs(Some(&result.crs)).unwrap().geometry.unsigned_area();
        assert_relative_eq!(measured.area_m2, expected, max_relative = 0.1);
    }

    #[test]
    fn test_never_measures_in_degrees() {
        let gt = GeoTransform::north_up(Coord { x: 2.3, y: 48.86 }, 0.001, 0.001);
        let wgs84 = ElevationGrid::constant(10, 10, 5.0, gt, Crs::WGS84, Some(NODATA)).unwrap();
        let site = Polygon::new("site", wgs84.footprint(), Crs::WGS84);

        let err = Analysis::builder()
            .surface(&wgs84)
            .mode(ReferenceMode::ScalarAltitude)
            .altitude(2.0)
            .target_crs(Crs::WGS84)
            .build()
            .unwrap()
            .run(&[site])
            .unwrap_err();
        assert!(matches!(
            err,
            EarthworkError::Reprojection {
                role: GridRole::Surface,
                ..
            }
        ));

        // ED50, which we can not project out of.
        let ed50 = ElevationGrid::constant(10, 10, 5.0, gt, Crs::Epsg(4230), Some(NODATA)).unwrap();
        let site = Polygon::new("site", ed50.footprint(), Crs::Epsg(4230));
        let err = run_analysis(&ed50, None, &[site], ReferenceMode::ScalarAltitude, Some(2.0)).unwrap_err();
        assert!(matches!(
            err,
            EarthworkError::Reprojection {
                role: GridRole::Surface,
                ..
            }
        ));
    }

    #[test]
    fn test_unprojectable_polygon() {
        let bogus = Polygon::new(
            "bogus",
            whole().geometry,
            Crs::Proj("+proj=nowhere +units=m".to_string()),
        );
        let result = run_analysis(&flat(5.0), None, &[bogus, whole()], ReferenceMode::ScalarAltitude, Some(2.0))
            .unwrap();
        assert!(matches!(result.polygons[0].issue, Some(PolygonError::Reprojection(_))));
        assert_relative_eq!(result.polygons[1].volume_m3, 300.0);
    }

    #[test]
    fn test_unprojectable_reference_aborts() {
        let gt = GeoTransform::north_up(Coord { x: 0.0, y: 10.0 }, 1.0, 1.0);
        let crs = Crs::Proj("+proj=nowhere +units=m".to_string());
        let ground = ElevationGrid::constant(10, 10, 3.0, gt, crs, None).unwrap();
        let err = run_analysis(&flat(5.0), Some(&ground), &[whole()], ReferenceMode::DifferenceOfGrids, None)
            .unwrap_err();
        assert!(matches!(
            err,
            EarthworkError::Reprojection {
                role: GridRole::Reference,
                ..
            }
        ));
    }

    #[test]
    fn test_builder_requirements() {
        fn missing(builder: AnalysisBuilder<'_>) -> &'static str {
            match builder.build() {
                Err(EarthworkError::Builder(name)) => name,
                other => panic!("expected a builder error, got {other:?}"),
            }
        }

        let grid = flat(5.0);
        assert_eq!(missing(Analysis::builder().mode(ReferenceMode::ScalarAltitude)), "surface");
        assert_eq!(missing(Analysis::builder().surface(&grid)), "mode");
        assert_eq!(
            missing(Analysis::builder().surface(&grid).mode(ReferenceMode::DifferenceOfGrids)),
            "reference_grid"
        );
        assert_eq!(
            missing(
                Analysis::builder()
                    .surface(&grid)
                    .mode(ReferenceMode::ScalarAltitude)
                    .altitude(f64::NAN)
            ),
            "altitude"
        );
    }

    #[test]
    fn test_sequential_and_spilled_runs_agree() {
        let surface = flat(5.0);
        let ground = flat(3.5);
        let polygons = [whole(), square("inner", 2.0, 2.0, 7.0, 7.0)];
        let base = Analysis::builder()
            .surface(&surface)
            .reference_grid(&ground)
            .mode(ReferenceMode::DifferenceOfGrids);

        let parallel = base.clone().build().unwrap().run(&polygons).unwrap();
        let sequential = base.clone().parallel(false).build().unwrap().run(&polygons).unwrap();
        let spilled = base.spill(true).build().unwrap().run(&polygons).unwrap();
        assert_eq!(parallel, sequential);
        assert_eq!(parallel.polygons, spilled.polygons);
    }

    #[test]
    fn test_result_json() {
        let result = run_analysis(
            &flat(5.0),
            None,
            &[square("away", 20.0, 20.0, 30.0, 30.0)],
            ReferenceMode::ScalarAltitude,
            Some(2.0),
        )
        .unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["mode"], "scalar_altitude");
        assert_eq!(json["crs"], "EPSG:32631");
        assert_eq!(json["polygons"][0]["polygon_id"], "away");
        assert_eq!(json["polygons"][0]["issue"]["kind"], "outside_extent");
    }

    #[test]
    fn test_check_extent() {
        let grid = flat(5.0);
        let lonlat = polygon![(x: 2.0, y: 48.0), (x: 2.1, y: 48.0), (x: 2.1, y: 48.1), (x: 2.0, y: 48.0)];
        let polygons = [
            square("inside", 1.0, 1.0, 9.0, 9.0),
            square("straddles", 5.0, 5.0, 15.0, 15.0),
            square("away", 20.0, 20.0, 30.0, 30.0),
            Polygon::new("degrees", lonlat, Crs::WGS84),
        ];
        let warnings = check_extent(&grid, &polygons);
        assert!(!warnings.iter().any(|w| w.to_string().contains("inside")));
        assert!(warnings.contains(&ExtentWarning::PartiallyOutside {
            polygon_id: "straddles".to_string()
        }));
        assert!(warnings.contains(&ExtentWarning::OutsideExtent {
            polygon_id: "away".to_string()
        }));
        assert!(warnings.contains(&ExtentWarning::CrsMismatch {
            polygon_id: "degrees".to_string(),
            polygon_crs: "EPSG:4326".to_string(),
            grid_crs: "EPSG:32631".to_string(),
        }));
    }

    #[test]
    fn test_threshold_cells() {
        let samples = (0..100).map(|i| f64::from(i % 10)).collect();
        let gt = GeoTransform::north_up(Coord { x: 0.0, y: 10.0 }, 1.0, 1.0);
        let grid = ElevationGrid::new(10, 10, samples, gt, utm(), Some(NODATA)).unwrap();
        let cells = threshold_cells(&grid, 7.0);
        assert_eq!(cells.len(), 20);
        assert_eq!(cells[0].id, "cell-0-8");
        assert_eq!(cells[0].attributes["elevation"], 8.0);
        assert_relative_eq!(cells[0].geometry.unsigned_area(), 1.0);

        let volumes = run_analysis(&grid, None, &cells, ReferenceMode::ScalarAltitude, Some(7.0)).unwrap();
        assert_relative_eq!(volumes.total_area_m2, 20.0);
        assert_relative_eq!(volumes.total_volume_m3, 30.0);
    }
}
