//! Moving grids and polygons into a metric coordinate system.
//!
//! Areas and volumes are only meaningful in a projected system whose
//! units are meters. When the caller names no target, a grid already
//! in such a system keeps it and anything else goes to the WGS84 UTM
//! zone containing its center.
//!
//! UTM zones are 6° wide; sites spanning several zones are distorted
//! toward their edges.

use crate::{EarthworkError, Polygon, ReprojectError};
use elevation::{Crs, ElevationGrid, GeoTransform, C};
use geo::{
    geometry::{Coord, Rect},
    Centroid, MapCoords,
};
use log::debug;
use proj4rs::{proj::Proj, transform::transform};
use std::{fmt, str::FromStr};

/// Points per grid edge when projecting its outline.
const EDGE_DENSITY: usize = 21;

/// How to pick a value for an output cell from the source grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Resampling {
    /// Value of the source cell containing the output cell center.
    #[default]
    Nearest,

    /// Distance weighted mean of the four nearest source cell centers.
    ///
    /// Falls back to nearest next to nodata and at the grid edge.
    Bilinear,
}

impl fmt::Display for Resampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearest => f.write_str("nearest"),
            Self::Bilinear => f.write_str("bilinear"),
        }
    }
}

impl FromStr for Resampling {
    type Err = EarthworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "bilinear" => Ok(Self::Bilinear),
            _ => Err(EarthworkError::Parse {
                kind: "resampling",
                value: s.to_owned(),
            }),
        }
    }
}

/// Coordinate transformation between two systems.
pub struct Transformer {
    src: Proj,
    dst: Proj,
    src_geographic: bool,
    dst_geographic: bool,
    identity: bool,
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("src_geographic", &self.src_geographic)
            .field("dst_geographic", &self.dst_geographic)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Transformer {
    pub fn new(src: &Crs, dst: &Crs) -> Result<Self, ReprojectError> {
        let proj = |crs: &Crs| -> Result<Proj, ReprojectError> {
            Proj::from_proj_string(&crs.to_proj_string()?)
                .map_err(|e| ReprojectError::Proj(format!("{crs}: {e:?}")))
        };
        Ok(Self {
            src: proj(src)?,
            dst: proj(dst)?,
            src_geographic: src.is_geographic(),
            dst_geographic: dst.is_geographic(),
            identity: src == dst,
        })
    }

    /// Geographic coordinates are `(lon, lat)` in degrees.
    pub fn transform(&self, coord: Coord<C>) -> Result<Coord<C>, ReprojectError> {
        if self.identity {
            return Ok(coord);
        }
        let mut point = if self.src_geographic {
            (coord.x.to_radians(), coord.y.to_radians(), 0.0)
        } else {
            (coord.x, coord.y, 0.0)
        };
        transform(&self.src, &self.dst, &mut point)
            .map_err(|e| ReprojectError::Proj(format!("{coord:?}: {e:?}")))?;
        let out = if self.dst_geographic {
            Coord {
                x: point.0.to_degrees(),
                y: point.1.to_degrees(),
            }
        } else {
            Coord {
                x: point.0,
                y: point.1,
            }
        };
        if out.x.is_finite() && out.y.is_finite() {
            Ok(out)
        } else {
            Err(ReprojectError::Proj(format!("{coord:?} has no image")))
        }
    }
}

/// Returns the WGS84 UTM system containing `(lon, lat)`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn utm_for(Coord { x: lon, y: lat }: Coord<C>) -> Crs {
    let zone = ((lon + 180.0) / 6.0).floor() + 1.0;
    Crs::utm(zone.clamp(1.0, 60.0) as u8, lat >= 0.0)
}

/// Returns the UTM system containing `coord`, which is expressed in
/// `crs`.
pub fn utm_for_point(coord: Coord<C>, crs: &Crs) -> Result<Crs, ReprojectError> {
    let lonlat = Transformer::new(crs, &Crs::WGS84)?.transform(coord)?;
    Ok(utm_for(lonlat))
}

/// Returns the system areas of `grid` should be measured in.
pub fn metric_crs_for(grid: &ElevationGrid) -> Result<Crs, ReprojectError> {
    if grid.crs().is_locally_metric() {
        Ok(grid.crs().clone())
    } else {
        utm_for_point(grid.bounds().center(), grid.crs())
    }
}

/// Things which can be moved into a metric system.
pub trait ToMetric: Sized {
    /// Returns `self` expressed in `target`, or in an automatically
    /// chosen metric system when `target` is `None`.
    fn to_metric_crs(&self, target: Option<&Crs>) -> Result<Self, ReprojectError>;
}

impl ToMetric for ElevationGrid {
    fn to_metric_crs(&self, target: Option<&Crs>) -> Result<Self, ReprojectError> {
        reproject(self, target, Resampling::Nearest)
    }
}

impl ToMetric for Polygon {
    fn to_metric_crs(&self, target: Option<&Crs>) -> Result<Self, ReprojectError> {
        let target = match target {
            Some(target) => target.clone(),
            None if self.crs.is_locally_metric() => return Ok(self.clone()),
            None => {
                let center = self
                    .geometry
                    .centroid()
                    .ok_or_else(|| ReprojectError::Empty(self.id.clone()))?;
                utm_for_point(center.0, &self.crs)?
            }
        };
        if target == self.crs {
            return Ok(self.clone());
        }
        let transformer = Transformer::new(&self.crs, &target)?;
        let geometry = self
            .geometry
            .try_map_coords(|coord| transformer.transform(coord))?;
        Ok(self.with_geometry(geometry, target))
    }
}

/// Returns `grid` resampled into `target` (see [`metric_crs_for`]
/// when `None`).
///
/// The output is north-up with square cells, sized so it holds about
/// as many cells as `grid`. Cells with no source value are nodata;
/// when `grid` has no sentinel they are `NaN`.
pub fn reproject(
    grid: &ElevationGrid,
    target: Option<&Crs>,
    resampling: Resampling,
) -> Result<ElevationGrid, ReprojectError> {
    let target = match target {
        Some(target) => target.clone(),
        None => metric_crs_for(grid)?,
    };
    if &target == grid.crs() {
        return Ok(grid.clone());
    }

    let now = std::time::Instant::now();
    let forward = Transformer::new(grid.crs(), &target)?;
    let bounds = transform_bounds(grid, &forward)?;

    #[allow(clippy::cast_precision_loss)]
    let pixel = (bounds.width() * bounds.height() / grid.len() as C).sqrt();
    if !(pixel.is_finite() && pixel > 0.0) {
        return Err(ReprojectError::Empty(target.to_string()));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (rows, cols) = (
        ((bounds.height() / pixel).ceil() as usize).max(1),
        ((bounds.width() / pixel).ceil() as usize).max(1),
    );
    let origin = Coord {
        x: bounds.min().x,
        y: bounds.max().y,
    };
    let out_transform = GeoTransform::north_up(origin, pixel, pixel);

    let inverse = Transformer::new(&target, grid.crs())?;
    let out = resample(grid, out_transform, (rows, cols), target, Some(&inverse), resampling)?;
    debug!(
        "reproject; {} -> {}, dims: {:?} -> {:?}, exec: {:?}",
        grid.crs(),
        out.crs(),
        grid.dimensions(),
        out.dimensions(),
        now.elapsed()
    );
    Ok(out)
}

/// True if `a` and `b` share a cell grid, making cell-by-cell
/// arithmetic valid.
pub fn is_aligned(a: &ElevationGrid, b: &ElevationGrid) -> bool {
    a.crs() == b.crs()
        && a.dimensions() == b.dimensions()
        && a.transform().approx_eq(b.transform(), 1e-6)
}

/// Returns `grid` resampled onto `template`'s cells.
pub fn align_to(
    grid: &ElevationGrid,
    template: &ElevationGrid,
    resampling: Resampling,
) -> Result<ElevationGrid, ReprojectError> {
    if is_aligned(grid, template) {
        return Ok(grid.clone());
    }
    let inverse = if grid.crs() == template.crs() {
        None
    } else {
        Some(Transformer::new(template.crs(), grid.crs())?)
    };
    resample(
        grid,
        *template.transform(),
        template.dimensions(),
        template.crs().clone(),
        inverse.as_ref(),
        resampling,
    )
}

/// Projects `grid`'s outline, densified along each edge, and returns
/// its envelope.
#[allow(clippy::cast_precision_loss)]
fn transform_bounds(grid: &ElevationGrid, forward: &Transformer) -> Result<Rect<C>, ReprojectError> {
    let (rows, cols) = grid.dimensions();
    let (rows, cols) = (rows as C, cols as C);
    let steps = (0..EDGE_DENSITY).map(|i| i as C / (EDGE_DENSITY - 1) as C);
    let mut edge = Vec::with_capacity(EDGE_DENSITY * 4);
    for t in steps {
        edge.push((t * cols, 0.0));
        edge.push((t * cols, rows));
        edge.push((0.0, t * rows));
        edge.push((cols, t * rows));
    }

    let mut envelope: Option<(Coord<C>, Coord<C>)> = None;
    for (col, row) in edge {
        let Ok(Coord { x, y }) = forward.transform(grid.transform().apply(col, row)) else {
            continue;
        };
        envelope = Some(match envelope {
            None => (Coord { x, y }, Coord { x, y }),
            Some((min, max)) => (
                Coord {
                    x: min.x.min(x),
                    y: min.y.min(y),
                },
                Coord {
                    x: max.x.max(x),
                    y: max.y.max(y),
                },
            ),
        });
    }
    envelope
        .map(|(min, max)| Rect::new(min, max))
        .ok_or_else(|| ReprojectError::Empty(format!("{:?}", grid.bounds())))
}

/// Fills a `rows` x `cols` grid on `transform` in `crs` with values
/// drawn from `src`. `to_src` maps output coordinates into `src`'s
/// system.
fn resample(
    src: &ElevationGrid,
    transform: GeoTransform,
    (rows, cols): (usize, usize),
    crs: Crs,
    to_src: Option<&Transformer>,
    resampling: Resampling,
) -> Result<ElevationGrid, ReprojectError> {
    let fill = src.nodata().unwrap_or(C::NAN);
    let src_inverse = src
        .transform()
        .inverse()
        .ok_or_else(|| ReprojectError::Proj(format!("{:?} is not invertible", src.transform())))?;

    let mut samples = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            let world = transform.cell_center(row, col);
            let world = match to_src {
                None => Some(world),
                Some(to_src) => to_src.transform(world).ok(),
            };
            let value = world.and_then(|Coord { x, y }| {
                let Coord { x: col, y: row } = src_inverse.apply(x, y);
                sample(src, col, row, resampling)
            });
            samples.push(value.unwrap_or(fill));
        }
    }
    Ok(ElevationGrid::new(
        rows,
        cols,
        samples,
        transform,
        crs,
        src.nodata(),
    )?)
}

/// Returns `grid`'s value at fractional pixel position `(col, row)`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn sample(grid: &ElevationGrid, col: C, row: C, resampling: Resampling) -> Option<C> {
    let (rows, cols) = grid.dimensions();
    if !(col >= 0.0 && row >= 0.0 && col < cols as C && row < rows as C) {
        return None;
    }
    let nearest = || grid.value(row as usize, col as usize);
    match resampling {
        Resampling::Nearest => nearest(),
        Resampling::Bilinear => {
            let (x, y) = (col - 0.5, row - 0.5);
            let (x0, y0) = (x.floor(), y.floor());
            if x0 < 0.0 || y0 < 0.0 || x0 + 1.0 >= cols as C || y0 + 1.0 >= rows as C {
                return nearest();
            }
            let (c0, r0) = (x0 as usize, y0 as usize);
            let corners = (
                grid.value(r0, c0),
                grid.value(r0, c0 + 1),
                grid.value(r0 + 1, c0),
                grid.value(r0 + 1, c0 + 1),
            );
            match corners {
                (Some(nw), Some(ne), Some(sw), Some(se)) => {
                    let (fx, fy) = (x - x0, y - y0);
                    let top = nw + (ne - nw) * fx;
                    let bottom = sw + (se - sw) * fx;
                    Some(top + (bottom - top) * fy)
                }
                _ => nearest(),
            }
        }
    }
}
