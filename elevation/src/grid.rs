use crate::{Crs, ElevationError, GeoTransform, C};
use geo::{
    geometry::{Coord, LineString, Polygon, Rect},
    polygon,
};

/// A georeferenced, in-memory elevation grid.
///
/// Grids are never mutated once built; windowing and reprojection
/// return new grids.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationGrid {
    /// Number of (rows, columns) in this grid.
    dimensions: (usize, usize),

    /// Row-major elevation samples.
    samples: Box<[C]>,

    /// Pixel to world mapping.
    transform: GeoTransform,

    /// System `transform` maps into.
    crs: Crs,

    /// Sentinel marking missing samples.
    ///
    /// `NaN` samples are always treated as missing.
    nodata: Option<C>,
}

/// A rectangular sub-region of a grid, in sample indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub row_off: usize,
    pub col_off: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Window {
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ElevationGrid {
    /// Returns a grid after checking that `samples` fill `rows` x
    /// `cols` and that `transform` is usable.
    pub fn new(
        rows: usize,
        cols: usize,
        samples: Vec<C>,
        transform: GeoTransform,
        crs: Crs,
        nodata: Option<C>,
    ) -> Result<Self, ElevationError> {
        if samples.len() != rows * cols || samples.is_empty() {
            return Err(ElevationError::Shape {
                len: samples.len(),
                rows,
                cols,
            });
        }
        if transform.is_degenerate() {
            return Err(ElevationError::InvalidTransform(transform));
        }
        Ok(Self {
            dimensions: (rows, cols),
            samples: samples.into_boxed_slice(),
            transform,
            crs,
            nodata,
        })
    }

    /// Returns a grid with every sample set to `elevation`.
    pub fn constant(
        rows: usize,
        cols: usize,
        elevation: C,
        transform: GeoTransform,
        crs: Crs,
        nodata: Option<C>,
    ) -> Result<Self, ElevationError> {
        Self::new(rows, cols, vec![elevation; rows * cols], transform, crs, nodata)
    }

    pub fn rows(&self) -> usize {
        self.dimensions.0
    }

    pub fn cols(&self) -> usize {
        self.dimensions.1
    }

    /// Returns (rows, columns).
    pub fn dimensions(&self) -> (usize, usize) {
        self.dimensions
    }

    /// Returns the number of samples in this grid.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn samples(&self) -> &[C] {
        &self.samples
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn nodata(&self) -> Option<C> {
        self.nodata
    }

    /// Area of one sample in squared CRS units.
    pub fn cell_area(&self) -> C {
        self.transform.pixel_area()
    }

    /// True if `value` should take part in computations.
    pub fn is_valid(&self, value: C) -> bool {
        !value.is_nan() && self.nodata.map_or(true, |nodata| value != nodata)
    }

    /// Returns the raw sample at `(row, col)`, nodata included.
    pub fn get(&self, row: usize, col: usize) -> Option<C> {
        let (rows, cols) = self.dimensions;
        if row < rows && col < cols {
            Some(self.samples[row * cols + col])
        } else {
            None
        }
    }

    /// Returns the sample at `(row, col)` if it is in range and not
    /// nodata.
    pub fn value(&self, row: usize, col: usize) -> Option<C> {
        self.get(row, col).filter(|v| self.is_valid(*v))
    }

    /// Returns the `(row, col)` of the sample containing `coord`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn index(&self, coord: Coord<C>) -> Option<(usize, usize)> {
        let (col, row) = self.transform.to_pixel(coord)?;
        let (col, row) = (col.floor(), row.floor());
        let (rows, cols) = self.dimensions;
        #[allow(clippy::cast_precision_loss)]
        if col >= 0.0 && row >= 0.0 && col < cols as C && row < rows as C {
            Some((row as usize, col as usize))
        } else {
            None
        }
    }

    /// Returns the nearest valid sample to `coord`.
    pub fn sample(&self, coord: Coord<C>) -> Option<C> {
        self.index(coord)
            .and_then(|(row, col)| self.value(row, col))
    }

    /// Returns the four outer corners, clockwise from the first
    /// sample's outer corner.
    #[allow(clippy::cast_precision_loss)]
    pub fn corners(&self) -> [Coord<C>; 4] {
        let (rows, cols) = self.dimensions;
        let (rows, cols) = (rows as C, cols as C);
        [
            self.transform.apply(0.0, 0.0),
            self.transform.apply(cols, 0.0),
            self.transform.apply(cols, rows),
            self.transform.apply(0.0, rows),
        ]
    }

    /// Axis aligned envelope of this grid.
    pub fn bounds(&self) -> Rect<C> {
        let corners = self.corners();
        let (mut min, mut max) = (corners[0], corners[0]);
        for Coord { x, y } in &corners[1..] {
            min.x = min.x.min(*x);
            min.y = min.y.min(*y);
            max.x = max.x.max(*x);
            max.y = max.y.max(*y);
        }
        Rect::new(min, max)
    }

    /// The ground covered by this grid.
    pub fn footprint(&self) -> Polygon<C> {
        let mut ring: Vec<Coord<C>> = self.corners().to_vec();
        ring.push(ring[0]);
        Polygon::new(LineString::from(ring), vec![])
    }

    /// Returns a copy of the samples under `window` with a matching
    /// transform.
    pub fn window(&self, window: Window) -> Result<Self, ElevationError> {
        let (rows, cols) = self.dimensions;
        let Window {
            row_off,
            col_off,
            rows: w_rows,
            cols: w_cols,
        } = window;
        if window.is_empty() || row_off + w_rows > rows || col_off + w_cols > cols {
            return Err(ElevationError::Shape {
                len: window.len(),
                rows,
                cols,
            });
        }
        let mut samples = Vec::with_capacity(window.len());
        for row in row_off..row_off + w_rows {
            let start = row * cols + col_off;
            samples.extend_from_slice(&self.samples[start..start + w_cols]);
        }
        Ok(Self {
            dimensions: (w_rows, w_cols),
            samples: samples.into_boxed_slice(),
            transform: self.transform.shifted(row_off, col_off),
            crs: self.crs.clone(),
            nodata: self.nodata,
        })
    }

    /// Returns a grid with the same georeferencing and `samples`.
    pub fn with_samples(&self, samples: Vec<C>) -> Result<Self, ElevationError> {
        let (rows, cols) = self.dimensions;
        Self::new(
            rows,
            cols,
            samples,
            self.transform,
            self.crs.clone(),
            self.nodata,
        )
    }

    /// Returns the lowest valid sample in this grid.
    pub fn min_elevation(&self) -> Option<C> {
        self.valid_samples().reduce(C::min)
    }

    /// Returns the highest valid sample in this grid.
    pub fn max_elevation(&self) -> Option<C> {
        self.valid_samples().reduce(C::max)
    }

    /// Returns an iterator over `self`'s samples.
    pub fn iter(&self) -> impl Iterator<Item = Sample<'_>> + '_ {
        (0..self.samples.len()).map(|index| Sample { grid: self, index })
    }

    fn valid_samples(&self) -> impl Iterator<Item = C> + '_ {
        self.samples.iter().copied().filter(|v| self.is_valid(*v))
    }
}

/// An elevation sample and its location.
pub struct Sample<'a> {
    /// The parent [ElevationGrid] this sample belongs to.
    grid: &'a ElevationGrid,
    /// Row-major index into the parent's samples.
    index: usize,
}

impl<'a> Sample<'a> {
    pub fn row(&self) -> usize {
        self.index / self.grid.cols()
    }

    pub fn col(&self) -> usize {
        self.index % self.grid.cols()
    }

    pub fn elevation(&self) -> C {
        self.grid.samples[self.index]
    }

    pub fn is_valid(&self) -> bool {
        self.grid.is_valid(self.elevation())
    }

    pub fn center(&self) -> Coord<C> {
        self.grid.transform.cell_center(self.row(), self.col())
    }

    /// The cell outline in world coordinates.
    #[allow(clippy::cast_precision_loss)]
    pub fn polygon(&self) -> Polygon<C> {
        let (row, col) = (self.row() as C, self.col() as C);
        let gt = &self.grid.transform;
        let nw = gt.apply(col, row);
        let ne = gt.apply(col + 1.0, row);
        let se = gt.apply(col + 1.0, row + 1.0);
        let sw = gt.apply(col, row + 1.0);
        polygon![
            (x: nw.x, y: nw.y),
            (x: ne.x, y: ne.y),
            (x: se.x, y: se.y),
            (x: sw.x, y: sw.y),
            (x: nw.x, y: nw.y),
        ]
    }
}
