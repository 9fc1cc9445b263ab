//! Rasterizing polygons onto a grid's cells.
//!
//! A cell belongs to a polygon when its center lies inside the polygon
//! or exactly on its boundary. Holes are honored. All geometry is done
//! in the grid's pixel space, which keeps rotated and sheared grids
//! exact.

use elevation::{ElevationGrid, Window, C};
use geo::{
    geometry::{Coord, LineString, Rect},
    Intersects, MapCoords,
};

/// Relative distance under which a cell center counts as lying on an
/// edge.
const ON_EDGE_EPSILON: C = 1e-9;

/// Boolean grid congruent with a [`Clip`]'s window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    rows: usize,
    cols: usize,
    cells: Vec<bool>,
}

impl Mask {
    fn empty(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: vec![false; rows * cols],
        }
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> bool {
        row < self.rows && col < self.cols && self.cells[row * self.cols + col]
    }

    /// Number of cells inside the polygon.
    pub fn count(&self) -> usize {
        self.cells.iter().filter(|inside| **inside).count()
    }

    pub fn cells(&self) -> &[bool] {
        &self.cells
    }

    fn set(&mut self, row: usize, col: usize) {
        self.cells[row * self.cols + col] = true;
    }
}

/// The part of a grid under a polygon.
#[derive(Debug, Clone)]
pub struct Clip {
    /// Where `grid` sits in the source grid.
    pub window: Window,

    /// Samples under the polygon's bounding box, with a transform
    /// matching the window.
    pub grid: ElevationGrid,

    /// Cells of `grid` inside the polygon.
    pub mask: Mask,
}

/// Crops `grid` to `polygon` and masks the cells it covers.
///
/// Returns `None` when the polygon does not overlap the grid. A polygon
/// which overlaps the grid without covering any cell center returns an
/// empty mask.
pub fn clip(grid: &ElevationGrid, polygon: &geo::Polygon<C>) -> Option<Clip> {
    let inverse = grid.transform().inverse()?;
    let pixel = polygon.map_coords(|Coord { x, y }| inverse.apply(x, y));
    let window = pixel_window(grid, &pixel)?;

    let shifted = {
        #[allow(clippy::cast_precision_loss)]
        let (dx, dy) = (window.col_off as C, window.row_off as C);
        pixel.map_coords(|Coord { x, y }| Coord {
            x: x - dx,
            y: y - dy,
        })
    };
    let mut mask = Mask::empty(window.rows, window.cols);
    let rings: Vec<&LineString<C>> = std::iter::once(shifted.exterior())
        .chain(shifted.interiors())
        .collect();
    fill_even_odd(&mut mask, &rings);
    mark_boundary(&mut mask, &rings);

    let grid = grid.window(window).ok()?;
    Some(Clip { window, grid, mask })
}

/// The window of cells whose extent overlaps `pixel`'s bounding box.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn pixel_window(grid: &ElevationGrid, pixel: &geo::Polygon<C>) -> Option<Window> {
    let (rows, cols) = grid.dimensions();
    #[allow(clippy::cast_precision_loss)]
    let extent = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: cols as C, y: rows as C });
    if !pixel.intersects(&extent) {
        return None;
    }
    let (mut min, mut max) = (
        Coord {
            x: C::INFINITY,
            y: C::INFINITY,
        },
        Coord {
            x: C::NEG_INFINITY,
            y: C::NEG_INFINITY,
        },
    );
    for Coord { x, y } in pixel.exterior().coords() {
        min.x = min.x.min(*x);
        min.y = min.y.min(*y);
        max.x = max.x.max(*x);
        max.y = max.y.max(*y);
    }
    #[allow(clippy::cast_precision_loss)]
    let clamp = |v: C, hi: usize| v.clamp(0.0, hi as C) as usize;
    let (col_off, row_off) = (clamp(min.x.floor(), cols), clamp(min.y.floor(), rows));
    let (col_end, row_end) = (clamp(max.x.ceil(), cols), clamp(max.y.ceil(), rows));
    if col_end <= col_off || row_end <= row_off {
        return None;
    }
    Some(Window {
        row_off,
        col_off,
        rows: row_end - row_off,
        cols: col_end - col_off,
    })
}

/// Marks cells whose centers fall strictly inside `rings`, by the
/// even-odd rule along each row of centers.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn fill_even_odd(mask: &mut Mask, rings: &[&LineString<C>]) {
    let (rows, cols) = mask.dimensions();
    let mut crossings: Vec<C> = Vec::new();
    for row in 0..rows {
        let y = row as C + 0.5;
        crossings.clear();
        for line in rings.iter().flat_map(|ring| ring.lines()) {
            let (a, b) = (line.start, line.end);
            if (a.y > y) != (b.y > y) {
                crossings.push(a.x + (y - a.y) * (b.x - a.x) / (b.y - a.y));
            }
        }
        crossings.sort_by(C::total_cmp);
        for span in crossings.chunks_exact(2) {
            // Centers at col + 0.5 within [span[0], span[1]].
            let first = (span[0] - 0.5).ceil().max(0.0);
            let last = (span[1] - 0.5).floor().min(cols as C - 1.0);
            if last < first {
                continue;
            }
            for col in first as usize..=last as usize {
                mask.set(row, col);
            }
        }
    }
}

/// Marks cells whose centers lie on any edge of `rings`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn mark_boundary(mask: &mut Mask, rings: &[&LineString<C>]) {
    let (rows, cols) = mask.dimensions();
    for line in rings.iter().flat_map(|ring| ring.lines()) {
        let (a, b) = (line.start, line.end);
        let lo = |v: C, hi: usize| (v - 0.5).ceil().clamp(0.0, hi as C) as usize;
        let hi = |v: C, hi: usize| ((v - 0.5).floor() + 1.0).clamp(0.0, hi as C) as usize;
        let (c0, c1) = (lo(a.x.min(b.x), cols), hi(a.x.max(b.x), cols));
        let (r0, r1) = (lo(a.y.min(b.y), rows), hi(a.y.max(b.y), rows));
        for row in r0..r1 {
            for col in c0..c1 {
                let p = Coord {
                    x: col as C + 0.5,
                    y: row as C + 0.5,
                };
                if on_segment(p, a, b) {
                    mask.set(row, col);
                }
            }
        }
    }
}

fn on_segment(p: Coord<C>, a: Coord<C>, b: Coord<C>) -> bool {
    let (ab, ap) = (b - a, p - a);
    let len2 = ab.x * ab.x + ab.y * ab.y;
    if len2 == 0.0 {
        return ap.x.abs() <= ON_EDGE_EPSILON && ap.y.abs() <= ON_EDGE_EPSILON;
    }
    let cross = ab.x * ap.y - ab.y * ap.x;
    let dot = ab.x * ap.x + ab.y * ap.y;
    cross.abs() <= ON_EDGE_EPSILON * len2.sqrt().max(1.0) && dot >= 0.0 && dot <= len2
}
