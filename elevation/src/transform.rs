//! Six-parameter affine mapping between grid indices and world
//! coordinates.

use crate::C;
use geo::geometry::{Coord, Rect};

/// Affine pixel-to-world transform.
///
/// ```text
/// x = a * col + b * row + c
/// y = d * col + e * row + f
/// ```
///
/// `(col, row)` are fractional pixel coordinates: `(0, 0)` is the
/// outer corner of the first sample, `(0.5, 0.5)` its center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub a: C,
    pub b: C,
    pub c: C,
    pub d: C,
    pub e: C,
    pub f: C,
}

impl GeoTransform {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 0.0,
        e: 1.0,
        f: 0.0,
    };

    pub fn new(a: C, b: C, c: C, d: C, e: C, f: C) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// Returns a north-up transform whose first sample's outer corner
    /// is `origin`.
    pub fn north_up(origin: Coord<C>, pixel_width: C, pixel_height: C) -> Self {
        Self::new(pixel_width, 0.0, origin.x, 0.0, -pixel_height, origin.y)
    }

    /// Returns the north-up transform which stretches a `cols` x
    /// `rows` grid over `bounds`.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_bounds(bounds: Rect<C>, cols: usize, rows: usize) -> Self {
        let pixel_width = bounds.width() / cols as C;
        let pixel_height = bounds.height() / rows as C;
        Self::north_up(
            Coord {
                x: bounds.min().x,
                y: bounds.max().y,
            },
            pixel_width,
            pixel_height,
        )
    }

    /// Builds a transform from GDAL's coefficient ordering.
    pub fn from_gdal([c, a, b, f, d, e]: [C; 6]) -> Self {
        Self::new(a, b, c, d, e, f)
    }

    pub fn to_gdal(&self) -> [C; 6] {
        [self.c, self.a, self.b, self.f, self.d, self.e]
    }

    pub fn determinant(&self) -> C {
        self.a * self.e - self.b * self.d
    }

    /// Area covered by one sample, in squared CRS units.
    ///
    /// Valid for rotated and sheared grids.
    pub fn pixel_area(&self) -> C {
        self.determinant().abs()
    }

    pub fn pixel_width(&self) -> C {
        self.a.abs()
    }

    pub fn pixel_height(&self) -> C {
        self.e.abs()
    }

    /// True if the grid has no rotation or shear terms.
    pub fn is_axis_aligned(&self) -> bool {
        self.b == 0.0 && self.d == 0.0
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// A transform is degenerate when it can not place samples on the
    /// ground: non-finite terms, a collapsed axis, or the identity
    /// that decoders report for rasters without georeferencing.
    pub fn is_degenerate(&self) -> bool {
        let terms = [self.a, self.b, self.c, self.d, self.e, self.f];
        terms.iter().any(|t| !t.is_finite()) || self.determinant() == 0.0 || self.is_identity()
    }

    /// World coordinate of fractional pixel position `(col, row)`.
    pub fn apply(&self, col: C, row: C) -> Coord<C> {
        Coord {
            x: self.a * col + self.b * row + self.c,
            y: self.d * col + self.e * row + self.f,
        }
    }

    /// World coordinate of the center of sample `(row, col)`.
    #[allow(clippy::cast_precision_loss)]
    pub fn cell_center(&self, row: usize, col: usize) -> Coord<C> {
        self.apply(col as C + 0.5, row as C + 0.5)
    }

    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let a = self.e / det;
        let b = -self.b / det;
        let d = -self.d / det;
        let e = self.a / det;
        let c = -(a * self.c + b * self.f);
        let f = -(d * self.c + e * self.f);
        Some(Self::new(a, b, c, d, e, f))
    }

    /// Fractional `(col, row)` of a world coordinate.
    pub fn to_pixel(&self, coord: Coord<C>) -> Option<(C, C)> {
        self.inverse().map(|inv| {
            let Coord { x: col, y: row } = inv.apply(coord.x, coord.y);
            (col, row)
        })
    }

    /// Transform of the window whose first sample is `(row_off,
    /// col_off)` in this grid.
    #[allow(clippy::cast_precision_loss)]
    pub fn shifted(&self, row_off: usize, col_off: usize) -> Self {
        let Coord { x: c, y: f } = self.apply(col_off as C, row_off as C);
        Self { c, f, ..*self }
    }

    /// Compares coefficients with a tolerance relative to the pixel
    /// size.
    pub fn approx_eq(&self, other: &Self, rel_tol: C) -> bool {
        let scale = self
            .pixel_width()
            .max(self.pixel_height())
            .max(self.b.abs())
            .max(self.d.abs());
        let tol = scale * rel_tol;
        (self.a - other.a).abs() <= tol
            && (self.b - other.b).abs() <= tol
            && (self.c - other.c).abs() <= tol
            && (self.d - other.d).abs() <= tol
            && (self.e - other.e).abs() <= tol
            && (self.f - other.f).abs() <= tol
    }
}
