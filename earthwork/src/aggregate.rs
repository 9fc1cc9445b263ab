//! Integrating surface minus reference over masked cells.

use crate::{Mask, Reference};
use elevation::{ElevationGrid, C};
use serde::Serialize;
use std::ops::Add;

/// Area and volume figures for one polygon, in squared and cubed grid
/// units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Volumes {
    /// Ground covered by valid cells.
    pub area: C,

    /// Net volume, `positive + negative`.
    pub volume: C,

    /// Volume above the reference (cut).
    pub positive: C,

    /// Volume below the reference (fill), zero or negative.
    pub negative: C,

    /// Masked cells where both surface and reference are valid.
    pub valid_cells: usize,

    /// Masked cells dropped because either side is nodata.
    pub nodata_cells: usize,
}

impl Add for Volumes {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            area: self.area + other.area,
            volume: self.volume + other.volume,
            positive: self.positive + other.positive,
            negative: self.negative + other.negative,
            valid_cells: self.valid_cells + other.valid_cells,
            nodata_cells: self.nodata_cells + other.nodata_cells,
        }
    }
}

impl std::iter::Sum for Volumes {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Sums `window - reference` over the cells in `mask`, each weighing
/// `cell_area`.
///
/// `mask` and, for grid references, the reference grid must be
/// congruent with `window`.
pub fn aggregate(window: &ElevationGrid, reference: &Reference<'_>, mask: &Mask, cell_area: C) -> Volumes {
    let (rows, cols) = window.dimensions();
    let (mut positive, mut negative) = (0.0, 0.0);
    let (mut valid_cells, mut nodata_cells) = (0_usize, 0_usize);

    for row in 0..rows {
        for col in 0..cols {
            if !mask.get(row, col) {
                continue;
            }
            let (Some(surface), Some(reference)) = (window.value(row, col), reference.value(row, col)) else {
                nodata_cells += 1;
                continue;
            };
            valid_cells += 1;
            let diff = surface - reference;
            if diff > 0.0 {
                positive += diff;
            } else if diff < 0.0 {
                negative += diff;
            }
        }
    }

    let (positive, negative) = (positive * cell_area, negative * cell_area);
    #[allow(clippy::cast_precision_loss)]
    Volumes {
        area: valid_cells as C * cell_area,
        volume: positive + negative,
        positive,
        negative,
        valid_cells,
        nodata_cells,
    }
}
