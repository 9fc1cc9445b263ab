use crate::GeoTransform;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ElevationError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("invalid HGT name {0}")]
    HgtName(PathBuf),

    #[error("invalid HGT file len {0} for {1}")]
    HgtLen(u64, PathBuf),

    #[error("no coordinate reference system defined for {0}")]
    MissingCrs(String),

    #[error("unsupported coordinate reference system {0}")]
    UnsupportedCrs(String),

    #[error("can not parse {0:?} as a coordinate reference system")]
    ParseCrs(String),

    #[error("degenerate affine transform {0:?}")]
    InvalidTransform(GeoTransform),

    #[error("unsupported raster layout: {0}")]
    Layout(String),

    #[error("{len} samples do not fill a {rows}x{cols} grid")]
    Shape { len: usize, rows: usize, cols: usize },
}
