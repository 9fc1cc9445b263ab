use elevation::{ElevationError, GeoTransform};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Which input grid an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GridRole {
    /// The surface (DSM) being measured.
    Surface,
    /// The ground (DTM) subtracted from the surface.
    Reference,
}

impl fmt::Display for GridRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Surface => f.write_str("surface"),
            Self::Reference => f.write_str("reference"),
        }
    }
}

/// Errors which abort a whole analysis.
#[derive(Error, Debug)]
pub enum EarthworkError {
    #[error("missing required parameter '{0}'")]
    Builder(&'static str),

    #[error("can not load {role} grid: {source}")]
    GridLoad {
        role: GridRole,
        #[source]
        source: ElevationError,
    },

    #[error("{role} grid has a degenerate transform {transform:?}")]
    InvalidTransform {
        role: GridRole,
        transform: GeoTransform,
    },

    #[error("can not reproject {role} grid: {reason}")]
    Reprojection { role: GridRole, reason: String },

    #[error("unknown {kind} {value:?}")]
    Parse { kind: &'static str, value: String },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    GeoJson(#[from] geojson::Error),
}

impl EarthworkError {
    /// Attributes a grid decoding failure to `role`.
    pub fn load(role: GridRole, err: ElevationError) -> Self {
        match err {
            ElevationError::InvalidTransform(transform) => Self::InvalidTransform { role, transform },
            source => Self::GridLoad { role, source },
        }
    }

    /// Attributes a failure to move a grid into the metric system to
    /// `role`.
    pub fn reprojection(role: GridRole, err: &ReprojectError) -> Self {
        Self::Reprojection {
            role,
            reason: err.to_string(),
        }
    }
}

/// Problems confined to a single polygon.
///
/// These are recorded on the polygon's result and never abort the
/// batch.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PolygonError {
    #[error("polygon lies outside the grid extent")]
    OutsideExtent,

    #[error("none of the {vertices} boundary vertices fall on a valid cell")]
    BoundaryOutOfRange { vertices: usize },

    #[error("surface and reference grids are misaligned: {0}")]
    MisalignedGrids(String),

    #[error("can not reproject polygon: {0}")]
    Reprojection(String),
}

/// Errors from moving coordinates or grids between systems.
#[derive(Error, Debug)]
pub enum ReprojectError {
    #[error("{0}")]
    Proj(String),

    #[error("{0}")]
    Elevation(#[from] ElevationError),

    #[error("no finite coordinates after transforming to {0}")]
    Empty(String),
}
