use anyhow::{anyhow, Error as AnyError};
use clap::{Args, Parser, Subcommand, ValueEnum};
use earthwork::{ReferenceMode, Resampling};
use elevation::{Crs, GridSource};
use geo::geometry::{Coord, Rect};
use std::{path::PathBuf, str::FromStr};

/// Measure cut and fill volumes of elevation grids under polygons.
#[derive(Parser, Debug)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Area and volume of each polygon.
    Volume {
        /// Surface grid (GeoTIFF or .hgt) to measure.
        surface: PathBuf,

        /// GeoJSON file of polygons.
        #[arg(short, long)]
        polygons: PathBuf,

        /// Ground grid to subtract from the surface.
        #[arg(short, long)]
        reference: Option<PathBuf>,

        /// "difference", "scalar", or "boundary". Defaults to
        /// "difference" with a reference grid, "scalar" with an
        /// altitude, and "boundary" otherwise.
        #[arg(short, long)]
        mode: Option<ReferenceMode>,

        /// Reference altitude in meters for "scalar" mode.
        #[arg(short, long, allow_negative_numbers = true)]
        altitude: Option<f64>,

        /// Metric system to measure in, e.g. "EPSG:2154". Picked from
        /// the surface grid when omitted.
        #[arg(short, long)]
        target_crs: Option<Crs>,

        #[arg(long, default_value_t = Resampling::Nearest)]
        resampling: Resampling,

        /// Evaluate polygons one at a time.
        #[arg(long, default_value_t = false)]
        sequential: bool,

        /// Stage reprojected grids on disk.
        #[arg(long, default_value_t = false)]
        spill: bool,

        #[command(flatten)]
        grid: GridArgs,

        #[arg(value_enum, default_value_t = Format::Table)]
        format: Format,
    },

    /// Write a grid resampled into a metric system.
    Reproject {
        input: PathBuf,

        /// GeoTIFF file path.
        output: PathBuf,

        #[arg(short, long)]
        target_crs: Option<Crs>,

        #[arg(long, default_value_t = Resampling::Nearest)]
        resampling: Resampling,

        #[command(flatten)]
        grid: GridArgs,
    },

    /// Print a grid's georeferencing and elevation range.
    Info {
        grid_path: PathBuf,

        /// Print as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,

        #[command(flatten)]
        grid: GridArgs,
    },

    /// Report polygons in another system than the grid or outside it.
    Validate {
        grid_path: PathBuf,

        #[arg(short, long)]
        polygons: PathBuf,

        #[command(flatten)]
        grid: GridArgs,
    },

    /// Print a GeoJSON polygon for every cell above a threshold.
    Autodraw {
        grid_path: PathBuf,

        /// Elevation in meters cells must exceed.
        #[arg(long, allow_negative_numbers = true)]
        threshold: f64,

        #[command(flatten)]
        grid: GridArgs,
    },
}

/// How grids are decoded.
#[derive(Args, Debug, Clone)]
pub struct GridArgs {
    /// System for grids which do not declare one, e.g. "EPSG:32631".
    #[arg(long)]
    pub grid_crs: Option<Crs>,

    /// Overrides the grids' nodata value.
    #[arg(long, allow_negative_numbers = true)]
    pub nodata: Option<f64>,

    /// Grid extent "min_x,min_y,max_x,max_y", used when a grid's own
    /// georeferencing is unusable.
    #[arg(long)]
    pub bounds: Option<Bounds>,
}

impl GridArgs {
    pub fn source(&self) -> GridSource {
        let mut source = GridSource::new();
        if let Some(crs) = &self.grid_crs {
            source = source.fallback_crs(crs.clone());
        }
        if let Some(nodata) = self.nodata {
            source = source.nodata(nodata);
        }
        if let Some(Bounds(bounds)) = self.bounds {
            source = source.bounds(bounds);
        }
        source
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Bounds(pub Rect<f64>);

impl FromStr for Bounds {
    type Err = AnyError;
    fn from_str(s: &str) -> Result<Self, AnyError> {
        let values = s
            .split(',')
            .map(|v| f64::from_str(v.trim()))
            .collect::<Result<Vec<f64>, _>>()?;
        let [min_x, min_y, max_x, max_y] = values[..] else {
            return Err(anyhow!("not a valid min_x,min_y,max_x,max_y"));
        };
        Ok(Self(Rect::new(
            Coord { x: min_x, y: min_y },
            Coord { x: max_x, y: max_y },
        )))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Csv,
    Json,
    Table,
}
