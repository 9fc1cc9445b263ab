//! Single band GeoTIFF decoding and encoding.
//!
//! # References
//!
//! 1. [GeoTIFF 1.1 (OGC 19-008r4)](https://docs.ogc.org/is/19-008r4/19-008r4.html)
//! 1. [GDAL_NODATA](https://gdal.org/drivers/raster/gtiff.html#nodata-value)

use crate::{Crs, ElevationError, ElevationGrid, GeoTransform, RawGrid, C};
use log::debug;
use num_traits::AsPrimitive;
use std::{
    fs::File,
    io::{BufWriter, Read, Seek},
    path::Path,
};
use tiff::{
    decoder::{Decoder, DecodingResult, Limits},
    encoder::{colortype, TiffEncoder},
    tags::Tag,
};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const RASTER_PIXEL_IS_POINT: u16 = 2;
const USER_DEFINED: u16 = 32767;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Decodes the first band of a GeoTIFF.
///
/// Georeferencing that is absent decodes as the identity transform
/// and no CRS; callers decide what to do about it.
pub(crate) fn read<R: Read + Seek>(rdr: R) -> Result<RawGrid, ElevationError> {
    let mut decoder = Decoder::new(rdr)?.with_limits(Limits::unlimited());
    let (width, height) = decoder.dimensions()?;
    let (rows, cols) = (height as usize, width as usize);

    let geo_keys = match decoder.find_tag(tag(GEO_KEY_DIRECTORY))? {
        Some(value) => GeoKeys::parse(&value.into_u16_vec()?),
        None => GeoKeys::default(),
    };

    let mut transform = match decoder.find_tag(tag(MODEL_TRANSFORMATION))? {
        Some(value) => from_model_transformation(&value.into_f64_vec()?)?,
        None => {
            let tiepoint = decoder.find_tag(tag(MODEL_TIEPOINT))?;
            let scale = decoder.find_tag(tag(MODEL_PIXEL_SCALE))?;
            match (tiepoint, scale) {
                (Some(tiepoint), Some(scale)) => {
                    from_tiepoint(&tiepoint.into_f64_vec()?, &scale.into_f64_vec()?)?
                }
                _ => GeoTransform::IDENTITY,
            }
        }
    };
    if geo_keys.raster_type == Some(RASTER_PIXEL_IS_POINT) && !transform.is_identity() {
        let corner = transform.apply(-0.5, -0.5);
        transform.c = corner.x;
        transform.f = corner.y;
    }

    let nodata = match decoder.find_tag(tag(GDAL_NODATA))? {
        Some(value) => parse_nodata(&value.into_string()?),
        None => None,
    };

    let samples = widen(decoder.read_image()?, rows * cols)?;
    debug!(
        "geotiff; dims: {rows}x{cols}, crs: {:?}, nodata: {nodata:?}",
        geo_keys.crs()
    );

    Ok(RawGrid {
        dimensions: (rows, cols),
        samples,
        transform,
        crs: geo_keys.crs(),
        nodata,
    })
}

/// Writes `grid` as a 64-bit float GeoTIFF at `path`.
///
/// Only EPSG identified systems can be written.
pub fn write<P: AsRef<Path>>(grid: &ElevationGrid, path: P) -> Result<(), ElevationError> {
    let code = grid
        .crs()
        .epsg()
        .and_then(|code| u16::try_from(code).ok())
        .ok_or_else(|| ElevationError::UnsupportedCrs(grid.crs().to_string()))?;
    let (model_type, crs_key) = if grid.crs().is_geographic() {
        (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE)
    } else {
        (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE)
    };
    #[rustfmt::skip]
    let geo_keys: [u16; 16] = [
        1, 1, 0, 3,
        GT_MODEL_TYPE, 0, 1, model_type,
        GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
        crs_key, 0, 1, code,
    ];

    let (rows, cols) = grid.dimensions();
    let (width, height) = (
        u32::try_from(cols).map_err(|_| ElevationError::Layout(format!("{cols} columns")))?,
        u32::try_from(rows).map_err(|_| ElevationError::Layout(format!("{rows} rows")))?,
    );

    let file = BufWriter::new(File::create(path)?);
    let mut encoder = TiffEncoder::new(file)?;
    let mut image = encoder.new_image::<colortype::Gray64Float>(width, height)?;
    let gt = grid.transform();
    if gt.is_axis_aligned() {
        let scale = [gt.a, -gt.e, 0.0];
        let tiepoint = [0.0, 0.0, 0.0, gt.c, gt.f, 0.0];
        image.encoder().write_tag(tag(MODEL_PIXEL_SCALE), &scale[..])?;
        image.encoder().write_tag(tag(MODEL_TIEPOINT), &tiepoint[..])?;
    } else {
        #[rustfmt::skip]
        let matrix = [
            gt.a, gt.b, 0.0, gt.c,
            gt.d, gt.e, 0.0, gt.f,
            0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        image.encoder().write_tag(tag(MODEL_TRANSFORMATION), &matrix[..])?;
    }
    image.encoder().write_tag(tag(GEO_KEY_DIRECTORY), &geo_keys[..])?;
    if let Some(nodata) = grid.nodata() {
        let nodata = nodata.to_string();
        image.encoder().write_tag(tag(GDAL_NODATA), nodata.as_str())?;
    }
    image.write_data(grid.samples())?;
    Ok(())
}

/// The GeoKeys we care about.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct GeoKeys {
    model_type: Option<u16>,
    raster_type: Option<u16>,
    geographic: Option<u16>,
    projected: Option<u16>,
}

impl GeoKeys {
    /// Parses a `GeoKeyDirectoryTag`, ignoring keys stored in other
    /// tags.
    fn parse(dir: &[u16]) -> Self {
        let mut keys = Self::default();
        let count = dir.get(3).copied().unwrap_or(0) as usize;
        for entry in dir.get(4..).unwrap_or_default().chunks_exact(4).take(count) {
            let (id, location, value) = (entry[0], entry[1], entry[3]);
            if location != 0 {
                continue;
            }
            match id {
                GT_MODEL_TYPE => keys.model_type = Some(value),
                GT_RASTER_TYPE => keys.raster_type = Some(value),
                GEOGRAPHIC_TYPE => keys.geographic = Some(value),
                PROJECTED_CS_TYPE => keys.projected = Some(value),
                _ => (),
            }
        }
        keys
    }

    fn crs(&self) -> Option<Crs> {
        let defined = |code: Option<u16>| code.filter(|c| *c != 0 && *c != USER_DEFINED);
        match self.model_type {
            Some(MODEL_TYPE_GEOGRAPHIC) => defined(self.geographic),
            _ => defined(self.projected).or_else(|| defined(self.geographic)),
        }
        .map(|code| Crs::Epsg(u32::from(code)))
    }
}

fn from_model_transformation(m: &[f64]) -> Result<GeoTransform, ElevationError> {
    if m.len() < 8 {
        return Err(ElevationError::Layout(format!(
            "ModelTransformationTag has {} values",
            m.len()
        )));
    }
    Ok(GeoTransform::new(m[0], m[1], m[3], m[4], m[5], m[7]))
}

fn from_tiepoint(tiepoint: &[f64], scale: &[f64]) -> Result<GeoTransform, ElevationError> {
    if tiepoint.len() < 6 || scale.len() < 2 {
        return Err(ElevationError::Layout(format!(
            "{} tiepoint and {} scale values",
            tiepoint.len(),
            scale.len()
        )));
    }
    let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
    let (sx, sy) = (scale[0], scale[1]);
    Ok(GeoTransform::new(sx, 0.0, x - i * sx, 0.0, -sy, y + j * sy))
}

fn parse_nodata(raw: &str) -> Option<C> {
    raw.trim_matches(char::from(0)).trim().parse().ok()
}

/// Converts decoded samples to `C`, keeping the first sample of each
/// pixel.
fn widen(image: DecodingResult, pixels: usize) -> Result<Vec<C>, ElevationError> {
    fn first_band<T: AsPrimitive<C>>(data: Vec<T>, pixels: usize) -> Result<Vec<C>, ElevationError> {
        if pixels == 0 || data.len() % pixels != 0 {
            return Err(ElevationError::Layout(format!(
                "{} samples for {pixels} pixels",
                data.len()
            )));
        }
        let stride = data.len() / pixels;
        Ok(data.into_iter().step_by(stride).map(|v| v.as_()).collect())
    }

    match image {
        DecodingResult::U8(data) => first_band(data, pixels),
        DecodingResult::U16(data) => first_band(data, pixels),
        DecodingResult::U32(data) => first_band(data, pixels),
        DecodingResult::U64(data) => first_band(data, pixels),
        DecodingResult::I8(data) => first_band(data, pixels),
        DecodingResult::I16(data) => first_band(data, pixels),
        DecodingResult::I32(data) => first_band(data, pixels),
        DecodingResult::I64(data) => first_band(data, pixels),
        DecodingResult::F32(data) => first_band(data, pixels),
        DecodingResult::F64(data) => first_band(data, pixels),
    }
}
