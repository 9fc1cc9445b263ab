//! SRTM / NASADEM elevation (`.hgt`) tiles.
//!
//! Tiles are square grids of big-endian `i16` meters, 1201 or 3601
//! samples a side, named after their south-west corner. See the
//! [SRTM Collection User Guide](https://lpdaac.usgs.gov/documents/179/SRTM_User_Guide_V3.pdf).

use crate::{Crs, ElevationError, GeoTransform, RawGrid, C};
use byteorder::{BigEndian as BE, ReadBytesExt};
use geo::geometry::Coord;
use std::{
    ffi::OsStr,
    fs::File,
    io::{BufReader, Read},
    mem::size_of,
    path::Path,
};

const ARCSEC_PER_DEG: C = 3600.0;

/// Voids in SRTM data.
pub const HGT_NODATA: i16 = -32768;

/// Reads the `.hgt` file at `path`.
///
/// The tile's location comes from its name, e.g. `N44W072.hgt`.
pub(crate) fn load<P: AsRef<Path>>(path: P) -> Result<RawGrid, ElevationError> {
    let path = path.as_ref();
    let sw_corner = parse_sw_corner(path)?;
    let len = path.metadata()?.len();
    let (resolution, dimensions) = extract_resolution(len).ok_or_else(|| {
        ElevationError::HgtLen(len, path.to_owned())
    })?;
    let mut file = BufReader::new(File::open(path)?);
    decode(&mut file, sw_corner, resolution, dimensions)
}

/// Decodes a stream of HGT samples whose south-west sample center lies
/// on `sw_corner`.
pub(crate) fn read<R: Read>(mut rdr: R, sw_corner: Coord<i16>) -> Result<RawGrid, ElevationError> {
    let mut raw = Vec::new();
    rdr.read_to_end(&mut raw)?;
    let len = raw.len() as u64;
    let (resolution, dimensions) = extract_resolution(len)
        .ok_or_else(|| ElevationError::HgtLen(len, Path::new("<stream>").to_owned()))?;
    decode(&mut raw.as_slice(), sw_corner, resolution, dimensions)
}

fn decode<R: Read>(
    rdr: &mut R,
    sw_corner: Coord<i16>,
    resolution: u8,
    (rows, cols): (usize, usize),
) -> Result<RawGrid, ElevationError> {
    let mut samples = Vec::with_capacity(rows * cols);
    for _ in 0..(rows * cols) {
        let sample = rdr.read_i16::<BE>()?;
        samples.push(C::from(sample));
    }
    Ok(RawGrid {
        dimensions: (rows, cols),
        samples,
        transform: transform(sw_corner, resolution, rows),
        crs: Some(Crs::WGS84),
        nodata: Some(C::from(HGT_NODATA)),
    })
}

/// The first row is the northern edge. Sample centers sit on whole
/// degrees at the tile's edges, so the outer corner is half a sample
/// beyond them.
#[allow(clippy::cast_precision_loss)]
fn transform(sw_corner: Coord<i16>, resolution: u8, rows: usize) -> GeoTransform {
    let pixel = C::from(resolution) / ARCSEC_PER_DEG;
    let span = (rows - 1) as C * pixel;
    let origin = Coord {
        x: C::from(sw_corner.x) - pixel / 2.0,
        y: C::from(sw_corner.y) + span + pixel / 2.0,
    };
    GeoTransform::north_up(origin, pixel, pixel)
}

/// Returns `(arcseconds per sample, (rows, cols))` for a file of `len`
/// bytes.
fn extract_resolution(len: u64) -> Option<(u8, (usize, usize))> {
    const RES_1_ARCSECOND_LEN: u64 = 3601 * 3601 * size_of::<u16>() as u64;
    const RES_3_ARCSECOND_LEN: u64 = 1201 * 1201 * size_of::<u16>() as u64;
    match len {
        RES_1_ARCSECOND_LEN => Some((1, (3601, 3601))),
        RES_3_ARCSECOND_LEN => Some((3, (1201, 1201))),
        _ => None,
    }
}

/// Parses a tile name such as `N44W072` into its south-west corner.
pub(crate) fn parse_sw_corner<P: AsRef<Path>>(path: P) -> Result<Coord<i16>, ElevationError> {
    let path = path.as_ref();
    let stem = path.file_stem().and_then(OsStr::to_str).unwrap_or_default();
    let mk_err = || ElevationError::HgtName(path.to_owned());
    if stem.len() != 7 || !stem.is_ascii() {
        return Err(mk_err());
    }
    let (lat, lon) = stem.split_at(3);
    Ok(Coord {
        x: degrees(lon, ('E', 'W')).ok_or_else(mk_err)?,
        y: degrees(lat, ('N', 'S')).ok_or_else(mk_err)?,
    })
}

/// Parses a hemisphere letter followed by whole degrees, e.g. `W072`.
fn degrees(field: &str, (positive, negative): (char, char)) -> Option<i16> {
    let mut chars = field.chars();
    let hemisphere = chars.next()?.to_ascii_uppercase();
    let value = chars.as_str().parse::<i16>().ok()?;
    match hemisphere {
        h if h == positive => Some(value),
        h if h == negative => Some(-value),
        _ => None,
    }
}
