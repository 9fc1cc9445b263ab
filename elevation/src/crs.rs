//! Coordinate reference system identifiers.

use crate::ElevationError;
use std::{fmt, ops::RangeInclusive, str::FromStr};

/// EPSG's block of geographic 2D (degree based) systems.
const GEOGRAPHIC: RangeInclusive<u32> = 4000..=4999;

const WEB_MERCATOR: u32 = 3857;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Crs {
    /// A system identified by its EPSG code.
    Epsg(u32),

    /// A raw PROJ.4 definition, e.g. `+proj=utm +zone=30 ...`.
    Proj(String),
}

impl Crs {
    pub const WGS84: Self = Self::Epsg(4326);

    /// Returns the WGS84 UTM system for `zone` (clamped to 1..=60).
    pub fn utm(zone: u8, north: bool) -> Self {
        let zone = u32::from(zone.clamp(1, 60));
        if north {
            Self::Epsg(32600 + zone)
        } else {
            Self::Epsg(32700 + zone)
        }
    }

    pub fn epsg(&self) -> Option<u32> {
        match self {
            Self::Epsg(code) => Some(*code),
            Self::Proj(_) => None,
        }
    }

    /// Returns `(zone, north)` if this is a WGS84 UTM system.
    #[allow(clippy::cast_possible_truncation)]
    pub fn utm_zone(&self) -> Option<(u8, bool)> {
        match self {
            Self::Epsg(code @ 32601..=32660) => Some(((code - 32600) as u8, true)),
            Self::Epsg(code @ 32701..=32760) => Some(((code - 32700) as u8, false)),
            _ => None,
        }
    }

    /// True if coordinates are angles (degrees) rather than lengths.
    pub fn is_geographic(&self) -> bool {
        match self {
            Self::Epsg(code) => GEOGRAPHIC.contains(code),
            Self::Proj(def) => def.contains("+proj=longlat") || def.contains("+proj=latlong"),
        }
    }

    /// True if lengths and areas measured in this system are close to
    /// ground truth over a local area.
    ///
    /// Only systems known to be conformal or equal area projections in
    /// meters qualify; an EPSG code we can not describe does not. Web
    /// Mercator is projected but inflates areas by `1/cos²(lat)`.
    pub fn is_locally_metric(&self) -> bool {
        match self {
            Self::Epsg(_) => self.utm_zone().is_some(),
            Self::Proj(def) => {
                !self.is_geographic()
                    && !["+proj=merc", "+proj=webmerc", "+proj=geocent"]
                        .iter()
                        .any(|proj| def.contains(proj))
            }
        }
    }

    /// Returns a PROJ.4 definition for this system.
    pub fn to_proj_string(&self) -> Result<String, ElevationError> {
        let def = match self {
            Self::Proj(def) => def.clone(),
            Self::Epsg(4326) => "+proj=longlat +datum=WGS84 +no_defs".to_string(),
            Self::Epsg(4258) => "+proj=longlat +ellps=GRS80 +no_defs".to_string(),
            Self::Epsg(4269) => "+proj=longlat +datum=NAD83 +no_defs".to_string(),
            Self::Epsg(WEB_MERCATOR) => {
                "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs"
                    .to_string()
            }
            Self::Epsg(_) => match self.utm_zone() {
                Some((zone, north)) => {
                    let south = if north { "" } else { "+south " };
                    format!("+proj=utm +zone={zone} {south}+datum=WGS84 +units=m +no_defs")
                }
                None => return Err(ElevationError::UnsupportedCrs(self.to_string())),
            },
        };
        Ok(def)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Epsg(code) => write!(f, "EPSG:{code}"),
            Self::Proj(def) => f.write_str(def),
        }
    }
}

impl FromStr for Crs {
    type Err = ElevationError;

    /// Accepts `EPSG:4326`, `urn:ogc:def:crs:EPSG::4326`,
    /// `urn:ogc:def:crs:OGC:1.3:CRS84`, a bare code, or a `+proj=`
    /// definition.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mk_err = || ElevationError::ParseCrs(s.to_owned());
        let trimmed = s.trim();
        if trimmed.starts_with("+proj=") {
            return Ok(Self::Proj(trimmed.to_owned()));
        }
        let upper = trimmed.to_ascii_uppercase();
        if upper.ends_with("CRS84") {
            return Ok(Self::WGS84);
        }
        let code = if let Some(code) = upper.strip_prefix("EPSG:") {
            code
        } else if upper.starts_with("URN:OGC:DEF:CRS:EPSG:") {
            upper.rsplit(':').next().ok_or_else(mk_err)?
        } else {
            upper.as_str()
        };
        code.trim()
            .parse::<u32>()
            .map(Self::Epsg)
            .map_err(|_| mk_err())
    }
}

#[cfg(test)]
mod tests {
    use super::Crs;

    #[test]
    fn test_parse() {
        assert_eq!("EPSG:32630".parse::<Crs>().unwrap(), Crs::Epsg(32630));
        assert_eq!("epsg:4326".parse::<Crs>().unwrap(), Crs::WGS84);
        assert_eq!(
            "urn:ogc:def:crs:EPSG::2154".parse::<Crs>().unwrap(),
            Crs::Epsg(2154)
        );
        assert_eq!(
            "urn:ogc:def:crs:OGC:1.3:CRS84".parse::<Crs>().unwrap(),
            Crs::WGS84
        );
        assert_eq!("3857".parse::<Crs>().unwrap(), Crs::Epsg(3857));
        assert!(matches!(
            "+proj=utm +zone=30 +datum=WGS84".parse::<Crs>().unwrap(),
            Crs::Proj(_)
        ));
        assert!("not a crs".parse::<Crs>().is_err());
    }

    #[test]
    fn test_utm() {
        assert_eq!(Crs::utm(30, true), Crs::Epsg(32630));
        assert_eq!(Crs::utm(23, false), Crs::Epsg(32723));
        assert_eq!(Crs::Epsg(32723).utm_zone(), Some((23, false)));
        assert_eq!(Crs::WGS84.utm_zone(), None);
        assert_eq!(
            Crs::utm(30, false).to_proj_string().unwrap(),
            "+proj=utm +zone=30 +south +datum=WGS84 +units=m +no_defs"
        );
    }

    #[test]
    fn test_kinds() {
        assert!(Crs::WGS84.is_geographic());
        assert!(!Crs::WGS84.is_locally_metric());
        assert!(!Crs::Epsg(3857).is_locally_metric());
        assert!(Crs::utm(31, true).is_locally_metric());
        assert!(Crs::Epsg(2154).to_proj_string().is_err());

        // ED50 and RGF93 are in degrees even though we can not project them.
        assert!(Crs::Epsg(4230).is_geographic());
        assert!(Crs::Epsg(4171).is_geographic());
        assert!(!Crs::Epsg(4230).is_locally_metric());
        assert!(!Crs::Epsg(2154).is_locally_metric());
        assert!(Crs::Proj("+proj=utm +zone=31 +ellps=GRS80 +units=m".to_string()).is_locally_metric());
        assert!(!Crs::Proj("+proj=longlat +ellps=intl".to_string()).is_locally_metric());
        assert!(!Crs::Proj("+proj=merc +ellps=WGS84".to_string()).is_locally_metric());
        assert_eq!(Crs::Epsg(2154).to_string(), "EPSG:2154");
    }
}
