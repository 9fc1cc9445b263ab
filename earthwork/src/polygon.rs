//! Polygons of interest and their GeoJSON representation.

use crate::EarthworkError;
use elevation::{Crs, C};
use geojson::{feature::Id, Feature, FeatureCollection, GeoJson, Geometry, JsonObject, JsonValue};
use log::warn;
use std::io::Read;

/// A polygon to measure, as authored by the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    /// Identifies this polygon in results.
    pub id: String,

    /// Exterior ring and holes.
    pub geometry: geo::Polygon<C>,

    /// System `geometry` is expressed in.
    pub crs: Crs,

    /// Feature properties, carried through to results untouched.
    pub attributes: JsonObject,
}

impl Polygon {
    pub fn new(id: impl Into<String>, geometry: geo::Polygon<C>, crs: Crs) -> Self {
        Self {
            id: id.into(),
            geometry,
            crs,
            attributes: JsonObject::new(),
        }
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: JsonObject) -> Self {
        self.attributes = attributes;
        self
    }

    /// Returns a copy with the same identity over `geometry`.
    #[must_use]
    pub fn with_geometry(&self, geometry: geo::Polygon<C>, crs: Crs) -> Self {
        Self {
            id: self.id.clone(),
            geometry,
            crs,
            attributes: self.attributes.clone(),
        }
    }

    pub fn to_feature(&self) -> Feature {
        Feature {
            bbox: None,
            geometry: Some(Geometry::new(geojson::Value::from(&self.geometry))),
            id: Some(Id::String(self.id.clone())),
            properties: Some(self.attributes.clone()),
            foreign_members: None,
        }
    }
}

/// Reads every polygon in a GeoJSON document.
pub fn read_geojson<R: Read>(rdr: R) -> Result<Vec<Polygon>, EarthworkError> {
    let geojson = GeoJson::from_reader(rdr).map_err(geojson::Error::from)?;
    parse_geojson(&geojson)
}

/// Extracts polygons from a `FeatureCollection`, `Feature`, or bare
/// geometry.
///
/// `MultiPolygon` parts become separate polygons with ids suffixed
/// `#0`, `#1`, ... . Other geometry types are skipped. Coordinates are
/// taken to be CRS84 unless the document carries a legacy `crs`
/// member.
pub fn parse_geojson(geojson: &GeoJson) -> Result<Vec<Polygon>, EarthworkError> {
    let mut polygons = Vec::new();
    match geojson {
        GeoJson::FeatureCollection(FeatureCollection {
            features,
            foreign_members,
            ..
        }) => {
            let crs = legacy_crs(foreign_members.as_ref())?.unwrap_or(Crs::WGS84);
            for (idx, feature) in features.iter().enumerate() {
                let crs = legacy_crs(feature.foreign_members.as_ref())?.unwrap_or_else(|| crs.clone());
                from_feature(feature, idx, &crs, &mut polygons)?;
            }
        }
        GeoJson::Feature(feature) => {
            let crs = legacy_crs(feature.foreign_members.as_ref())?.unwrap_or(Crs::WGS84);
            from_feature(feature, 0, &crs, &mut polygons)?;
        }
        GeoJson::Geometry(geometry) => {
            let crs = legacy_crs(geometry.foreign_members.as_ref())?.unwrap_or(Crs::WGS84);
            from_geometry(
                geometry,
                "0".to_string(),
                &crs,
                &JsonObject::new(),
                &mut polygons,
            )?;
        }
    }
    Ok(polygons)
}

/// Wraps `polygons` in a `FeatureCollection`.
pub fn to_feature_collection(polygons: &[Polygon]) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: polygons.iter().map(Polygon::to_feature).collect(),
        foreign_members: None,
    }
}

fn from_feature(
    feature: &Feature,
    idx: usize,
    crs: &Crs,
    out: &mut Vec<Polygon>,
) -> Result<(), EarthworkError> {
    let attributes = feature.properties.clone().unwrap_or_default();
    let id = feature_id(feature, &attributes).unwrap_or_else(|| idx.to_string());
    match &feature.geometry {
        Some(geometry) => from_geometry(geometry, id, crs, &attributes, out),
        None => {
            warn!("feature {id} has no geometry, skipping");
            Ok(())
        }
    }
}

fn from_geometry(
    geometry: &Geometry,
    id: String,
    crs: &Crs,
    attributes: &JsonObject,
    out: &mut Vec<Polygon>,
) -> Result<(), EarthworkError> {
    match geo::Geometry::<C>::try_from(geometry.value.clone())? {
        geo::Geometry::Polygon(polygon) => {
            out.push(Polygon::new(id, polygon, crs.clone()).with_attributes(attributes.clone()));
        }
        geo::Geometry::MultiPolygon(multi) => {
            for (part, polygon) in multi.into_iter().enumerate() {
                out.push(
                    Polygon::new(format!("{id}#{part}"), polygon, crs.clone())
                        .with_attributes(attributes.clone()),
                );
            }
        }
        _ => warn!("feature {id} is not a polygon, skipping"),
    }
    Ok(())
}

fn feature_id(feature: &Feature, attributes: &JsonObject) -> Option<String> {
    match &feature.id {
        Some(Id::String(id)) => Some(id.clone()),
        Some(Id::Number(id)) => Some(id.to_string()),
        None => ["id", "name"]
            .iter()
            .find_map(|key| match attributes.get(*key) {
                Some(JsonValue::String(id)) => Some(id.clone()),
                Some(JsonValue::Number(id)) => Some(id.to_string()),
                _ => None,
            }),
    }
}

/// Reads `{"crs": {"type": "name", "properties": {"name": ...}}}`, if
/// present.
fn legacy_crs(members: Option<&JsonObject>) -> Result<Option<Crs>, EarthworkError> {
    let name = members
        .and_then(|members| members.get("crs"))
        .and_then(|crs| crs.get("properties"))
        .and_then(|properties| properties.get("name"))
        .and_then(JsonValue::as_str);
    match name {
        None => Ok(None),
        Some(name) => name.parse().map(Some).map_err(|_| EarthworkError::Parse {
            kind: "crs",
            value: name.to_owned(),
        }),
    }
}
