//! Bounding boxes and CRS identifiers.
//!
//! Reprojection is left to the backend (PostGIS). This module only parses CRS
//! identifiers into EPSG codes and computes GeoJSON envelopes for in-memory
//! bbox tests.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// OGC longitude/latitude WGS 84, the default CRS of published features.
pub const CRS84: &str = "http://www.opengis.net/def/crs/OGC/1.3/CRS84";

/// SRID of WGS 84.
pub const WGS84_SRID: i32 = 4326;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("Invalid bbox '{0}': expected minx,miny,maxx,maxy")]
    InvalidBbox(String),

    #[error("Invalid bbox '{0}': min must not exceed max")]
    InvertedBbox(String),

    #[error("Unsupported CRS '{0}'")]
    UnsupportedCrs(String),
}

/// EPSG code of a CRS identifier.
///
/// Accepts `EPSG:n`, `urn:ogc:def:crs:EPSG::n`, the OGC `.../crs/EPSG/0/n`
/// URI and the CRS84 identifiers (mapped to 4326).
pub fn epsg_code(crs: &str) -> Result<i32, GeometryError> {
    let crs = crs.trim();
    if crs.eq_ignore_ascii_case("CRS84") || crs == CRS84 || crs.ends_with("OGC:1.3:CRS84") {
        return Ok(WGS84_SRID);
    }

    let upper = crs.to_ascii_uppercase();
    let code = if let Some(rest) = upper.strip_prefix("EPSG:") {
        rest
    } else if let Some(rest) = upper.strip_prefix("URN:OGC:DEF:CRS:EPSG:") {
        rest.rsplit(':').next().unwrap_or_default()
    } else if upper.contains("/CRS/EPSG/") {
        upper.rsplit('/').next().unwrap_or_default()
    } else {
        crs
    };

    code.parse::<i32>()
        .ok()
        .filter(|code| *code > 0)
        .ok_or_else(|| GeometryError::UnsupportedCrs(crs.to_string()))
}

/// `EPSG:n` form of an SRID.
pub fn srs_name(srid: i32) -> String {
    format!("EPSG:{}", srid)
}

/// OGC URI of an SRID.
pub fn crs_uri(srid: i32) -> String {
    format!("http://www.opengis.net/def/crs/EPSG/0/{}", srid)
}

/// Axis-aligned envelope, optionally tagged with its CRS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
            crs: None,
        }
    }

    pub fn with_crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }

    /// SRID of the box, WGS 84 when no CRS is given.
    pub fn srid(&self) -> Result<i32, GeometryError> {
        match &self.crs {
            Some(crs) => epsg_code(crs),
            None => Ok(WGS84_SRID),
        }
    }

    /// Envelopes touching on an edge intersect.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    /// Envelope of a GeoJSON geometry, `None` for empty or malformed input.
    pub fn of_geojson(geometry: &Value) -> Option<Self> {
        let mut envelope: Option<Self> = None;
        collect_positions(geometry, &mut |x, y| {
            envelope = Some(match envelope.take() {
                None => Self::new(x, y, x, y),
                Some(b) => Self::new(b.min_x.min(x), b.min_y.min(y), b.max_x.max(x), b.max_y.max(y)),
            });
        });
        envelope
    }
}

fn collect_positions(geometry: &Value, visit: &mut impl FnMut(f64, f64)) {
    if let Some(members) = geometry.get("geometries").and_then(Value::as_array) {
        for member in members {
            collect_positions(member, visit);
        }
        return;
    }
    if let Some(coordinates) = geometry.get("coordinates") {
        walk_coordinates(coordinates, visit);
    }
}

fn walk_coordinates(value: &Value, visit: &mut impl FnMut(f64, f64)) {
    let Some(items) = value.as_array() else {
        return;
    };
    match (items.first().and_then(Value::as_f64), items.get(1).and_then(Value::as_f64)) {
        (Some(x), Some(y)) => visit(x, y),
        _ => items.iter().for_each(|item| walk_coordinates(item, visit)),
    }
}

impl FromStr for BoundingBox {
    type Err = GeometryError;

    /// Parses `minx,miny,maxx,maxy`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| GeometryError::InvalidBbox(s.to_string()))?;
        let [min_x, min_y, max_x, max_y] = values[..] else {
            return Err(GeometryError::InvalidBbox(s.to_string()));
        };
        if min_x > max_x || min_y > max_y {
            return Err(GeometryError::InvertedBbox(s.to_string()));
        }
        Ok(Self::new(min_x, min_y, max_x, max_y))
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.min_x, self.min_y, self.max_x, self.max_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_crs_identifiers() {
        assert_eq!(epsg_code("EPSG:2154").unwrap(), 2154);
        assert_eq!(epsg_code("epsg:3857").unwrap(), 3857);
        assert_eq!(epsg_code("urn:ogc:def:crs:EPSG::3857").unwrap(), 3857);
        assert_eq!(
            epsg_code("http://www.opengis.net/def/crs/EPSG/0/2154").unwrap(),
            2154
        );
        assert_eq!(epsg_code(CRS84).unwrap(), 4326);
        assert_eq!(epsg_code("CRS84").unwrap(), 4326);
        assert!(matches!(
            epsg_code("WGS84"),
            Err(GeometryError::UnsupportedCrs(_))
        ));
    }

    #[test]
    fn parses_bbox() {
        let bbox: BoundingBox = "2.9, 50.5,3.2,50.7".parse().unwrap();
        assert_eq!(bbox, BoundingBox::new(2.9, 50.5, 3.2, 50.7));
        assert_eq!(bbox.srid().unwrap(), 4326);
        assert_eq!(bbox.to_string(), "2.9,50.5,3.2,50.7");
    }

    #[test]
    fn rejects_malformed_bbox() {
        assert!(matches!(
            "1,2,3".parse::<BoundingBox>(),
            Err(GeometryError::InvalidBbox(_))
        ));
        assert!(matches!(
            "a,2,3,4".parse::<BoundingBox>(),
            Err(GeometryError::InvalidBbox(_))
        ));
        assert!(matches!(
            "3,2,1,4".parse::<BoundingBox>(),
            Err(GeometryError::InvertedBbox(_))
        ));
    }

    #[test]
    fn envelope_of_nested_geometries() {
        let polygon = json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [4.0, 0.0], [4.0, 3.0], [0.0, 0.0]]]
        });
        assert_eq!(
            BoundingBox::of_geojson(&polygon),
            Some(BoundingBox::new(0.0, 0.0, 4.0, 3.0))
        );

        let collection = json!({
            "type": "GeometryCollection",
            "geometries": [
                {"type": "Point", "coordinates": [-1.0, 5.0]},
                {"type": "Point", "coordinates": [2.0, -2.0]}
            ]
        });
        assert_eq!(
            BoundingBox::of_geojson(&collection),
            Some(BoundingBox::new(-1.0, -2.0, 2.0, 5.0))
        );

        assert_eq!(BoundingBox::of_geojson(&json!({"type": "Point"})), None);
    }

    #[test]
    fn intersection_includes_touching_edges() {
        let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        assert!(a.intersects(&BoundingBox::new(1.0, 1.0, 2.0, 2.0)));
        assert!(a.intersects(&BoundingBox::new(0.2, 0.2, 0.4, 0.4)));
        assert!(!a.intersects(&BoundingBox::new(1.1, 0.0, 2.0, 1.0)));
    }
}
