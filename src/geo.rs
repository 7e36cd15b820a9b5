/// GeoJSON geometry handling and distance computation.
///
/// Geometries are stored and echoed verbatim as GeoJSON; parsing validates
/// shape and WGS84 coordinate ranges before anything touches the database.
/// Distances use the haversine formula, which is the canonical server-side
/// computation (client-supplied distances are ignored).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// GeoJSON geometry as received from and returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Value,
}

/// Longitude/latitude pair, GeoJSON axis order.
pub type Position = (f64, f64);

/// Geographic extent of a geometry, used for bounding-box filtering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

fn position(value: &Value) -> Result<Position, ValidationError> {
    let pair = value
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| invalid("coordinates must be [lng, lat] pairs"))?;
    let lng = pair[0].as_f64().ok_or_else(|| invalid("longitude must be a number"))?;
    let lat = pair[1].as_f64().ok_or_else(|| invalid("latitude must be a number"))?;
    if !(-180.0..=180.0).contains(&lng) {
        return Err(invalid("longitude must be between -180 and 180"));
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(invalid("latitude must be between -90 and 90"));
    }
    Ok((lng, lat))
}

fn invalid(msg: &str) -> ValidationError {
    ValidationError::InvalidFormat(msg.to_string())
}

/// Parses a GeoJSON Point geometry.
pub fn parse_point(geometry: &Geometry) -> Result<Position, ValidationError> {
    if geometry.kind != "Point" {
        return Err(invalid("Expected GeoJSON Point geometry"));
    }
    position(&geometry.coordinates)
}

/// Parses a GeoJSON LineString geometry (at least two positions).
pub fn parse_line_string(geometry: &Geometry) -> Result<Vec<Position>, ValidationError> {
    if geometry.kind != "LineString" {
        return Err(invalid("Expected GeoJSON LineString geometry"));
    }
    let coords = geometry
        .coordinates
        .as_array()
        .filter(|a| a.len() >= 2)
        .ok_or_else(|| invalid("LineString requires at least two positions"))?;
    coords.iter().map(position).collect()
}

fn haversine_km(a: Position, b: Position) -> f64 {
    let (lng1, lat1) = a;
    let (lng2, lat2) = b;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Total length of a polyline in kilometers.
pub fn line_distance_km(points: &[Position]) -> f64 {
    points
        .windows(2)
        .map(|pair| haversine_km(pair[0], pair[1]))
        .sum()
}

/// Extent of a non-empty set of positions.
pub fn bounding_box(points: &[Position]) -> BoundingBox {
    let mut bbox = BoundingBox {
        min_lng: f64::MAX,
        min_lat: f64::MAX,
        max_lng: f64::MIN,
        max_lat: f64::MIN,
    };
    for &(lng, lat) in points {
        bbox.min_lng = bbox.min_lng.min(lng);
        bbox.min_lat = bbox.min_lat.min(lat);
        bbox.max_lng = bbox.max_lng.max(lng);
        bbox.max_lat = bbox.max_lat.max(lat);
    }
    bbox
}

/// Parses a `minLng,minLat,maxLng,maxLat` query parameter.
pub fn parse_bbox(raw: &str) -> Result<BoundingBox, ValidationError> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(invalid("bbox must be minLng,minLat,maxLng,maxLat"));
    }
    let mut values = [0.0f64; 4];
    for (i, part) in parts.iter().enumerate() {
        values[i] = part
            .parse()
            .map_err(|_| invalid("bbox values must be numbers"))?;
    }
    let [min_lng, min_lat, max_lng, max_lat] = values;
    if min_lng >= max_lng || min_lat >= max_lat {
        return Err(invalid("bbox min must be < max"));
    }
    Ok(BoundingBox {
        min_lng,
        min_lat,
        max_lng,
        max_lat,
    })
}
