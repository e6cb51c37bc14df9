//! Pure geometry: great-circle distance, radius containment, bounding box.
//! No I/O, no clock, no store access.

use serde::Serialize;

use crate::models::GeoPoint;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometers of latitude per degree (and of longitude at the equator).
const KM_PER_DEGREE: f64 = 111.0;

/// Floor for cos(lat) in the bounding-box longitude delta, so the box
/// stays finite near the poles.
const MIN_COS_LAT: f64 = 0.01;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GeoError {
    #[error("{field} out of range: {value}")]
    InvalidCoordinate { field: &'static str, value: f64 },
}

/// Rejects out-of-range or non-finite coordinates before any distance math.
pub fn validate_point(p: &GeoPoint) -> Result<(), GeoError> {
    if !p.latitude.is_finite() || !(-90.0..=90.0).contains(&p.latitude) {
        return Err(GeoError::InvalidCoordinate {
            field: "latitude",
            value: p.latitude,
        });
    }
    if !p.longitude.is_finite() || !(-180.0..=180.0).contains(&p.longitude) {
        return Err(GeoError::InvalidCoordinate {
            field: "longitude",
            value: p.longitude,
        });
    }
    Ok(())
}

/// Haversine great-circle distance in kilometers.
pub fn distance_km(a: &GeoPoint, b: &GeoPoint) -> Result<f64, GeoError> {
    validate_point(a)?;
    validate_point(b)?;

    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();
    Ok(EARTH_RADIUS_KM * c)
}

pub fn is_within_radius(center: &GeoPoint, point: &GeoPoint, radius_km: f64) -> Result<bool, GeoError> {
    Ok(distance_km(center, point)? <= radius_km)
}

/// Rectangular prefilter for radius queries. Wider than the true circle;
/// candidates still need the exact `is_within_radius` check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn contains(&self, p: &GeoPoint) -> bool {
        p.latitude >= self.min_lat
            && p.latitude <= self.max_lat
            && p.longitude >= self.min_lng
            && p.longitude <= self.max_lng
    }
}

pub fn bounding_box(center: &GeoPoint, radius_km: f64) -> Result<BoundingBox, GeoError> {
    validate_point(center)?;
    let lat_delta = radius_km / KM_PER_DEGREE;
    let cos_lat = center.latitude.to_radians().cos().max(MIN_COS_LAT);
    let lng_delta = radius_km / (KM_PER_DEGREE * cos_lat);
    Ok(BoundingBox {
        min_lat: (center.latitude - lat_delta).max(-90.0),
        max_lat: (center.latitude + lat_delta).min(90.0),
        min_lng: (center.longitude - lng_delta).max(-180.0),
        max_lng: (center.longitude + lng_delta).min(180.0),
    })
}
