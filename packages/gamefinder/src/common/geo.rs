use serde::{Deserialize, Serialize};

/// Mean Earth radius used for all great-circle distances.
pub const EARTH_RADIUS_MILES: f64 = 3958.8;

/// A WGS84 point, longitude first as in GeoJSON.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Great-circle distance to `other` in miles.
    pub fn distance_miles(&self, other: &GeoPoint) -> f64 {
        haversine_miles(self, other)
    }

    /// Whether `other` lies within `radius_miles` (inclusive).
    pub fn within_miles(&self, other: &GeoPoint, radius_miles: f64) -> bool {
        self.distance_miles(other) <= radius_miles
    }
}

/// Calculate distance between two points in miles
///
/// Uses the Haversine formula, not a flat-earth approximation: radius checks up
/// to 500 miles are sensitive to curvature.
pub fn haversine_miles(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlng = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (dlng / 2.0).sin().powi(2);

    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_MILES * c
}
