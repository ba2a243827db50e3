//! Distance-based fare estimation.

use crate::models::location::GeoPoint;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Flat amount charged for every ride.
pub const BASE_FARE: f64 = 2.50;

pub const PER_KM_RATE: f64 = 1.50;

/// Great-circle distance between two points (haversine).
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.latitude.to_radians(), a.longitude.to_radians());
    let (lat2, lon2) = (b.latitude.to_radians(), b.longitude.to_radians());
    let sin_dlat = ((lat2 - lat1) * 0.5).sin();
    let sin_dlon = ((lon2 - lon1) * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// `BASE_FARE + PER_KM_RATE * km`, rounded to cents.
pub fn estimate(pickup: GeoPoint, destination: GeoPoint) -> f64 {
    let fare = BASE_FARE + distance_km(pickup, destination) * PER_KM_RATE;
    (fare * 100.0).round() / 100.0
}
