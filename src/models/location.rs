use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::AppError;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Pickup or destination snapshot. Written once with its ride, never updated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Location {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLocation {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl NewLocation {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    /// Trims the name and checks coordinates are finite and on the globe.
    pub fn validated(self, field: &str) -> Result<Self, AppError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::validation(format!("{field}.name must not be empty")));
        }
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(AppError::validation(format!(
                "{field}.latitude must be between -90 and 90"
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(AppError::validation(format!(
                "{field}.longitude must be between -180 and 180"
            )));
        }
        Ok(Self { name, ..self })
    }
}
