use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use super::location::{Location, NewLocation};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub enum RideStatus {
    Searching,
    Matched,
    DriverArriving,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub const ALL: [RideStatus; 6] = [
        RideStatus::Searching,
        RideStatus::Matched,
        RideStatus::DriverArriving,
        RideStatus::InProgress,
        RideStatus::Completed,
        RideStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Searching => "searching",
            RideStatus::Matched => "matched",
            RideStatus::DriverArriving => "driverArriving",
            RideStatus::InProgress => "inProgress",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// Counts against the one-ride-at-a-time rule for riders.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Edges a generic update may take. `Searching -> Matched` is left to
    /// accept and auto-match, which assign the driver atomically.
    pub fn can_transition_to(&self, next: RideStatus) -> bool {
        use RideStatus::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Cancelled) => true,
            (Matched, DriverArriving) | (DriverArriving, InProgress) | (InProgress, Completed) => {
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Ride {
    pub id: String,
    pub rider_id: String,
    pub driver_id: Option<String>,
    pub pickup_location_id: String,
    pub destination_location_id: String,
    pub status: RideStatus,
    pub fare: Option<f64>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ride {
    pub fn involves(&self, user_id: &str) -> bool {
        self.rider_id == user_id || self.driver_id.as_deref() == Some(user_id)
    }
}

/// Denormalized ride as returned to clients and pushed over sockets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RideView {
    pub id: String,
    pub rider_id: String,
    pub driver_id: Option<String>,
    pub pickup_location: Location,
    pub destination_location: Location,
    pub status: RideStatus,
    pub fare: Option<f64>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub rider_name: String,
    pub driver_name: Option<String>,
    pub rider_rating: f64,
    pub driver_rating: Option<f64>,
}

/// Flat join row behind [`RideView`].
#[derive(Debug, FromRow)]
pub struct RideViewRow {
    pub id: String,
    pub rider_id: String,
    pub driver_id: Option<String>,
    pub status: RideStatus,
    pub fare: Option<f64>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pickup_id: String,
    pub pickup_name: String,
    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub pickup_created_at: DateTime<Utc>,
    pub destination_id: String,
    pub destination_name: String,
    pub destination_latitude: f64,
    pub destination_longitude: f64,
    pub destination_created_at: DateTime<Utc>,
    pub rider_name: String,
    pub rider_rating: f64,
    pub driver_name: Option<String>,
    pub driver_rating: Option<f64>,
}

impl From<RideViewRow> for RideView {
    fn from(row: RideViewRow) -> Self {
        Self {
            id: row.id,
            rider_id: row.rider_id,
            driver_id: row.driver_id,
            pickup_location: Location {
                id: row.pickup_id,
                name: row.pickup_name,
                latitude: row.pickup_latitude,
                longitude: row.pickup_longitude,
                created_at: row.pickup_created_at,
            },
            destination_location: Location {
                id: row.destination_id,
                name: row.destination_name,
                latitude: row.destination_latitude,
                longitude: row.destination_longitude,
                created_at: row.destination_created_at,
            },
            status: row.status,
            fare: row.fare,
            estimated_arrival: row.estimated_arrival,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            rider_name: row.rider_name,
            driver_name: row.driver_name,
            rider_rating: row.rider_rating,
            driver_rating: row.driver_rating,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRideRequest {
    pub pickup_location: NewLocation,
    pub destination_location: NewLocation,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RideUpdate {
    pub status: Option<RideStatus>,
    pub driver_id: Option<String>,
    pub fare: Option<f64>,
    pub estimated_arrival: Option<DateTime<Utc>>,
}

/// Whose rides to list.
#[derive(Debug, Clone, Copy)]
pub enum RideParty<'a> {
    Rider(&'a str),
    Driver(&'a str),
}
