use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UserMode {
    #[default]
    Rider,
    Driver,
}

impl UserMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserMode::Rider => "rider",
            UserMode::Driver => "driver",
        }
    }
}

impl fmt::Display for UserMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    pub user_mode: UserMode,
    pub rating: f64,
    pub is_online: bool,
    pub current_latitude: Option<f64>,
    pub current_longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_driver(&self) -> bool {
        self.user_mode == UserMode::Driver
    }
}

/// Wire shape of a user. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub username: String,
    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    pub user_mode: UserMode,
    pub rating: f64,
    pub is_online: bool,
    pub current_latitude: Option<f64>,
    pub current_longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            full_name: user.full_name,
            phone_number: user.phone_number,
            user_mode: user.user_mode,
            rating: user.rating,
            is_online: user.is_online,
            current_latitude: user.current_latitude,
            current_longitude: user.current_longitude,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    pub user_mode: UserMode,
}

/// The only profile fields a user may change about themselves.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilePatch {
    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    pub current_latitude: Option<f64>,
    pub current_longitude: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriverAvailabilityUpdate {
    pub is_online: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_patch_rejects_unknown_fields() {
        let err = serde_json::from_str::<ProfilePatch>(r#"{"user_mode":"driver"}"#);
        assert!(err.is_err());

        let patch: ProfilePatch =
            serde_json::from_str(r#"{"full_name":"Ada","current_latitude":1.5}"#).unwrap();
        assert_eq!(patch.full_name.as_deref(), Some("Ada"));
        assert_eq!(patch.current_latitude, Some(1.5));
    }
}
