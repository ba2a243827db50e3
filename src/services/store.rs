//! All SQL lives here. Every ride state change is a single conditional
//! `UPDATE` keyed on the ride id and the status the caller expects, so two
//! concurrent writers can never both win.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::{is_unique_violation, AppError},
    models::{
        location::NewLocation,
        ride::{Ride, RideParty, RideStatus, RideView, RideViewRow},
        session::Session,
        user::{NewUser, ProfilePatch, User},
    },
};

const RIDE_VIEW_SELECT: &str = r#"
SELECT r.id, r.rider_id, r.driver_id, r.status, r.fare, r.estimated_arrival,
       r.started_at, r.completed_at, r.created_at, r.updated_at,
       p.id AS pickup_id, p.name AS pickup_name, p.latitude AS pickup_latitude,
       p.longitude AS pickup_longitude, p.created_at AS pickup_created_at,
       d.id AS destination_id, d.name AS destination_name, d.latitude AS destination_latitude,
       d.longitude AS destination_longitude, d.created_at AS destination_created_at,
       COALESCE(ru.full_name, ru.username) AS rider_name, ru.rating AS rider_rating,
       COALESCE(du.full_name, du.username) AS driver_name, du.rating AS driver_rating
FROM rides r
JOIN locations p ON p.id = r.pickup_location_id
JOIN locations d ON d.id = r.destination_location_id
JOIN users ru ON ru.id = r.rider_id
LEFT JOIN users du ON du.id = r.driver_id
"#;

/// Field overrides applied by a generic ride update.
#[derive(Debug, Clone, Default)]
pub struct RideChanges {
    pub status: Option<RideStatus>,
    pub driver_id: Option<String>,
    pub fare: Option<f64>,
    pub estimated_arrival: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct RideStore {
    db: DbPool,
}

impl RideStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    // ----- users -----

    pub async fn insert_user(&self, new: NewUser) -> Result<User, AppError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let result = sqlx::query(
            r#"INSERT INTO users (id, email, username, password_hash, full_name, phone_number,
                                  user_mode, rating, is_online, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, 0.0, 0, ?, ?)"#,
        )
        .bind(&id)
        .bind(&new.email)
        .bind(&new.username)
        .bind(&new.password_hash)
        .bind(&new.full_name)
        .bind(&new.phone_number)
        .bind(new.user_mode)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => self.require_user(&id).await,
            Err(err) if is_unique_violation(&err) => Err(AppError::bad_request(
                "Email or username already registered",
            )),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn find_user(&self, id: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    pub async fn require_user(&self, id: &str) -> Result<User, AppError> {
        self.find_user(id).await?.ok_or(AppError::NotFound("User not found"))
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    pub async fn username_taken(&self, username: &str) -> Result<bool, AppError> {
        let taken: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = ?)")
                .bind(username)
                .fetch_one(&self.db)
                .await?;
        Ok(taken)
    }

    pub async fn update_profile(&self, id: &str, patch: &ProfilePatch) -> Result<User, AppError> {
        sqlx::query(
            r#"UPDATE users
               SET full_name = COALESCE(?, full_name),
                   phone_number = COALESCE(?, phone_number),
                   current_latitude = COALESCE(?, current_latitude),
                   current_longitude = COALESCE(?, current_longitude),
                   updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&patch.full_name)
        .bind(&patch.phone_number)
        .bind(patch.current_latitude)
        .bind(patch.current_longitude)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db)
        .await?;
        self.require_user(id).await
    }

    pub async fn set_availability(
        &self,
        id: &str,
        is_online: bool,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Result<User, AppError> {
        sqlx::query(
            r#"UPDATE users
               SET is_online = ?,
                   current_latitude = COALESCE(?, current_latitude),
                   current_longitude = COALESCE(?, current_longitude),
                   updated_at = ?
               WHERE id = ?"#,
        )
        .bind(is_online)
        .bind(latitude)
        .bind(longitude)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db)
        .await?;
        self.require_user(id).await
    }

    // ----- sessions -----

    pub async fn insert_session(&self, session: &Session) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, created_at, last_seen_at, expires_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(session.created_at)
        .bind(session.last_seen_at)
        .bind(session.expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Resolves an unexpired session to its user and bumps `last_seen_at`.
    pub async fn user_for_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, AppError> {
        let Some(session) =
            sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = ?")
                .bind(session_id)
                .fetch_optional(&self.db)
                .await?
        else {
            return Ok(None);
        };

        if session.expires_at.is_some_and(|expires| expires <= now) {
            self.delete_session(session_id).await?;
            return Ok(None);
        }

        sqlx::query("UPDATE sessions SET last_seen_at = ? WHERE id = ?")
            .bind(now)
            .bind(session_id)
            .execute(&self.db)
            .await?;
        self.find_user(&session.user_id).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    // ----- rides: reads -----

    pub async fn find_ride(&self, id: &str) -> Result<Option<Ride>, AppError> {
        let ride = sqlx::query_as::<_, Ride>("SELECT * FROM rides WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(ride)
    }

    pub async fn ride_view(&self, id: &str) -> Result<Option<RideView>, AppError> {
        let mut query = QueryBuilder::<Sqlite>::new(RIDE_VIEW_SELECT);
        query.push(" WHERE r.id = ").push_bind(id);
        let row = query
            .build_query_as::<RideViewRow>()
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(RideView::from))
    }

    pub async fn require_ride_view(&self, id: &str) -> Result<RideView, AppError> {
        self.ride_view(id)
            .await?
            .ok_or(AppError::NotFound("Ride not found"))
    }

    /// Rides of one party, newest first.
    pub async fn list_ride_views(
        &self,
        party: RideParty<'_>,
        status: Option<RideStatus>,
    ) -> Result<Vec<RideView>, AppError> {
        let mut query = QueryBuilder::<Sqlite>::new(RIDE_VIEW_SELECT);
        match party {
            RideParty::Rider(id) => query.push(" WHERE r.rider_id = ").push_bind(id),
            RideParty::Driver(id) => query.push(" WHERE r.driver_id = ").push_bind(id),
        };
        if let Some(status) = status {
            query.push(" AND r.status = ").push_bind(status);
        }
        query.push(" ORDER BY r.created_at DESC, r.rowid DESC");
        let rows = query
            .build_query_as::<RideViewRow>()
            .fetch_all(&self.db)
            .await?;
        Ok(rows.into_iter().map(RideView::from).collect())
    }

    /// Rides still waiting for a driver, oldest first.
    pub async fn searching_ride_views(&self) -> Result<Vec<RideView>, AppError> {
        let mut query = QueryBuilder::<Sqlite>::new(RIDE_VIEW_SELECT);
        query
            .push(" WHERE r.status = ")
            .push_bind(RideStatus::Searching)
            .push(" ORDER BY r.created_at ASC, r.rowid ASC");
        let rows = query
            .build_query_as::<RideViewRow>()
            .fetch_all(&self.db)
            .await?;
        Ok(rows.into_iter().map(RideView::from).collect())
    }

    pub async fn searching_ride_ids(&self) -> Result<Vec<String>, AppError> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM rides WHERE status = 'searching' ORDER BY created_at ASC, rowid ASC",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(ids)
    }

    pub async fn rider_has_active_ride(&self, rider_id: &str) -> Result<bool, AppError> {
        let active: bool = sqlx::query_scalar(
            r#"SELECT EXISTS(SELECT 1 FROM rides WHERE rider_id = ?
               AND status IN ('searching', 'matched', 'driverArriving', 'inProgress'))"#,
        )
        .bind(rider_id)
        .fetch_one(&self.db)
        .await?;
        Ok(active)
    }

    pub async fn driver_has_active_ride(&self, driver_id: &str) -> Result<bool, AppError> {
        let active: bool = sqlx::query_scalar(
            r#"SELECT EXISTS(SELECT 1 FROM rides WHERE driver_id = ?
               AND status IN ('matched', 'driverArriving', 'inProgress'))"#,
        )
        .bind(driver_id)
        .fetch_one(&self.db)
        .await?;
        Ok(active)
    }

    /// Online drivers without an occupying ride, in registration order.
    pub async fn available_driver_ids(&self) -> Result<Vec<String>, AppError> {
        let ids = sqlx::query_scalar(
            r#"SELECT u.id FROM users u
               WHERE u.user_mode = 'driver' AND u.is_online = 1
                 AND NOT EXISTS (
                     SELECT 1 FROM rides r WHERE r.driver_id = u.id
                     AND r.status IN ('matched', 'driverArriving', 'inProgress'))
               ORDER BY u.created_at ASC, u.rowid ASC"#,
        )
        .fetch_all(&self.db)
        .await?;
        Ok(ids)
    }

    // ----- rides: writes -----

    /// Persists both locations and a `searching` ride in one transaction.
    pub async fn create_ride(
        &self,
        rider_id: &str,
        pickup: &NewLocation,
        destination: &NewLocation,
        fare: f64,
    ) -> Result<Ride, AppError> {
        let now = Utc::now();
        let ride_id = Uuid::new_v4().to_string();
        let pickup_id = Uuid::new_v4().to_string();
        let destination_id = Uuid::new_v4().to_string();

        let mut tx = self.db.begin().await?;
        for (id, loc) in [(&pickup_id, pickup), (&destination_id, destination)] {
            sqlx::query(
                "INSERT INTO locations (id, name, latitude, longitude, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(&loc.name)
            .bind(loc.latitude)
            .bind(loc.longitude)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let inserted = sqlx::query(
            r#"INSERT INTO rides (id, rider_id, pickup_location_id, destination_location_id,
                                  status, fare, created_at, updated_at)
               VALUES (?, ?, ?, ?, 'searching', ?, ?, ?)"#,
        )
        .bind(&ride_id)
        .bind(rider_id)
        .bind(&pickup_id)
        .bind(&destination_id)
        .bind(fare)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(AppError::conflict("You already have an active ride"));
            }
            Err(err) => return Err(err.into()),
        }
        tx.commit().await?;

        self.find_ride(&ride_id)
            .await?
            .ok_or(AppError::NotFound("Ride not found"))
    }

    /// `searching -> matched` for `driver_id`, only if the ride is still
    /// searching and the driver is an online driver with no occupying ride.
    /// Returns whether this call won.
    pub async fn assign_driver(
        &self,
        ride_id: &str,
        driver_id: &str,
        estimated_arrival: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"UPDATE rides
               SET driver_id = ?1, status = 'matched', estimated_arrival = ?2, updated_at = ?3
               WHERE id = ?4 AND status = 'searching'
                 AND EXISTS (SELECT 1 FROM users
                             WHERE id = ?1 AND user_mode = 'driver' AND is_online = 1)
                 AND NOT EXISTS (SELECT 1 FROM rides
                                 WHERE driver_id = ?1
                                 AND status IN ('matched', 'driverArriving', 'inProgress'))"#,
        )
        .bind(driver_id)
        .bind(estimated_arrival)
        .bind(now)
        .bind(ride_id)
        .execute(&self.db)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() == 1),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Moves a non-terminal ride to `cancelled`. Returns whether it changed.
    pub async fn cancel_ride(&self, ride_id: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let done = sqlx::query(
            r#"UPDATE rides SET status = 'cancelled', updated_at = ?
               WHERE id = ? AND status NOT IN ('completed', 'cancelled')"#,
        )
        .bind(now)
        .bind(ride_id)
        .execute(&self.db)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    /// Applies `changes` if the ride is still in `expected`. Stamps
    /// `started_at`/`completed_at` the first time those states are entered.
    pub async fn apply_changes(
        &self,
        ride_id: &str,
        expected: RideStatus,
        changes: &RideChanges,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let next = changes.status.unwrap_or(expected);
        let result = sqlx::query(
            r#"UPDATE rides
               SET status = ?1,
                   driver_id = COALESCE(?2, driver_id),
                   fare = COALESCE(?3, fare),
                   estimated_arrival = COALESCE(?4, estimated_arrival),
                   started_at = CASE WHEN ?1 = 'inProgress' THEN COALESCE(started_at, ?5)
                                     ELSE started_at END,
                   completed_at = CASE WHEN ?1 = 'completed' THEN COALESCE(completed_at, ?5)
                                       ELSE completed_at END,
                   updated_at = ?5
               WHERE id = ?6 AND status = ?7"#,
        )
        .bind(next)
        .bind(&changes.driver_id)
        .bind(changes.fare)
        .bind(changes.estimated_arrival)
        .bind(now)
        .bind(ride_id)
        .bind(expected)
        .execute(&self.db)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() == 1),
            Err(err) if is_unique_violation(&err) => Err(AppError::conflict(
                "Driver already has an active ride",
            )),
            Err(err) => Err(err.into()),
        }
    }
}
