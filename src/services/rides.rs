use chrono::Utc;
use tracing::{info, warn};

use crate::{
    error::AppError,
    models::{
        ride::{CreateRideRequest, Ride, RideParty, RideStatus, RideUpdate, RideView},
        user::{User, UserMode},
    },
    services::{
        fare,
        matching::MatchingEngine,
        notifier::{NotificationRegistry, ServerEvent},
        store::{RideChanges, RideStore},
    },
};

/// Ride lifecycle: creation, reads, transitions, and the pushes that follow them.
#[derive(Clone)]
pub struct RideService {
    store: RideStore,
    matcher: MatchingEngine,
    registry: NotificationRegistry,
}

impl RideService {
    pub fn new(store: RideStore, matcher: MatchingEngine, registry: NotificationRegistry) -> Self {
        Self {
            store,
            matcher,
            registry,
        }
    }

    pub fn matcher(&self) -> &MatchingEngine {
        &self.matcher
    }

    pub async fn create_ride(
        &self,
        rider: &User,
        request: CreateRideRequest,
    ) -> Result<RideView, AppError> {
        let pickup = request.pickup_location.validated("pickup_location")?;
        let destination = request.destination_location.validated("destination_location")?;

        if rider.user_mode != UserMode::Rider {
            return Err(AppError::bad_request("Only riders can request rides"));
        }
        if self.store.rider_has_active_ride(&rider.id).await? {
            return Err(AppError::conflict("You already have an active ride"));
        }

        let fare = fare::estimate(pickup.point(), destination.point());
        let ride = self
            .store
            .create_ride(&rider.id, &pickup, &destination, fare)
            .await?;
        info!(ride_id = %ride.id, rider_id = %rider.id, fare, "ride requested");

        if let Err(err) = self.matcher.attempt_match(&ride.id).await {
            warn!(ride_id = %ride.id, "matching after create failed: {err}");
        }

        let view = self.store.require_ride_view(&ride.id).await?;
        self.notify(&rider.id, &view).await;
        Ok(view)
    }

    pub async fn list_rides(
        &self,
        caller: &User,
        status: Option<RideStatus>,
    ) -> Result<Vec<RideView>, AppError> {
        let party = match caller.user_mode {
            UserMode::Rider => RideParty::Rider(&caller.id),
            UserMode::Driver => RideParty::Driver(&caller.id),
        };
        self.store.list_ride_views(party, status).await
    }

    pub async fn available_rides(&self, caller: &User) -> Result<Vec<RideView>, AppError> {
        if !caller.is_driver() {
            return Err(AppError::Forbidden("Only drivers can view available rides"));
        }
        if !caller.is_online {
            return Err(AppError::Forbidden(
                "Driver must be online to view available rides",
            ));
        }
        self.store.searching_ride_views().await
    }

    pub async fn get_ride(&self, caller: &User, ride_id: &str) -> Result<RideView, AppError> {
        self.load_for(caller, ride_id, "You don't have access to this ride")
            .await?;
        self.store.require_ride_view(ride_id).await
    }

    pub async fn accept_ride(&self, driver: &User, ride_id: &str) -> Result<RideView, AppError> {
        self.matcher.accept(driver, ride_id).await
    }

    pub async fn cancel_ride(&self, caller: &User, ride_id: &str) -> Result<RideView, AppError> {
        let ride = self
            .load_for(caller, ride_id, "You don't have permission to cancel this ride")
            .await?;
        if !ride.status.is_active() {
            return Err(AppError::conflict(
                "Cannot cancel a completed or already cancelled ride",
            ));
        }
        if !self.store.cancel_ride(ride_id, Utc::now()).await? {
            return Err(AppError::conflict(
                "Cannot cancel a completed or already cancelled ride",
            ));
        }
        info!(ride_id, by = %caller.id, "ride cancelled");

        let view = self.store.require_ride_view(ride_id).await?;
        self.notify_parties(&view, None).await;
        Ok(view)
    }

    /// The assigned driver reports reaching the pickup point.
    pub async fn mark_arriving(&self, caller: &User, ride_id: &str) -> Result<RideView, AppError> {
        let ride = self
            .load_for(caller, ride_id, "You don't have access to this ride")
            .await?;
        if ride.driver_id.as_deref() != Some(caller.id.as_str()) {
            return Err(AppError::Forbidden("Only the assigned driver can report arrival"));
        }
        if ride.status != RideStatus::Matched {
            return Err(AppError::conflict("Ride is not waiting for the driver"));
        }
        let changes = RideChanges {
            status: Some(RideStatus::DriverArriving),
            ..RideChanges::default()
        };
        self.commit(&ride, &changes).await
    }

    /// Generic update by the rider or the driver. Status changes must follow
    /// the ride state machine; terminal rides are frozen.
    pub async fn update_ride(
        &self,
        caller: &User,
        ride_id: &str,
        update: RideUpdate,
    ) -> Result<RideView, AppError> {
        let ride = self
            .load_for(caller, ride_id, "You don't have permission to update this ride")
            .await?;
        if ride.status.is_terminal() {
            return Err(AppError::conflict(
                "Ride is already completed or cancelled",
            ));
        }

        if let Some(next) = update.status {
            if next != ride.status && !ride.status.can_transition_to(next) {
                return Err(AppError::conflict(format!(
                    "Cannot change ride status from {} to {}",
                    ride.status, next
                )));
            }
        }

        if let Some(fare) = update.fare {
            if !fare.is_finite() || fare < 0.0 {
                return Err(AppError::validation("fare must be a non-negative number"));
            }
        }

        let driver_id = match update.driver_id {
            Some(driver_id) if ride.driver_id.as_deref() != Some(driver_id.as_str()) => {
                if ride.driver_id.is_none() {
                    return Err(AppError::conflict(
                        "A driver can only be assigned by accepting the ride",
                    ));
                }
                let driver = self
                    .store
                    .find_user(&driver_id)
                    .await?
                    .ok_or_else(|| AppError::bad_request("Unknown driver"))?;
                if !driver.is_driver() {
                    return Err(AppError::bad_request("User is not a driver"));
                }
                Some(driver_id)
            }
            _ => None,
        };

        let changes = RideChanges {
            status: update.status,
            driver_id,
            fare: update.fare,
            estimated_arrival: update.estimated_arrival,
        };
        self.commit(&ride, &changes).await
    }

    async fn commit(&self, ride: &Ride, changes: &RideChanges) -> Result<RideView, AppError> {
        if !self
            .store
            .apply_changes(&ride.id, ride.status, changes, Utc::now())
            .await?
        {
            return Err(AppError::conflict(
                "Ride was changed by someone else, please retry",
            ));
        }
        if let Some(next) = changes.status.filter(|next| *next != ride.status) {
            info!(ride_id = %ride.id, from = %ride.status, to = %next, "ride status changed");
        }

        let view = self.store.require_ride_view(&ride.id).await?;
        let replaced = ride
            .driver_id
            .as_deref()
            .filter(|old| view.driver_id.as_deref() != Some(*old));
        self.notify_parties(&view, replaced).await;
        Ok(view)
    }

    /// Loads a ride the caller takes part in.
    async fn load_for(
        &self,
        caller: &User,
        ride_id: &str,
        denied: &'static str,
    ) -> Result<Ride, AppError> {
        let ride = self
            .store
            .find_ride(ride_id)
            .await?
            .ok_or(AppError::NotFound("Ride not found"))?;
        if !ride.involves(&caller.id) {
            return Err(AppError::Forbidden(denied));
        }
        Ok(ride)
    }

    async fn notify_parties(&self, view: &RideView, replaced_driver: Option<&str>) {
        self.notify(&view.rider_id, view).await;
        if let Some(driver_id) = view.driver_id.as_deref() {
            self.notify(driver_id, view).await;
        }
        if let Some(old) = replaced_driver {
            self.notify(old, view).await;
        }
    }

    async fn notify(&self, user_id: &str, view: &RideView) {
        let event = ServerEvent::RideUpdate { data: view.clone() };
        self.registry.push(user_id, &event).await;
    }
}
