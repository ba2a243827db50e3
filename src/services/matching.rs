//! Driver assignment for rides that are still searching.
//!
//! Selection is first-available in registration order. Proximity is not
//! considered. The assignment itself is the store's compare-and-swap, so an
//! automatic match and an explicit accept racing on one ride have exactly
//! one winner.

use std::time::Duration;

use chrono::Utc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    error::AppError,
    models::{
        ride::{RideStatus, RideView},
        user::User,
    },
    services::{
        notifier::{NotificationRegistry, ServerEvent},
        store::RideStore,
    },
};

/// Minutes from assignment until the driver is expected at the pickup.
pub const PICKUP_ETA_MINUTES: i64 = 5;

#[derive(Clone)]
pub struct MatchingEngine {
    store: RideStore,
    registry: NotificationRegistry,
}

impl MatchingEngine {
    pub fn new(store: RideStore, registry: NotificationRegistry) -> Self {
        Self { store, registry }
    }

    /// Tries to give a searching ride a driver. Returns the matched view, or
    /// `None` when the ride is gone, no longer searching, or nobody is free.
    pub async fn attempt_match(&self, ride_id: &str) -> Result<Option<RideView>, AppError> {
        let Some(ride) = self.store.find_ride(ride_id).await? else {
            return Ok(None);
        };
        if ride.status != RideStatus::Searching {
            return Ok(None);
        }

        let candidates = self.store.available_driver_ids().await?;
        if candidates.is_empty() {
            debug!(ride_id, "no drivers available");
            return Ok(None);
        }

        for driver_id in candidates {
            if driver_id == ride.rider_id {
                continue;
            }
            let now = Utc::now();
            let eta = now + chrono::Duration::minutes(PICKUP_ETA_MINUTES);
            if self.store.assign_driver(ride_id, &driver_id, eta, now).await? {
                info!(ride_id, driver_id = %driver_id, "ride matched");
                let view = self.store.require_ride_view(ride_id).await?;
                self.notify(&driver_id, &view).await;
                return Ok(Some(view));
            }

            // Lost the swap: either the ride moved on or this driver got busy.
            let still_searching = self
                .store
                .find_ride(ride_id)
                .await?
                .is_some_and(|r| r.status == RideStatus::Searching);
            if !still_searching {
                return Ok(None);
            }
        }
        Ok(None)
    }

    /// A driver claims a searching ride.
    pub async fn accept(&self, driver: &User, ride_id: &str) -> Result<RideView, AppError> {
        if !driver.is_driver() {
            return Err(AppError::bad_request("Only drivers can accept rides"));
        }
        if !driver.is_online {
            return Err(AppError::bad_request("Driver must be online to accept rides"));
        }
        let ride = self
            .store
            .find_ride(ride_id)
            .await?
            .ok_or(AppError::NotFound("Ride not found"))?;
        if ride.rider_id == driver.id {
            return Err(AppError::bad_request("You cannot accept your own ride"));
        }
        if ride.status != RideStatus::Searching {
            return Err(AppError::conflict("Ride is not available for acceptance"));
        }
        if self.store.driver_has_active_ride(&driver.id).await? {
            return Err(AppError::conflict("You already have an active ride"));
        }

        let now = Utc::now();
        let eta = now + chrono::Duration::minutes(PICKUP_ETA_MINUTES);
        if !self.store.assign_driver(ride_id, &driver.id, eta, now).await? {
            return Err(self.explain_lost_accept(ride_id, &driver.id).await?);
        }

        info!(ride_id, driver_id = %driver.id, "ride accepted");
        let view = self.store.require_ride_view(ride_id).await?;
        self.notify(&view.rider_id, &view).await;
        self.notify(&driver.id, &view).await;
        Ok(view)
    }

    /// Retries every searching ride, oldest first, until drivers run out.
    /// Matched riders are told as well since nobody else will.
    pub async fn sweep(&self) -> Result<usize, AppError> {
        let mut matched = 0;
        for ride_id in self.store.searching_ride_ids().await? {
            match self.attempt_match(&ride_id).await? {
                Some(view) => {
                    self.notify(&view.rider_id, &view).await;
                    matched += 1;
                }
                None => {
                    if self.store.available_driver_ids().await?.is_empty() {
                        break;
                    }
                }
            }
        }
        Ok(matched)
    }

    /// Runs [`sweep`](Self::sweep) every `interval` until `shutdown` flips.
    pub fn spawn_sweeper(
        self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.sweep().await {
                            Ok(0) => {}
                            Ok(count) => info!(count, "sweeper matched waiting rides"),
                            Err(err) => warn!("match sweep failed: {err}"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("match sweeper stopping");
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn explain_lost_accept(&self, ride_id: &str, driver_id: &str) -> Result<AppError, AppError> {
        let Some(ride) = self.store.find_ride(ride_id).await? else {
            return Ok(AppError::NotFound("Ride not found"));
        };
        if ride.status != RideStatus::Searching {
            return Ok(AppError::conflict("Ride is not available for acceptance"));
        }
        if self.store.driver_has_active_ride(driver_id).await? {
            return Ok(AppError::conflict("You already have an active ride"));
        }
        Ok(AppError::bad_request("Driver must be online to accept rides"))
    }

    async fn notify(&self, user_id: &str, view: &RideView) {
        let event = ServerEvent::RideUpdate { data: view.clone() };
        let delivered = self.registry.push(user_id, &event).await;
        debug!(user_id, ride_id = %view.id, delivered, "ride update pushed");
    }
}
