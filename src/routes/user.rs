use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};

use crate::{
    auth::{normalize_optional, CurrentUser},
    error::AppError,
    models::user::{DriverAvailabilityUpdate, ProfilePatch, UserResponse},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me", get(my_profile).put(update_my_profile))
        .route("/driver/availability", put(update_availability))
        .route("/:id", get(user_detail))
}

async fn my_profile(current: CurrentUser) -> Result<Json<UserResponse>, AppError> {
    let user = current.require_user()?;
    Ok(Json(user.clone().into()))
}

async fn update_my_profile(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(patch): Json<ProfilePatch>,
) -> Result<Json<UserResponse>, AppError> {
    let user = current.require_user()?;
    check_coordinates(patch.current_latitude, patch.current_longitude)?;
    let patch = ProfilePatch {
        full_name: normalize_optional(patch.full_name),
        phone_number: normalize_optional(patch.phone_number),
        ..patch
    };
    let updated = state.store.update_profile(&user.id, &patch).await?;
    Ok(Json(updated.into()))
}

async fn update_availability(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(update): Json<DriverAvailabilityUpdate>,
) -> Result<Json<UserResponse>, AppError> {
    let user = current.require_user()?;
    if !user.is_driver() {
        return Err(AppError::bad_request("User is not a driver"));
    }
    check_coordinates(update.latitude, update.longitude)?;
    let updated = state
        .store
        .set_availability(&user.id, update.is_online, update.latitude, update.longitude)
        .await?;
    tracing::info!(user_id = %updated.id, online = updated.is_online, "driver availability changed");
    Ok(Json(updated.into()))
}

async fn user_detail(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(user_id): Path<String>,
) -> Result<Json<UserResponse>, AppError> {
    current.require_user()?;
    let user = state.store.require_user(&user_id).await?;
    Ok(Json(user.into()))
}

fn check_coordinates(latitude: Option<f64>, longitude: Option<f64>) -> Result<(), AppError> {
    if latitude.is_some_and(|lat| !lat.is_finite() || !(-90.0..=90.0).contains(&lat)) {
        return Err(AppError::validation("latitude must be between -90 and 90"));
    }
    if longitude.is_some_and(|lon| !lon.is_finite() || !(-180.0..=180.0).contains(&lon)) {
        return Err(AppError::validation("longitude must be between -180 and 180"));
    }
    Ok(())
}
