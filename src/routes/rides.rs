use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    auth::CurrentUser,
    error::AppError,
    models::ride::{CreateRideRequest, RideStatus, RideUpdate, RideView},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_rides).post(create_ride))
        .route("/available", get(available_rides))
        .route("/:id", get(ride_detail).put(update_ride))
        .route("/:id/accept", post(accept_ride))
        .route("/:id/cancel", post(cancel_ride))
        .route("/:id/arrive", post(driver_arriving))
}

#[derive(Debug, Deserialize)]
struct RideListQuery {
    status: Option<RideStatus>,
}

async fn create_ride(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(request): Json<CreateRideRequest>,
) -> Result<(StatusCode, Json<RideView>), AppError> {
    let user = current.require_user()?;
    let view = state.rides.create_ride(user, request).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn list_rides(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(query): Query<RideListQuery>,
) -> Result<Json<Vec<RideView>>, AppError> {
    let user = current.require_user()?;
    Ok(Json(state.rides.list_rides(user, query.status).await?))
}

async fn available_rides(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Vec<RideView>>, AppError> {
    let user = current.require_user()?;
    Ok(Json(state.rides.available_rides(user).await?))
}

async fn ride_detail(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(ride_id): Path<String>,
) -> Result<Json<RideView>, AppError> {
    let user = current.require_user()?;
    Ok(Json(state.rides.get_ride(user, &ride_id).await?))
}

async fn update_ride(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(ride_id): Path<String>,
    Json(update): Json<RideUpdate>,
) -> Result<Json<RideView>, AppError> {
    let user = current.require_user()?;
    Ok(Json(state.rides.update_ride(user, &ride_id, update).await?))
}

async fn accept_ride(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(ride_id): Path<String>,
) -> Result<Json<RideView>, AppError> {
    let user = current.require_user()?;
    Ok(Json(state.rides.accept_ride(user, &ride_id).await?))
}

async fn cancel_ride(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(ride_id): Path<String>,
) -> Result<Json<RideView>, AppError> {
    let user = current.require_user()?;
    Ok(Json(state.rides.cancel_ride(user, &ride_id).await?))
}

async fn driver_arriving(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(ride_id): Path<String>,
) -> Result<Json<RideView>, AppError> {
    let user = current.require_user()?;
    Ok(Json(state.rides.mark_arriving(user, &ride_id).await?))
}
