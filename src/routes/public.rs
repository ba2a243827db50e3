use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde_json::{json, Value};

use crate::{
    auth::{self, CurrentUser, LoginRequest, RegisterRequest},
    error::AppError,
    models::{session::TokenResponse, user::UserResponse},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(landing))
        .route("/health", get(health))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
}

async fn landing() -> Json<Value> {
    Json(json!({
        "message": "Rideasy API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let stats = state.registry.stats().await;
    Json(json!({
        "status": "healthy",
        "users": stats.users,
        "connections": stats.connections,
        "pruned": stats.pruned,
    }))
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), AppError> {
    let user = auth::register_user(&state, request).await?;
    let token = auth::create_session(&state, &user.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(TokenResponse::bearer(token, user.into())),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let user = auth::authenticate_user(&state, &request.email, &request.password).await?;
    let token = auth::create_session(&state, &user.id).await?;
    Ok(Json(TokenResponse::bearer(token, user.into())))
}

async fn logout(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(TypedHeader(Authorization(bearer))) = bearer {
        auth::destroy_session(&state, bearer.token()).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn me(current: CurrentUser) -> Result<Json<UserResponse>, AppError> {
    let user = current.require_user()?;
    Ok(Json(user.clone().into()))
}
