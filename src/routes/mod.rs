pub mod public;
pub mod rides;
pub mod user;
pub mod ws;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(public::router())
        .nest("/api/users", user::router())
        .nest("/api/rides", rides::router())
        .nest("/ws", ws::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
