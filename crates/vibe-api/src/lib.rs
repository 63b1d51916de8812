pub mod auth;
pub mod channels;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod users;

use axum::{
    Json, Router,
    routing::{get, post},
};

use vibe_types::api::HealthResponse;

use crate::auth::AppState;
use crate::middleware::require_auth;

/// Every REST route, public and bearer-protected.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/register", post(auth::register))
        .route("/api/login", post(auth::login))
        .route("/health", get(health))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/users", get(users::list_users))
        .route(
            "/api/channels",
            get(channels::list_channels).post(channels::create_channel),
        )
        .route(
            "/api/channels/{channel_id}/messages",
            get(messages::channel_messages),
        )
        .route(
            "/api/direct-messages/{user_id}",
            get(messages::direct_messages),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        timestamp: chrono::Utc::now(),
    })
}
