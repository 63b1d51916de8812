pub mod config;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::warn;

use vibe_api::auth::{AppState, AppStateInner, verify_token};
use vibe_gateway::{Gateway, Identity, connection};
use vibe_store::Store;

use crate::config::Config;

#[derive(Clone)]
struct ServerState {
    gateway: Gateway,
    jwt_secret: String,
}

#[derive(Debug, Deserialize)]
struct GatewayParams {
    token: Option<String>,
}

/// Assemble REST routes, the websocket gateway, CORS and optional static files.
pub fn build_app(config: &Config, store: Arc<Store>) -> anyhow::Result<Router> {
    let gateway = Gateway::new(store.clone());
    let app_state: AppState = Arc::new(AppStateInner {
        store,
        gateway: gateway.clone(),
        jwt_secret: config.jwt_secret.clone(),
    });

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(ServerState {
            gateway,
            jwt_secret: config.jwt_secret.clone(),
        });

    let mut app = Router::new()
        .merge(vibe_api::router(app_state))
        .merge(ws_route);

    if let Some(dir) = &config.static_dir {
        let index = dir.join("index.html");
        app = app.fallback_service(ServeDir::new(dir).fallback(ServeFile::new(index)));
    }

    Ok(app
        .layer(cors_layer(config)?)
        .layer(TraceLayer::new_for_http()))
}

fn cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let Some(origins) = &config.cors_origins else {
        return Ok(CorsLayer::permissive());
    };
    let origins = origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o).with_context(|| format!("invalid CORS origin: {o}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any))
}

/// The JWT is checked here, before the upgrade; a bad or missing token never
/// reaches the gateway.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(params): Query<GatewayParams>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params
        .token
        .or_else(|| bearer.map(|TypedHeader(Authorization(b))| b.token().to_string()));
    let Some(token) = token else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let claims = match verify_token(&state.jwt_secret, &token) {
        Ok(claims) => claims,
        Err(e) => {
            warn!("Rejected gateway upgrade: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };
    let Some(user) = state.gateway.store().get_user_by_id(claims.sub).await else {
        warn!("Rejected gateway upgrade for unknown user {}", claims.sub);
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let identity = Identity {
        user_id: user.id,
        username: user.username,
    };
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.gateway, identity))
}
