use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};

use vibe_types::api::{Claims, CreateChannelRequest};
use vibe_types::models::Channel;

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn list_channels(State(state): State<AppState>) -> Json<Vec<Channel>> {
    Json(state.store.channels().await)
}

/// Same rules as the realtime `create_channel`; connected clients hear about it.
pub async fn create_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = state
        .gateway
        .create_channel(claims.sub, &req.name, req.description.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(channel)))
}
