use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use vibe_types::api::Claims;
use vibe_types::models::Message;

use crate::auth::AppState;

pub async fn channel_messages(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
) -> Json<Vec<Message>> {
    Json(state.store.channel_messages(channel_id).await)
}

/// The caller's conversation with `user_id`, both directions.
pub async fn direct_messages(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Json<Vec<Message>> {
    Json(state.store.conversation(claims.sub, user_id).await)
}
