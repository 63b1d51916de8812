use axum::{Extension, Json, extract::State};

use vibe_types::api::Claims;
use vibe_types::models::PublicUser;

use crate::auth::AppState;

/// Everyone but the caller.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Json<Vec<PublicUser>> {
    let users = state
        .store
        .users()
        .await
        .iter()
        .filter(|u| u.id != claims.sub)
        .map(|u| u.public())
        .collect();
    Json(users)
}
