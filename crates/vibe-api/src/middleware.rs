use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;

use crate::auth::{AppState, verify_token};
use crate::error::ApiError;

/// Validate the bearer token and expose its `Claims` to handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) =
        bearer.ok_or_else(|| ApiError::Unauthorized("Access token required".into()))?;
    let claims = verify_token(&state.jwt_secret, bearer.token())?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
