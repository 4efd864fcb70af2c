use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;
use crate::{AppState, blocking};

/// The caller, as resolved by [`require_auth`].
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: Uuid,
}

/// Verify the bearer token and resolve its subject to a live user.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let bearer = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or_else(|| ApiError::Unauthorized("Unauthorized - No token provided".into()))?;

    let claims = state.tokens.verify(bearer.token()).map_err(|e| {
        debug!("Token rejected: {}", e);
        ApiError::Unauthorized("Unauthorized - Invalid token".into())
    })?;

    let user_id = claims.sub;
    let user = blocking(&state, move |db| db.get_user_by_id(user_id)).await?;
    if user.is_none() {
        debug!("Token subject {} no longer exists", user_id);
        return Err(ApiError::Unauthorized("Unauthorized - Invalid token".into()));
    }

    req.extensions_mut().insert(AuthUser { id: user_id });
    Ok(next.run(req).await)
}
