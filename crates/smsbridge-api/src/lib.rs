pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod settings;
pub mod telegram;
pub mod token;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::OriginalUri,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use tracing::error;
use uuid::Uuid;

use smsbridge_db::Database;
use smsbridge_db::models::UserRow;
use smsbridge_twilio::SmsProvider;
use smsbridge_types::api::StatusMessage;

use crate::error::{ApiError, attach_error_detail};
use crate::middleware::require_auth;
use crate::token::TokenIssuer;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub tokens: TokenIssuer,
    pub sms: Arc<dyn SmsProvider>,
}

/// Build the full REST surface.
///
/// With `expose_error_detail` set, internal-error responses carry a `stack`
/// field holding the error chain; leave it off in production.
pub fn router(state: AppState, expose_error_detail: bool) -> Router {
    let public_routes = Router::new()
        .route("/", get(health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/api/auth/profile", get(auth::get_profile).put(auth::update_profile))
        .route("/api/messages", get(messages::list_messages).post(messages::send_message))
        .route("/api/messages/stats", get(messages::message_stats))
        .route("/api/messages/{id}", get(messages::get_message))
        .route("/api/settings", get(settings::get_settings).put(settings::update_settings))
        .route("/api/telegram/auth/start", post(telegram::start_auth))
        .route("/api/telegram/auth/verify", post(telegram::verify_code))
        .route("/api/telegram/disconnect", post(telegram::disconnect))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(not_found)
        .method_not_allowed_fallback(not_found)
        .with_state(state);

    if expose_error_detail {
        app.layer(from_fn(attach_error_detail))
    } else {
        app
    }
}

async fn health() -> Json<StatusMessage> {
    Json(StatusMessage::new("SMS Dashboard API is running..."))
}

/// Unknown paths and known paths called with the wrong method both land here.
async fn not_found(OriginalUri(uri): OriginalUri) -> ApiError {
    let target = uri.path_and_query().map_or_else(|| uri.path(), |pq| pq.as_str());
    ApiError::NotFound(format!("Not Found - {}", target))
}

/// Run a synchronous database call on the blocking pool.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })?
        .map_err(ApiError::Internal)
}

/// Load the caller's row, or 404 if it disappeared after authentication.
pub(crate) async fn load_user(state: &AppState, id: Uuid) -> Result<UserRow, ApiError> {
    blocking(state, move |db| db.get_user_by_id(id))
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))
}
