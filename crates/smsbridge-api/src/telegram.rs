//! Telegram account linking, demonstration grade.
//!
//! No Telegram API is contacted. `start` generates a code locally and hands it
//! straight back, and `verify` fabricates the Telegram id and username.

use axum::{Extension, Json, extract::State};
use rand::Rng;
use tracing::info;

use smsbridge_types::api::{
    StatusMessage, TelegramStartRequest, TelegramStartResponse, TelegramVerifyRequest,
    TelegramVerifyResponse,
};

use crate::auth::present;
use crate::error::{ApiError, JsonBody};
use crate::middleware::AuthUser;
use crate::{AppState, blocking};

pub async fn start_auth(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    JsonBody(req): JsonBody<TelegramStartRequest>,
) -> Result<Json<TelegramStartResponse>, ApiError> {
    let phone_number = present(req.phone_number)
        .ok_or_else(|| ApiError::Validation("Phone number is required".into()))?;

    let code = verification_code();
    let pending = code.clone();
    let stored =
        blocking(&state, move |db| db.set_telegram_code(caller.id, &phone_number, &pending)).await?;
    if !stored {
        return Err(user_not_found());
    }

    info!("Issued Telegram linking code for user {}", caller.id);
    Ok(Json(TelegramStartResponse {
        message: "Verification code sent to your phone".into(),
        verification_code: code,
    }))
}

pub async fn verify_code(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    JsonBody(req): JsonBody<TelegramVerifyRequest>,
) -> Result<Json<TelegramVerifyResponse>, ApiError> {
    let code = present(req.verification_code)
        .ok_or_else(|| ApiError::Validation("Verification code is required".into()))?;

    let (telegram_id, telegram_username) = {
        let mut rng = rand::rng();
        (
            format!("telegram_{}", rng.random_range(0..1_000_000_000u32)),
            format!("user_{}", rng.random_range(0..1_000_000u32)),
        )
    };

    // Matching and consuming the code is one statement, so a code links at most once.
    let (id, username) = (telegram_id.clone(), telegram_username.clone());
    let linked =
        blocking(&state, move |db| db.link_telegram(caller.id, &code, &id, &username)).await?;
    if !linked {
        return Err(ApiError::Validation("Invalid verification code".into()));
    }

    info!("Linked Telegram account {} for user {}", telegram_id, caller.id);
    Ok(Json(TelegramVerifyResponse {
        message: "Telegram authentication successful".into(),
        telegram_id,
        telegram_username,
    }))
}

pub async fn disconnect(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
) -> Result<Json<StatusMessage>, ApiError> {
    if !blocking(&state, move |db| db.clear_telegram(caller.id)).await? {
        return Err(user_not_found());
    }

    info!("Unlinked Telegram account for user {}", caller.id);
    Ok(Json(StatusMessage::new("Telegram account disconnected successfully")))
}

fn user_not_found() -> ApiError {
    ApiError::NotFound("User not found".into())
}

/// Six digits, never with a leading zero.
fn verification_code() -> String {
    rand::rng().random_range(100_000..1_000_000u32).to_string()
}
