use axum::{Extension, Json, extract::State};

use smsbridge_types::api::SettingsPatch;
use smsbridge_types::models::Settings;

use crate::error::{ApiError, JsonBody};
use crate::middleware::AuthUser;
use crate::{AppState, blocking};

/// Twilio concatenates at most 1600 characters into one message.
pub const MAX_SMS_LENGTH_LIMIT: u32 = 1600;

pub async fn get_settings(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
) -> Result<Json<Settings>, ApiError> {
    let settings = blocking(&state, move |db| db.get_or_create_settings(caller.id)).await?;
    Ok(Json(settings))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    JsonBody(patch): JsonBody<SettingsPatch>,
) -> Result<Json<Settings>, ApiError> {
    if let Some(len) = patch.max_sms_length {
        if len == 0 || len > MAX_SMS_LENGTH_LIMIT {
            return Err(ApiError::Validation(format!(
                "maxSmsLength must be between 1 and {}",
                MAX_SMS_LENGTH_LIMIT
            )));
        }
    }

    let settings = blocking(&state, move |db| db.update_settings(caller.id, &patch)).await?;

    Ok(Json(settings))
}
