use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{info, warn};

use smsbridge_db::is_constraint_violation;
use smsbridge_db::models::{UserChanges, UserRow};
use smsbridge_types::api::{AuthResponse, LoginRequest, ProfilePatch, RegisterRequest, RegisterResponse};
use smsbridge_types::models::{Settings, UserProfile};

use crate::error::{ApiError, JsonBody};
use crate::middleware::AuthUser;
use crate::{AppState, blocking, load_user};

pub const MIN_PASSWORD_LEN: usize = 6;

pub async fn register(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(email), Some(password), Some(name)) = (
        present(req.email).map(|e| normalize_email(&e)),
        req.password.filter(|p| !p.is_empty()),
        present(req.name),
    ) else {
        return Err(ApiError::Validation("Please provide email, password and name".into()));
    };
    check_password(&password)?;

    let lookup = email.clone();
    if blocking(&state, move |db| db.get_user_by_email(&lookup)).await?.is_some() {
        return Err(ApiError::Conflict("User already exists".into()));
    }

    let user = UserRow::new(email, hash_password(&password)?, name);
    let settings = Settings::defaults(user.id);

    let row = user.clone();
    blocking(&state, move |db| db.create_user(&row, &settings))
        .await
        .map_err(|e| match e {
            // Lost a race with a concurrent registration for the same email.
            ApiError::Internal(err) if is_constraint_violation(&err) => {
                ApiError::Conflict("User already exists".into())
            }
            other => other,
        })?;

    let token = state.tokens.issue(user.id)?;
    info!("Registered user {} ({})", user.id, user.email);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id: user.id,
            name: user.name,
            email: user.email,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let invalid = || ApiError::Unauthorized("Invalid email or password".into());

    let email = present(req.email).map(|e| normalize_email(&e)).ok_or_else(invalid)?;
    let password = req.password.ok_or_else(invalid)?;

    let user = blocking(&state, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(&password, &user.password)? {
        warn!("Failed login for {}", user.email);
        return Err(invalid());
    }

    let token = state.tokens.issue(user.id)?;
    Ok(Json(AuthResponse { profile: user.profile(), token }))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
) -> Result<Json<UserProfile>, ApiError> {
    let user = load_user(&state, caller.id).await?;
    Ok(Json(user.profile()))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    JsonBody(patch): JsonBody<ProfilePatch>,
) -> Result<Json<AuthResponse>, ApiError> {
    let changes = profile_changes(patch)?;

    if let Some(email) = changes.email.clone() {
        let taken = blocking(&state, move |db| db.get_user_by_email(&email))
            .await?
            .is_some_and(|other| other.id != caller.id);
        if taken {
            return Err(ApiError::Conflict("Email already in use".into()));
        }
    }

    let user = blocking(&state, move |db| db.update_profile(caller.id, &changes))
        .await
        .map_err(|e| match e {
            ApiError::Internal(err) if is_constraint_violation(&err) => {
                ApiError::Conflict("Email already in use".into())
            }
            other => other,
        })?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    let token = state.tokens.issue(user.id)?;
    Ok(Json(AuthResponse { profile: user.profile(), token }))
}

/// Turn a profile patch into column updates. Blank fields are dropped; a new
/// password is validated and hashed.
pub fn profile_changes(patch: ProfilePatch) -> Result<UserChanges, ApiError> {
    let password = match patch.password.filter(|p| !p.is_empty()) {
        Some(password) => {
            check_password(&password)?;
            Some(hash_password(&password)?)
        }
        None => None,
    };
    Ok(UserChanges {
        name: present(patch.name),
        email: present(patch.email).map(|e| normalize_email(&e)),
        password,
        twilio_account_sid: present(patch.twilio_account_sid),
        twilio_auth_token: present(patch.twilio_auth_token),
        twilio_phone_number: present(patch.twilio_phone_number),
        target_phone_number: present(patch.target_phone_number),
    })
}

/// Trimmed value, or `None` when absent or blank.
pub(crate) fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))
}

fn verify_password(password: &str, stored: &str) -> Result<bool, ApiError> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt password hash: {}", e)))?;
    Ok(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
}
