//! Row types that have no public counterpart. Messages and settings carry no
//! secrets, so the queries return the `smsbridge-types` models directly.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use smsbridge_types::models::UserProfile;

/// A full users row, including the password hash and provider secrets.
/// Never serialized; convert with [`UserRow::profile`] before it leaves the server.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub password: String,
    pub name: String,
    pub telegram_id: Option<String>,
    pub telegram_username: Option<String>,
    pub telegram_phone_number: Option<String>,
    pub telegram_session: Option<String>,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_phone_number: Option<String>,
    pub target_phone_number: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    pub fn new(email: String, password_hash: String, name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            password: password_hash,
            name,
            telegram_id: None,
            telegram_username: None,
            telegram_phone_number: None,
            telegram_session: None,
            twilio_account_sid: None,
            twilio_auth_token: None,
            twilio_phone_number: None,
            target_phone_number: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            telegram_id: self.telegram_id.clone(),
            telegram_username: self.telegram_username.clone(),
            telegram_phone_number: self.telegram_phone_number.clone(),
            twilio_account_sid: is_set(&self.twilio_account_sid),
            twilio_auth_token: is_set(&self.twilio_auth_token),
            twilio_phone_number: self.twilio_phone_number.clone(),
            target_phone_number: self.target_phone_number.clone(),
            is_active: self.is_active,
        }
    }
}

/// Column updates for a profile edit. `None` leaves the stored value alone.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    /// Already hashed.
    pub password: Option<String>,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_phone_number: Option<String>,
    pub target_phone_number: Option<String>,
}

fn is_set(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|v| !v.is_empty())
}
