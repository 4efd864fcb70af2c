use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DailyCount, Message, UserProfile};

// -- JWT Claims --

/// Bearer token claims. The token carries the user id and nothing else;
/// everything else is resolved from the users table on each request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub iat: usize,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Profile view plus a freshly signed token (login and profile update).
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub token: String,
}

/// Partial profile update. `None`, `null` and blank strings all mean "unchanged".
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_phone_number: Option<String>,
    pub target_phone_number: Option<String>,
}

// -- Messages --

#[derive(Debug, Default, Deserialize)]
pub struct SendMessageRequest {
    pub content: Option<String>,
    pub recipient: Option<String>,
}

/// Raw query strings; non-numeric values fall back to defaults instead of
/// rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct MessageListQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub page: u32,
    pub pages: u64,
    pub total: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageStatsQuery {
    pub days: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStats {
    pub total_messages: u64,
    pub delivered: u64,
    pub failed: u64,
    pub pending: u64,
    pub delivery_rate: f64,
    pub messages_by_date: Vec<DailyCount>,
}

// -- Settings --

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub forward_all_chats: Option<bool>,
    pub only_non_muted_chats: Option<bool>,
    pub monitored_chats: Option<Vec<String>>,
    pub include_sender_name: Option<bool>,
    pub max_sms_length: Option<u32>,
    pub forward_media: Option<bool>,
    pub forward_own_messages: Option<bool>,
}

// -- Telegram linking --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramStartRequest {
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramStartResponse {
    pub message: String,
    pub verification_code: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramVerifyRequest {
    pub verification_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramVerifyResponse {
    pub message: String,
    pub telegram_id: String,
    pub telegram_username: String,
}

// -- Misc --

/// Plain `{message}` body used for acknowledgements.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusMessage {
    pub message: String,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}
