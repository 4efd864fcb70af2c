use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::SettingsPatch;

pub const DEFAULT_MAX_SMS_LENGTH: u32 = 160;

/// Sanitized view of a user. Provider secrets are reduced to "configured" flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub telegram_id: Option<String>,
    pub telegram_username: Option<String>,
    pub telegram_phone_number: Option<String>,
    pub twilio_account_sid: bool,
    pub twilio_auth_token: bool,
    pub twilio_phone_number: Option<String>,
    pub target_phone_number: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Delivered,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    /// Map a Twilio message status onto the three states we record.
    /// Anything still in flight (queued, accepted, sending, sent, ...) stays pending.
    pub fn from_provider_status(status: &str) -> Self {
        match status {
            "delivered" => Self::Delivered,
            "failed" | "undelivered" | "canceled" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown message status '{}'", other)),
        }
    }
}

/// An SMS sent through the caller's provider account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub user: Uuid,
    pub content: String,
    pub sender: String,
    pub recipient: String,
    pub status: MessageStatus,
    #[serde(rename = "twilioMessageId", skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// A not-yet-sent message. Status is settled once the provider answers.
    pub fn pending(user: Uuid, content: String, sender: String, recipient: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user,
            content,
            sender,
            recipient,
            status: MessageStatus::Pending,
            provider_message_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn settle(mut self, status: MessageStatus, provider_message_id: Option<String>) -> Self {
        self.status = status;
        self.provider_message_id = provider_message_id;
        self.updated_at = Utc::now();
        self
    }
}

/// Per-user forwarding preferences. One record per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub user: Uuid,
    pub forward_all_chats: bool,
    pub only_non_muted_chats: bool,
    pub monitored_chats: Vec<String>,
    pub include_sender_name: bool,
    pub max_sms_length: u32,
    pub forward_media: bool,
    pub forward_own_messages: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Settings {
    pub fn defaults(user: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user,
            forward_all_chats: true,
            only_non_muted_chats: true,
            monitored_chats: Vec::new(),
            include_sender_name: true,
            max_sms_length: DEFAULT_MAX_SMS_LENGTH,
            forward_media: true,
            forward_own_messages: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge the fields present in `patch`. Absent fields are left untouched.
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(v) = patch.forward_all_chats {
            self.forward_all_chats = v;
        }
        if let Some(v) = patch.only_non_muted_chats {
            self.only_non_muted_chats = v;
        }
        if let Some(v) = &patch.monitored_chats {
            self.monitored_chats = v.clone();
        }
        if let Some(v) = patch.include_sender_name {
            self.include_sender_name = v;
        }
        if let Some(v) = patch.max_sms_length {
            self.max_sms_length = v;
        }
        if let Some(v) = patch.forward_media {
            self.forward_media = v;
        }
        if let Some(v) = patch.forward_own_messages {
            self.forward_own_messages = v;
        }
        self.updated_at = Utc::now();
    }
}

/// Number of messages created on one calendar day (UTC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    #[serde(rename = "_id")]
    pub date: String,
    pub count: u64,
}
