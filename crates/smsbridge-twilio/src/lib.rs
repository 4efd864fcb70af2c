//! Outbound SMS through the Twilio Programmable Messaging REST API.
//!
//! Handlers depend on [`SmsProvider`], not on [`TwilioClient`], so the client
//! is constructed once at startup and tests can substitute their own provider.
//! Credentials are supplied per call because every user brings their own
//! Twilio account.

pub mod models;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::models::{ApiErrorBody, MessageResource};

pub const DEFAULT_API_BASE: &str = "https://api.twilio.com";

/// A user's Twilio account and the number messages are sent from.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub account_sid: String,
    pub auth_token: String,
    pub from: String,
}

/// What the provider reported for an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsReceipt {
    pub sid: String,
    pub status: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Twilio answered and rejected the request.
    #[error("{message}")]
    Rejected {
        code: Option<i64>,
        message: String,
        http_status: u16,
    },

    /// No usable answer from Twilio.
    #[error("request to SMS provider failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait SmsProvider: Send + Sync {
    async fn send_sms(
        &self,
        credentials: &ProviderCredentials,
        to: &str,
        body: &str,
    ) -> Result<SmsReceipt, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct TwilioClient {
    http: Client,
    base_url: String,
}

impl TwilioClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn messages_url(&self, account_sid: &str) -> String {
        format!("{}/2010-04-01/Accounts/{}/Messages.json", self.base_url, account_sid)
    }
}

impl Default for TwilioClient {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

#[async_trait]
impl SmsProvider for TwilioClient {
    async fn send_sms(
        &self,
        credentials: &ProviderCredentials,
        to: &str,
        body: &str,
    ) -> Result<SmsReceipt, ProviderError> {
        let form = [("To", to), ("From", credentials.from.as_str()), ("Body", body)];

        let response = self
            .http
            .post(self.messages_url(&credentials.account_sid))
            .basic_auth(&credentials.account_sid, Some(&credentials.auth_token))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let (code, message, more_info) = match serde_json::from_str::<ApiErrorBody>(&text) {
                Ok(err) => (err.code, err.message, err.more_info),
                Err(_) => (None, format!("Twilio returned HTTP {}", status.as_u16()), None),
            };
            warn!(
                "Twilio rejected message to {} ({}): {} [{}]",
                to,
                status,
                message,
                more_info.as_deref().unwrap_or("no details")
            );
            return Err(ProviderError::Rejected {
                code,
                message,
                http_status: status.as_u16(),
            });
        }

        let resource = response.json::<MessageResource>().await?;
        debug!("Twilio accepted message {} with status {}", resource.sid, resource.status);

        Ok(SmsReceipt {
            sid: resource.sid,
            status: resource.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_url_ignores_trailing_slash() {
        let client = TwilioClient::new("http://localhost:9999/");
        assert_eq!(
            client.messages_url("AC123"),
            "http://localhost:9999/2010-04-01/Accounts/AC123/Messages.json"
        );
    }
}
