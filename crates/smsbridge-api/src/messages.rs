use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use smsbridge_twilio::{ProviderCredentials, ProviderError};
use smsbridge_types::api::{MessageListQuery, MessagePage, MessageStats, MessageStatsQuery, SendMessageRequest};
use smsbridge_types::models::{Message, MessageStatus};

use crate::auth::present;
use crate::error::{ApiError, JsonBody, QueryParams};
use crate::middleware::AuthUser;
use crate::{AppState, blocking, load_user};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;
pub const DEFAULT_STATS_DAYS: i64 = 30;
pub const MAX_STATS_DAYS: i64 = 365;

/// Offset pagination resolved from raw query strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    /// Missing, non-numeric or non-positive values fall back to the defaults.
    pub fn from_query(query: &MessageListQuery) -> Self {
        Self {
            page: parse_positive(query.page.as_deref()).unwrap_or(DEFAULT_PAGE),
            limit: parse_positive(query.limit.as_deref())
                .unwrap_or(DEFAULT_LIMIT)
                .min(MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }

    pub fn pages(&self, total: u64) -> u64 {
        total.div_ceil(u64::from(self.limit))
    }
}

fn parse_positive(raw: Option<&str>) -> Option<u32> {
    raw.and_then(|v| v.trim().parse::<u32>().ok()).filter(|v| *v > 0)
}

/// Percentage of messages delivered; 0 when nothing has been sent.
pub fn delivery_rate(delivered: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        delivered as f64 / total as f64 * 100.0
    }
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    QueryParams(query): QueryParams<MessageListQuery>,
) -> Result<Json<MessagePage>, ApiError> {
    let pagination = Pagination::from_query(&query);

    let (messages, total) = blocking(&state, move |db| {
        let messages = db.get_messages(caller.id, pagination.limit, pagination.offset())?;
        let total = db.count_messages(caller.id)?;
        Ok((messages, total))
    })
    .await?;

    Ok(Json(MessagePage {
        messages,
        page: pagination.page,
        pages: pagination.pages(total),
        total,
    }))
}

pub async fn get_message(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Message>, ApiError> {
    let not_found = || ApiError::NotFound("Message not found".into());
    let id: Uuid = id.parse().map_err(|_| not_found())?;

    blocking(&state, move |db| db.get_message(caller.id, id))
        .await?
        .map(Json)
        .ok_or_else(not_found)
}

pub async fn message_stats(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    QueryParams(query): QueryParams<MessageStatsQuery>,
) -> Result<Json<MessageStats>, ApiError> {
    let days = query
        .days
        .as_deref()
        .and_then(|d| d.trim().parse::<i64>().ok())
        .unwrap_or(DEFAULT_STATS_DAYS)
        .clamp(1, MAX_STATS_DAYS);
    let since = Utc::now() - Duration::days(days);

    let (counts, by_date) = blocking(&state, move |db| {
        Ok((db.message_status_counts(caller.id)?, db.daily_message_counts(caller.id, since)?))
    })
    .await?;

    Ok(Json(MessageStats {
        total_messages: counts.total,
        delivered: counts.delivered,
        failed: counts.failed,
        pending: counts.pending,
        delivery_rate: delivery_rate(counts.delivered, counts.total),
        messages_by_date: by_date,
    }))
}

/// Send an SMS with the caller's own provider account and record the outcome.
///
/// The record is built `pending` and stamped with the provider's answer before
/// it is written, so a successful send is never left unrecorded. Rejected
/// sends are recorded as `failed`.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    JsonBody(req): JsonBody<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(content), Some(recipient)) = (req.content.filter(|c| !c.trim().is_empty()), present(req.recipient))
    else {
        return Err(ApiError::Validation("Please provide content and recipient".into()));
    };

    let user = load_user(&state, caller.id).await?;

    let credentials = match (
        present(user.twilio_account_sid),
        present(user.twilio_auth_token),
        present(user.twilio_phone_number),
    ) {
        (Some(account_sid), Some(auth_token), Some(from)) => ProviderCredentials { account_sid, auth_token, from },
        _ => return Err(ApiError::Validation("Twilio credentials not set up".into())),
    };

    let pending = Message::pending(user.id, content, credentials.from.clone(), recipient);
    let outcome = state.sms.send_sms(&credentials, &pending.recipient, &pending.content).await;

    match outcome {
        Ok(receipt) => {
            let message = pending.settle(MessageStatus::from_provider_status(&receipt.status), Some(receipt.sid));
            let record = message.clone();
            blocking(&state, move |db| db.insert_message(&record)).await?;

            info!("Message {} sent for user {} ({})", message.id, caller.id, message.status);
            Ok((StatusCode::CREATED, Json(message)))
        }
        Err(err) => {
            let failed = pending.settle(MessageStatus::Failed, None);
            let failed_id = failed.id;
            if let Err(e) = blocking(&state, move |db| db.insert_message(&failed)).await {
                error!("Could not record failed message {}: {}", failed_id, e);
            }

            match err {
                ProviderError::Rejected { code, message, http_status } => {
                    warn!(
                        "Provider rejected message {} for user {} (HTTP {}): {}",
                        failed_id, caller.id, http_status, message
                    );
                    Err(ApiError::Provider { code, message })
                }
                transport @ ProviderError::Transport(_) => Err(ApiError::Internal(transport.into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(page: Option<&str>, limit: Option<&str>) -> MessageListQuery {
        MessageListQuery {
            page: page.map(String::from),
            limit: limit.map(String::from),
        }
    }

    #[test]
    fn pagination_defaults() {
        assert_eq!(Pagination::from_query(&query(None, None)), Pagination { page: 1, limit: 10 });
        assert_eq!(Pagination::from_query(&query(Some("abc"), Some("x"))), Pagination { page: 1, limit: 10 });
        assert_eq!(Pagination::from_query(&query(Some("0"), Some("-5"))), Pagination { page: 1, limit: 10 });
        assert_eq!(Pagination::from_query(&query(Some("3"), Some("1000"))).limit, MAX_LIMIT);
    }

    #[test]
    fn pagination_arithmetic() {
        let p = Pagination { page: 3, limit: 10 };
        assert_eq!(p.offset(), 20);
        assert_eq!(p.pages(25), 3);
        assert_eq!(p.pages(30), 3);
        assert_eq!(p.pages(0), 0);
    }

    #[test]
    fn delivery_rate_handles_empty() {
        assert_eq!(delivery_rate(0, 0), 0.0);
        assert_eq!(delivery_rate(3, 4), 75.0);
        assert_eq!(delivery_rate(4, 4), 100.0);
    }
}
