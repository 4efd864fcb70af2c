use serde::Deserialize;

/// Subset of the Message resource returned by `POST .../Messages.json`.
#[derive(Debug, Deserialize)]
pub struct MessageResource {
    pub sid: String,
    pub status: String,
}

/// Error body Twilio returns alongside 4xx/5xx responses.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub code: Option<i64>,
    pub message: String,
    pub more_info: Option<String>,
}
