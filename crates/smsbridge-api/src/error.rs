use axum::{
    Json,
    extract::{
        FromRequest, FromRequestParts, Request,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{error, warn};

/// Every failure a handler can report, mapped onto an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or malformed input.
    #[error("{0}")]
    Validation(String),

    /// Duplicate email. Reported as 400 to keep the dashboard contract.
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    /// Unknown resource, or one the caller does not own.
    #[error("{0}")]
    NotFound(String),

    /// The SMS provider rejected the send.
    #[error("Twilio error: {message}")]
    Provider { code: Option<i64>, message: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Conflict(_) | Self::Provider { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Error chain of an internal failure, carried on the response so
/// [`attach_error_detail`] can decide whether the client gets to see it.
#[derive(Debug, Clone)]
struct ErrorDetail {
    body: ErrorBody,
    stack: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Internal(err) => {
                error!("Internal error: {:#}", err);
                ErrorBody { message: "Server error".into(), code: None, stack: None }
            }
            Self::Provider { code, .. } => ErrorBody { message: self.to_string(), code: *code, stack: None },
            other => ErrorBody { message: other.to_string(), code: None, stack: None },
        };

        let mut response = (status, Json(body.clone())).into_response();
        if let Self::Internal(err) = &self {
            response.extensions_mut().insert(ErrorDetail {
                body,
                stack: format!("{:?}", err),
            });
        }
        response
    }
}

/// Outside production, rewrite internal-error responses to include the error chain.
pub async fn attach_error_detail(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    match response.extensions_mut().remove::<ErrorDetail>() {
        Some(ErrorDetail { mut body, stack }) => {
            body.stack = Some(stack);
            (response.status(), Json(body)).into_response()
        }
        None => response,
    }
}

/// JSON request body whose rejections render as [`ApiError::Validation`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        warn!("Rejected request body: {}", rejection.body_text());
        Self::Validation(rejection.body_text())
    }
}

/// Query string whose rejections render as [`ApiError::Validation`].
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct QueryParams<T>(pub T);

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        warn!("Rejected query string: {}", rejection.body_text());
        Self::Validation(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_taxonomy() {
        assert_eq!(ApiError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Conflict("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthorized("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Provider { code: Some(21211), message: "bad number".into() }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn provider_message_is_prefixed() {
        let err = ApiError::Provider { code: Some(21211), message: "bad number".into() };
        assert_eq!(err.to_string(), "Twilio error: bad number");
    }

    #[test]
    fn internal_errors_hide_detail_by_default() {
        let response = ApiError::Internal(anyhow::anyhow!("disk on fire")).into_response();
        let detail = response.extensions().get::<ErrorDetail>().unwrap();
        assert_eq!(detail.body.message, "Server error");
        assert!(detail.body.stack.is_none());
        assert!(detail.stack.contains("disk on fire"));
    }
}
