use std::collections::HashMap;

use axum::{
    Form, Json, Router,
    extract::Path,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::post,
};
use serde_json::json;

use smsbridge_twilio::{ProviderCredentials, ProviderError, SmsProvider, TwilioClient};

// "AC123:secret" base64-encoded.
const EXPECTED_AUTH: &str = "Basic QUMxMjM6c2VjcmV0";

async fn create_message(
    Path(account_sid): Path<String>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if auth != EXPECTED_AUTH {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "code": 20003, "message": "Authenticate", "status": 401 })),
        );
    }

    if form.get("To").map(String::as_str) == Some("+1invalid") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "code": 21211,
                "message": "The 'To' number +1invalid is not a valid phone number.",
                "more_info": "https://www.twilio.com/docs/errors/21211",
                "status": 400
            })),
        );
    }

    (
        StatusCode::CREATED,
        Json(json!({
            "sid": format!("SM-{}", account_sid),
            "status": "queued",
            "to": form.get("To"),
            "from": form.get("From"),
            "body": form.get("Body"),
        })),
    )
}

async fn spawn_stub() -> String {
    let app = Router::new().route(
        "/2010-04-01/Accounts/{account_sid}/Messages.json",
        post(create_message),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn credentials(auth_token: &str) -> ProviderCredentials {
    ProviderCredentials {
        account_sid: "AC123".into(),
        auth_token: auth_token.into(),
        from: "+15550001111".into(),
    }
}

#[tokio::test]
async fn accepted_message_returns_sid_and_status() {
    let client = TwilioClient::new(spawn_stub().await);

    let receipt = client
        .send_sms(&credentials("secret"), "+15552223333", "hello")
        .await
        .unwrap();

    assert_eq!(receipt.sid, "SM-AC123");
    assert_eq!(receipt.status, "queued");
}

#[tokio::test]
async fn rejected_message_carries_twilio_code() {
    let client = TwilioClient::new(spawn_stub().await);

    let err = client
        .send_sms(&credentials("secret"), "+1invalid", "hello")
        .await
        .unwrap_err();

    match err {
        ProviderError::Rejected { code, message, http_status } => {
            assert_eq!(code, Some(21211));
            assert!(message.contains("not a valid phone number"));
            assert_eq!(http_status, 400);
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn bad_credentials_are_rejected() {
    let client = TwilioClient::new(spawn_stub().await);

    let err = client
        .send_sms(&credentials("wrong"), "+15552223333", "hello")
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Rejected { code: Some(20003), http_status: 401, .. }));
}

#[tokio::test]
async fn unreachable_provider_is_a_transport_error() {
    // Bind and immediately drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = TwilioClient::new(format!("http://{}", addr));
    let err = client
        .send_sms(&credentials("secret"), "+15552223333", "hello")
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Transport(_)));
}
