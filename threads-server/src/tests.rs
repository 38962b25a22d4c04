#![cfg(test)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{self, Request, StatusCode},
    Router,
};
use threads_api::{webhook::WebhookSecret, Error as ApiError};
use tower::ServiceExt;

use crate::{
    extractors::{AppState, PgPool},
    session::{test_token, SessionVerifier},
    webhook::{CreationEchoes, WebhookResponse},
};

const SESSION_SECRET: &str = "session test secret";
const WEBHOOK_SECRET: &str = "whsec_c3VwZXIgc2VjcmV0IGtleSBmb3Igd2ViaG9va3MhIQ==";

// The pool never connects: the requests below are all answered before touching the database
fn test_app(echoes: CreationEchoes) -> Router {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://nobody@localhost/nowhere")
        .unwrap();
    crate::router(AppState {
        db: PgPool::new(pool),
        sessions: Arc::new(SessionVerifier::new(SESSION_SECRET).unwrap()),
        webhook_secret: Arc::new(WebhookSecret::new(WEBHOOK_SECRET).unwrap()),
        echoes,
    })
}

async fn call(app: Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    (status, body.to_vec())
}

fn signed_webhook(body: &str, timestamp: i64) -> Request<Body> {
    let secret = WebhookSecret::new(WEBHOOK_SECRET).unwrap();
    Request::post("/api/webhooks/identity")
        .header(http::header::CONTENT_TYPE, "application/json")
        .header("svix-id", "msg_1")
        .header("svix-timestamp", timestamp.to_string())
        .header(
            "svix-signature",
            secret.sign("msg_1", timestamp, body.as_bytes()),
        )
        .body(Body::from(String::from(body)))
        .unwrap()
}

fn message(body: &[u8]) -> String {
    serde_json::from_slice::<WebhookResponse>(body)
        .unwrap()
        .message
}

#[tokio::test]
async fn whoami_returns_the_session_subject() {
    let exp = (chrono::Utc::now().timestamp() + 3600) as u64;
    let req = Request::get("/api/whoami")
        .header(
            http::header::AUTHORIZATION,
            format!("Bearer {}", test_token(SESSION_SECRET, "user_42", exp)),
        )
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(test_app(CreationEchoes::default()), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_slice::<String>(&body).unwrap(), "user_42");
}

#[tokio::test]
async fn unauthenticated_requests_are_denied() {
    for uri in ["/api/whoami", "/api/threads", "/api/users/me", "/api/activity"] {
        let req = Request::get(uri).body(Body::empty()).unwrap();
        let (status, body) = call(test_app(CreationEchoes::default()), req).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        assert!(matches!(
            ApiError::parse(&body).unwrap(),
            ApiError::PermissionDenied
        ));
    }
}

#[tokio::test]
async fn webhooks_without_headers_are_rejected() {
    let req = Request::post("/api/webhooks/identity")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = call(test_app(CreationEchoes::default()), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(matches!(
        ApiError::parse(&body).unwrap(),
        ApiError::MissingWebhookHeaders
    ));
}

#[tokio::test]
async fn webhooks_with_bad_signatures_are_rejected() {
    let now = chrono::Utc::now().timestamp();
    let body = r#"{"type":"user.updated","data":{"id":"user_1"}}"#;
    let mut req = signed_webhook(body, now);
    req.headers_mut().insert(
        "svix-signature",
        http::HeaderValue::from_static("v1,AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="),
    );
    let (status, resp) = call(test_app(CreationEchoes::default()), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(matches!(
        ApiError::parse(&resp).unwrap(),
        ApiError::InvalidWebhookSignature
    ));

    for ts in [now - 3600, i64::MIN, i64::MAX] {
        let (status, resp) = call(
            test_app(CreationEchoes::default()),
            signed_webhook(body, ts),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "timestamp {ts}");
        assert!(matches!(
            ApiError::parse(&resp).unwrap(),
            ApiError::InvalidWebhookSignature
        ));
    }
}

#[tokio::test]
async fn non_json_webhooks_are_rejected() {
    let req = signed_webhook("definitely not json", chrono::Utc::now().timestamp());
    let (status, body) = call(test_app(CreationEchoes::default()), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(matches!(
        ApiError::parse(&body).unwrap(),
        ApiError::InvalidWebhookPayload(_)
    ));
}

#[tokio::test]
async fn webhook_events_without_data_are_rejected() {
    let req = signed_webhook(
        r#"{"type":"organization.created"}"#,
        chrono::Utc::now().timestamp(),
    );
    let (status, body) = call(test_app(CreationEchoes::default()), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(matches!(
        ApiError::parse(&body).unwrap(),
        ApiError::InvalidWebhookPayload(_)
    ));
}

#[tokio::test]
async fn unknown_webhook_events_are_acknowledged() {
    let req = signed_webhook(
        r#"{"type":"user.updated","data":{"id":"user_1"}}"#,
        chrono::Utc::now().timestamp(),
    );
    let (status, body) = call(test_app(CreationEchoes::default()), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(message(&body), "Event ignored.");
}

#[tokio::test]
async fn invitations_are_acknowledged() {
    let req = signed_webhook(
        r#"{"type":"organizationInvitation.created","data":{"id":"orginv_1"}}"#,
        chrono::Utc::now().timestamp(),
    );
    let (status, body) = call(test_app(CreationEchoes::default()), req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message(&body), "Invitation created.");
}

#[tokio::test]
async fn creation_echoes_are_skipped() {
    let echoes = CreationEchoes::default();
    echoes.arm();
    let req = signed_webhook(
        r#"{"type":"organization.updated","data":{"id":"org_1","name":"Rustaceans"}}"#,
        chrono::Utc::now().timestamp(),
    );
    let (status, body) = call(test_app(echoes.clone()), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(message(&body), "Execution skipped.");
    assert!(!echoes.is_armed());
}
