use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use burnlink_api::{router, AppState, RateLimiter};
use burnlink_envelope::{seal_with, unseal_with, KdfParams};
use burnlink_vault::{
    GatewayConfig, InMemoryBackend, KeyringEntry, LinkId, RetrievalGateway, RevealResponse,
    SecretStore, ServerKeyring,
};

const FAST_KDF: KdfParams = KdfParams {
    mem_cost_kib: 256,
    time_cost: 1,
    parallelism: 1,
};

fn test_config() -> GatewayConfig {
    GatewayConfig {
        max_secret_bytes: 1024,
        min_response_time: Duration::ZERO,
        response_jitter: Duration::ZERO,
        ..GatewayConfig::default()
    }
}

fn app_with(store: Arc<dyn SecretStore>, burst: u32) -> Router {
    let keyring = Arc::new(ServerKeyring::new(KeyringEntry::generate()));
    let state = Arc::new(AppState {
        gateway: RetrievalGateway::new(store, keyring, test_config()),
        rate_limiter: RateLimiter::new(0.0, burst),
    });
    router(state).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))))
}

fn app() -> Router {
    app_with(Arc::new(InMemoryBackend::new()), 1000)
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Vec<u8>) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn create(app: &Router, body: Value) -> String {
    let (status, bytes) = send(app, Method::POST, "/api/share", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    let v: Value = serde_json::from_slice(&bytes).unwrap();
    v["linkId"].as_str().unwrap().to_string()
}

async fn reveal(app: &Router, link_id: &str) -> (StatusCode, Vec<u8>) {
    send(app, Method::GET, &format!("/api/share/secret/{link_id}"), None).await
}

fn keys_of(body: &[u8]) -> Vec<String> {
    let v: Value = serde_json::from_slice(body).unwrap();
    v.as_object().unwrap().keys().cloned().collect()
}

#[tokio::test]
async fn health_reports_ok() {
    let (status, body) = send(&app(), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["status"], "ok");
}

#[tokio::test]
async fn hello_round_trip() {
    let app = app();
    let id = create(&app, json!({"plaintext": "hello"})).await;
    assert!(LinkId::parse(&id).is_ok());

    let (status, body) = reveal(&app, &id).await;
    assert_eq!(status, StatusCode::OK);
    let response: RevealResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        response,
        RevealResponse::ServerManaged {
            payload: "hello".into(),
            mime_type: "text/plain".into(),
        }
    );

    let (status, body) = reveal(&app, &id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(keys_of(&body), vec!["_padding"]);
}

#[tokio::test]
async fn consumed_and_never_issued_are_indistinguishable() {
    let app = app();
    let id = create(&app, json!({"plaintext": "once"})).await;
    let (_, delivered) = reveal(&app, &id).await;

    let (s1, consumed) = reveal(&app, &id).await;
    let (s2, never) = reveal(&app, LinkId::generate().as_str()).await;
    let (s3, malformed) = reveal(&app, "zzzz").await;

    for (status, body) in [(s1, &consumed), (s2, &never), (s3, &malformed)] {
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.len(), consumed.len());
        assert_eq!(keys_of(body), vec!["_padding"]);
    }
    assert_eq!(delivered.len(), consumed.len());
}

#[tokio::test]
async fn e2ee_round_trip() {
    let app = app();
    let envelope = seal_with(b"s3cret", "correct-horse-battery-staple", &FAST_KDF).unwrap();
    let id = create(
        &app,
        json!({
            "ciphertext": envelope.ciphertext,
            "salt": envelope.salt,
            "nonce": envelope.nonce,
            "mimeType": "text/markdown",
        }),
    )
    .await;

    let (_, body) = reveal(&app, &id).await;
    let response: RevealResponse = serde_json::from_slice(&body).unwrap();
    let returned = response.envelope().expect("e2ee body");
    let pt = unseal_with(&returned, "correct-horse-battery-staple", &FAST_KDF).unwrap();
    assert_eq!(pt.as_slice(), b"s3cret");
    assert!(matches!(
        response,
        RevealResponse::EndToEnd { ref mime_type, .. } if mime_type == "text/markdown"
    ));
}

#[tokio::test]
async fn escape_heavy_secret_is_accepted_and_padded() {
    let app = app();
    let worst = "\u{1}".repeat(1024);
    let id = create(&app, json!({ "plaintext": worst })).await;

    let (_, delivered) = reveal(&app, &id).await;
    let (_, never) = reveal(&app, LinkId::generate().as_str()).await;
    assert_eq!(delivered.len(), never.len());
    let v: Value = serde_json::from_slice(&delivered).unwrap();
    assert_eq!(v["payload"].as_str().map(str::len), Some(1024));
}

#[tokio::test]
async fn head_never_consumes() {
    let app = app();
    let id = create(&app, json!({"plaintext": "preview-safe"})).await;
    let uri = format!("/api/share/secret/{id}");

    for _ in 0..3 {
        let (status, body) = send(&app, Method::HEAD, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
    }
    let (status, never) = send(&app, Method::HEAD, "/api/share/secret/nope", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(never.is_empty());

    let (_, body) = reveal(&app, &id).await;
    assert!(keys_of(&body).contains(&"payload".to_string()));
}

#[tokio::test]
async fn validation_errors_are_reported() {
    let app = app();

    let empty = json!({"plaintext": ""});
    let (status, _) = send(&app, Method::POST, "/api/share", Some(empty)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/share",
        Some(json!({"plaintext": "x", "ciphertext": "AAAA", "salt": "AAAA", "nonce": "AAAA"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/share",
        Some(json!({"plaintext": "x".repeat(1025)})),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/share",
        Some(json!({"plaintext": "x", "ttlSeconds": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, Method::POST, "/api/share", Some(json!([1, 2]))).await;
    assert!(status.is_client_error());
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert!(v["error"].is_string());
}

#[tokio::test]
async fn reveal_headers_forbid_caching() {
    let app = app();
    let resp = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/share/secret/{}", LinkId::generate()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-store");
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
}

#[tokio::test]
async fn rate_limit_applies_equally_and_spares_health() {
    let app = app_with(Arc::new(InMemoryBackend::new()), 2);
    let id = create(&app, json!({"plaintext": "limited"})).await;

    // bucket of 2, one token spent on create
    let (status, _) = reveal(&app, LinkId::generate().as_str()).await;
    assert_eq!(status, StatusCode::OK);

    let (live, _) = reveal(&app, &id).await;
    let (dead, _) = reveal(&app, LinkId::generate().as_str()).await;
    assert_eq!(live, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(dead, StatusCode::TOO_MANY_REQUESTS);

    let (status, _) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}
