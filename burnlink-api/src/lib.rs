//! # Burnlink API
//!
//! HTTP interface to the retrieval gateway.
//!
//! ```text
//!   POST /api/share                     create   → 201 {"linkId": "..."}
//!   GET  /api/share/secret/{linkId}     reveal   → 200, always
//!   HEAD /api/share/secret/{linkId}     preview  → 200, no body, store untouched
//!   GET  /health                        liveness → 200 {"status": "ok", ...}
//! ```
//!
//! Reveal never returns anything but 200. A consumed, expired, never-issued or
//! malformed link all get the same padded empty object.

pub mod config;
pub mod keys;
pub mod rate_limit;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use burnlink_vault::{CreateError, CreateRequest, RetrievalGateway, ValidationError};

pub use rate_limit::{RateDecision, RateLimiter};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub gateway: RetrievalGateway,
    pub rate_limiter: RateLimiter,
}

pub type Shared = Arc<AppState>;

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Serialize, Clone, Debug)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatedResponse {
    link_id: String,
}

fn err(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ApiError::new(msg))).into_response()
}

fn create_error_response(e: CreateError) -> Response {
    match e {
        CreateError::Validation(v @ ValidationError::TooLarge { .. }) => {
            err(StatusCode::PAYLOAD_TOO_LARGE, v.to_string())
        }
        CreateError::Validation(v) => err(StatusCode::BAD_REQUEST, v.to_string()),
        CreateError::Store(e) => {
            tracing::error!(error = %e, "create failed in store");
            err(StatusCode::SERVICE_UNAVAILABLE, "temporarily unavailable, try again")
        }
        CreateError::Keyring(e) => {
            tracing::error!(error = %e, "create failed in keyring");
            err(StatusCode::SERVICE_UNAVAILABLE, "temporarily unavailable, try again")
        }
    }
}

/// Reveal bodies must not be cached or leak the URL onward.
fn private_headers() -> [(header::HeaderName, HeaderValue); 3] {
    [
        (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
        (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        (header::REFERRER_POLICY, HeaderValue::from_static("no-referrer")),
    ]
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

async fn create_secret(
    State(state): State<Shared>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return err(rejection.status(), rejection.body_text()),
    };
    match state.gateway.create(request).await {
        Ok(link_id) => {
            tracing::info!(link = %link_id.short(), "secret created");
            (
                StatusCode::CREATED,
                Json(CreatedResponse {
                    link_id: link_id.to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => create_error_response(e),
    }
}

async fn reveal_secret(State(state): State<Shared>, Path(link_id): Path<String>) -> Response {
    let body = state.gateway.reveal_body(&link_id).await;
    (StatusCode::OK, private_headers(), body).into_response()
}

/// Link previews: same status and timing as a reveal, never consumes.
async fn head_secret(State(state): State<Shared>, Path(_link_id): Path<String>) -> Response {
    state.gateway.acknowledge_head().await;
    (StatusCode::OK, private_headers()).into_response()
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: Shared) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // a create body is never larger than the largest reveal body
    let body_limit = state.gateway.config().padded_body_bytes();

    Router::new()
        .route("/health", get(health))
        .route("/api/share", post(create_secret))
        .route(
            "/api/share/secret/:link_id",
            get(reveal_secret).head(head_secret),
        )
        .layer(
            ServiceBuilder::new()
                .layer(cors)
                .layer(DefaultBodyLimit::max(body_limit))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    rate_limit::rate_limit_middleware,
                )),
        )
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: Shared,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(state);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
}
