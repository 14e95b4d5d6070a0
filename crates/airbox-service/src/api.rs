//! HTTP endpoints for the gateway.
//!
//! - `GET /` returns the current reading as one JSON line
//! - `GET /api/health` returns liveness plus store freshness
//!
//! Errors are returned as `{"error": "..."}` via [`AppError`].
//!
//! # Example
//!
//! ```ignore
//! use airbox_service::api;
//!
//! let app = api::app(state);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use time::OffsetDateTime;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(current_reading))
        .route("/api/health", get(health))
}

/// The router with request tracing and state attached, ready to serve.
pub fn app(state: Arc<AppState>) -> Router {
    router()
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Current reading, newline terminated.
async fn current_reading(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let reading = state.readings.snapshot();
    let mut body =
        serde_json::to_string(&reading).map_err(|e| AppError::Internal(e.to_string()))?;
    body.push('\n');

    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Readings stored since startup.
    pub updates: u64,
    /// When the last reading arrived, if any has.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_update: Option<OffsetDateTime>,
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let latest = state.readings.latest();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
        updates: latest.updates,
        last_update: latest.updated_at,
    })
}

/// API error type.
#[derive(Debug)]
pub enum AppError {
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
