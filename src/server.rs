//! HTTP Surface
//!
//! Thin liveness and scrape endpoints. No logic lives here: `/healthz`
//! returns a static ok and `/metrics` renders the injected registry.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde_json::json;

use crate::metrics::{Metrics, METRICS_CONTENT_TYPE};

/// Build the router for the health and metrics endpoints
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/healthz", get(healthcheck))
        .route("/metrics", get(serve_metrics))
        .with_state(metrics)
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn serve_metrics(State(metrics): State<Arc<Metrics>>) -> Response {
    match metrics.gather() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
