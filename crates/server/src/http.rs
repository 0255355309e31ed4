//! Health/admission HTTP surface (§6 "Health/metrics endpoints"): this
//! process never serves the call media itself over HTTP, so the surface
//! here is deliberately small — liveness, readiness, Prometheus
//! scraping, and an authenticated config reload.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/live", get(live))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/reload", post(reload))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn live() -> StatusCode {
    StatusCode::OK
}

/// Ready once the telephony control channel is reachable and the call
/// store isn't already saturated (§6).
async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    if !state.deps.ari.is_reachable().await {
        return (StatusCode::SERVICE_UNAVAILABLE, "ari unreachable").into_response();
    }

    let max_concurrent = state.config().read().server.max_concurrent_calls;
    if state.active_call_count() >= max_concurrent {
        return (StatusCode::SERVICE_UNAVAILABLE, "at capacity").into_response();
    }

    (StatusCode::OK, "ready").into_response()
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics_handle.render())
}

/// `POST /reload` (§6): reloads `Settings` from files/env. Requires the
/// configured bearer token, when one is set.
async fn reload(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let required_token = state.config().read().server.reload_token.clone();
    if let Some(expected) = required_token {
        let provided = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if provided != Some(expected.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    match state.reload_config() {
        Ok(()) => (StatusCode::OK, "reloaded").into_response(),
        Err(e) => {
            tracing::error!(%e, "config reload failed");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}
