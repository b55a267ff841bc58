// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Health is public; everything else
// requires the shared bearer token when one is configured. CORS is
// permissive for development.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::validate_token;
use crate::app_state::AppState;
use crate::journal::Journal;
use crate::types::TradingMode;

/// How many journal entries the read-back endpoint returns.
const JOURNAL_READBACK_LIMIT: usize = 100;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/events", get(recent_events))
        .route("/api/v1/journal", get(journal))
        .route("/api/v1/control/pause", post(control_pause))
        .route("/api/v1/control/resume", post(control_resume))
        .route("/api/v1/control/kill", post(control_kill))
        // ── WebSocket ───────────────────────────────────────────────
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

/// Extract and validate the bearer token from the Authorization header.
fn authorized(headers: &HeaderMap) -> bool {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    validate_token(token)
}

fn forbidden() -> axum::response::Response {
    (StatusCode::FORBIDDEN, "invalid or missing token").into_response()
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    uptime_s: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        uptime_s: state.start_time.elapsed().as_secs(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Snapshots
// =============================================================================

async fn full_state(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !authorized(&headers) {
        return forbidden();
    }
    Json(state.build_snapshot()).into_response()
}

async fn recent_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !authorized(&headers) {
        return forbidden();
    }
    Json(state.recent_events()).into_response()
}

async fn journal(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !authorized(&headers) {
        return forbidden();
    }

    let path = state.config.read().journal_path.clone();
    if path.is_empty() {
        return Json(Vec::<crate::performance::TradeOutcome>::new()).into_response();
    }

    match Journal::new(&path).read_recent(JOURNAL_READBACK_LIMIT) {
        Ok(outcomes) => Json(outcomes).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("journal read failed: {e}"),
        )
            .into_response(),
    }
}

// =============================================================================
// Control
// =============================================================================

#[derive(Serialize)]
struct ControlResponse {
    trading_mode: String,
}

fn set_mode(state: &AppState, mode: TradingMode) -> Json<ControlResponse> {
    state.config.write().trading_mode = mode;
    state.increment_version();
    info!(mode = %mode, "trading mode changed via API");
    Json(ControlResponse {
        trading_mode: mode.to_string(),
    })
}

async fn control_pause(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !authorized(&headers) {
        return forbidden();
    }
    set_mode(&state, TradingMode::Paused).into_response()
}

async fn control_resume(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !authorized(&headers) {
        return forbidden();
    }
    set_mode(&state, TradingMode::Live).into_response()
}

async fn control_kill(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !authorized(&headers) {
        return forbidden();
    }
    set_mode(&state, TradingMode::Killed).into_response()
}
