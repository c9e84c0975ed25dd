//! HTTP API handlers

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;

use crate::control::server::AppState;
use crate::control::{ProcessingState, ProcessingUpdate, StreamStatus};
use crate::dsp::meter::{normalize_db, LevelSnapshot};
use crate::dsp::spectrum::FLOOR_DB;
use crate::session::SessionStats;

/// Header carrying the hex auth token
pub const TOKEN_HEADER: &str = "x-mpx-token";

/// Header carrying the Unix timestamp the token was issued for
pub const TIMESTAMP_HEADER: &str = "x-mpx-timestamp";

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Meter levels with display-normalized companions
#[derive(serde::Serialize)]
pub struct LevelsResponse {
    #[serde(flatten)]
    pub levels: LevelSnapshot,
    /// VU levels mapped onto `[0, 1]` over -60..0 dBFS
    pub vu_normalized: [f32; 2],
    pub peak_normalized: [f32; 2],
}

/// Mutating requests must carry a valid time-boxed token when
/// authentication is enabled
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), String> {
    if !state.auth.is_enabled() {
        return Ok(());
    }
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or("missing auth token")?;
    let timestamp: f64 = headers
        .get(TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or("missing or invalid auth timestamp")?;

    if state.auth.verify_token(token, timestamp) {
        Ok(())
    } else {
        Err("invalid or expired auth token".into())
    }
}

/// Get stream status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StreamStatus>> {
    Json(ApiResponse::ok(state.control.status()))
}

/// Get session statistics
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SessionStats>> {
    Json(ApiResponse::ok(state.control.stats()))
}

/// Get meter levels
pub async fn get_levels(State(state): State<Arc<AppState>>) -> Json<ApiResponse<LevelsResponse>> {
    let levels = state.control.levels();
    let norm = |db: f32| normalize_db(db, FLOOR_DB, 0.0);
    Json(ApiResponse::ok(LevelsResponse {
        vu_normalized: levels.vu_db.map(norm),
        peak_normalized: levels.peak_db.map(norm),
        levels,
    }))
}

/// Toggle AGC and/or limiter
pub async fn set_processing(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(update): Json<ProcessingUpdate>,
) -> (StatusCode, Json<ApiResponse<ProcessingState>>) {
    if let Err(e) = authorize(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(ApiResponse::error(e)));
    }
    let processing = state.control.set_processing(update);
    (StatusCode::OK, Json(ApiResponse::ok(processing)))
}

/// Stop the stream
pub async fn stop_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> (StatusCode, Json<ApiResponse<()>>) {
    if let Err(e) = authorize(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(ApiResponse::error(e)));
    }

    // Stopping joins the I/O threads; keep that off the async workers
    let control = state.control.clone();
    match tokio::task::spawn_blocking(move || control.stop_stream()).await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok(()))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}
