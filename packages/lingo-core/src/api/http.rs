//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the speech service for business
//! logic; errors render as JSON through `LingoError::into_response`.

use axum::extract::State;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::error::{LingoError, LingoResult};
use crate::protocol_constants::SERVICE_ID;
use crate::recognizer::result::RecognitionResult;
use crate::service::{
    CloseSessionResponse, StartSessionRequest, StartSessionResponse, TranslationRequest,
    TranslationResponse,
};

// ─────────────────────────────────────────────────────────────────────────────
// Request / Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseSessionRequest {
    session_id: String,
}

/// Deprecated REST audio path request (base64 chunks).
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessAudioRequest {
    session_id: String,
    #[serde(default)]
    audio_data: String,
}

#[derive(Debug, Serialize)]
struct ProcessAudioResponse {
    results: Vec<RecognitionResult>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the CORS layer from the configured allowlist.
///
/// An empty allowlist admits any origin; configured origins that fail to
/// parse are skipped with a warning.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("[Server] Skipping unparseable CORS origin: {}", origin);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/streaming/start", post(start_streaming))
        .route("/api/v1/streaming/close", post(close_streaming))
        .route("/api/v1/streaming/process", post(process_audio))
        .route("/api/v1/translation", post(translate_text))
        .route("/api/v1/streaming/ws/{session_id}", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe: "Is the process running?"
///
/// Always returns 200 OK if the server is responding. Use `/ready` for
/// readiness checks that verify the service can accept new sessions.
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "activeSessions": state.registry.len(),
        "limits": {
            "maxSessions": state.registry.max_sessions(),
        }
    }))
}

/// Readiness probe: "Can the service accept new sessions?"
///
/// Returns 200 OK only when credentials are configured and the session cap
/// has headroom; 503 Service Unavailable with details otherwise.
async fn readiness_check(State(state): State<AppState>) -> axum::response::Response {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    let credentials_ready = state.config.validate().is_ok();
    let capacity_ready = state.registry.len() < state.registry.max_sessions();
    let ready = credentials_ready && capacity_ready;

    let status = if ready { "ready" } else { "not_ready" };
    let body = json!({
        "status": status,
        "checks": {
            "credentials": credentials_ready,
            "capacity": capacity_ready,
        }
    });

    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}

/// Provisions a streaming session and returns its WebSocket path.
async fn start_streaming(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> LingoResult<Json<StartSessionResponse>> {
    let response = state.service.start_streaming_session(request).await?;
    Ok(Json(response))
}

/// Terminates a streaming session by id.
async fn close_streaming(
    State(state): State<AppState>,
    Json(request): Json<CloseSessionRequest>,
) -> LingoResult<Json<CloseSessionResponse>> {
    let response = state
        .service
        .close_streaming_session(&request.session_id)
        .await?;
    Ok(Json(response))
}

/// Deprecated base64 audio path: accepts, validates, and discards.
async fn process_audio(
    State(state): State<AppState>,
    Json(request): Json<ProcessAudioRequest>,
) -> LingoResult<Json<ProcessAudioResponse>> {
    let audio = BASE64
        .decode(request.audio_data.as_bytes())
        .map_err(|e| LingoError::InvalidRequest(format!("invalid base64 audio data: {e}")))?;
    let results = state
        .service
        .process_audio_chunk(&request.session_id, Bytes::from(audio))
        .await?;
    Ok(Json(ProcessAudioResponse { results }))
}

/// Synchronous text translation.
async fn translate_text(
    State(state): State<AppState>,
    Json(request): Json<TranslationRequest>,
) -> LingoResult<Json<TranslationResponse>> {
    let response = state.service.translate_text(request).await?;
    Ok(Json(response))
}
