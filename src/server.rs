use crate::audio::AudioUpload;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::logging::{LogEntry, SharedLogger};
use crate::relay::{Relay, NOT_CONFIGURED};
use crate::translate::client_types::{ChatRequest, ErrorResponse, StatusResponse, TextResponse};
use crate::translate::request::{effective_model, is_reasoning_model, normalize};

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Largest accepted audio upload.
const MAX_AUDIO_BYTES: usize = 25 * 1024 * 1024;

const DEFAULT_LOG_LIMIT: usize = 100;
const MAX_LOG_LIMIT: usize = 1000;

const REDACTED_MESSAGE: &str = "Internal server error. See server logs for details.";

#[derive(Clone)]
pub struct AppState {
    pub config: RelayConfig,
    pub relay: Relay,
    pub logger: SharedLogger,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/logs", get(handle_logs))
        .route("/api/chat", post(handle_chat))
        .route("/api/chat-vision", post(handle_chat_vision))
        .route(
            "/api/transcribe",
            post(handle_transcribe).layer(DefaultBodyLimit::max(MAX_AUDIO_BYTES)),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// The only place a [`RelayError`] becomes a status code.
pub fn status_for(err: &RelayError) -> StatusCode {
    match err {
        RelayError::Validation { .. } => StatusCode::BAD_REQUEST,
        RelayError::Config { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(state: &AppState, component: &str, err: &RelayError) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        state.logger.error(component, err.to_string());
    } else {
        state.logger.warn(component, err.to_string());
    }

    let redact = state.config.server.redact_errors && status == StatusCode::INTERNAL_SERVER_ERROR;
    let message = if redact {
        REDACTED_MESSAGE.to_string()
    } else {
        err.to_string()
    };
    (status, Json(ErrorResponse::new(message))).into_response()
}

fn parse_chat_request(body: &Bytes) -> Result<ChatRequest, RelayError> {
    serde_json::from_slice(body)
        .map_err(|e| RelayError::validation(format!("Invalid request body: {}", e)))
}

async fn handle_chat(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req = match parse_chat_request(&body) {
        Ok(r) => r,
        Err(e) => return error_response(&state, "chat", &e),
    };

    let model = effective_model(req.model.as_deref(), &state.config.models.default_chat_model);
    let params = match normalize(&req.messages, &model, req.reasoning_effort, true) {
        Ok(p) => p.with_sampling(&state.config.params),
        Err(e) => return error_response(&state, "chat", &e),
    };

    // Checked before any byte is streamed.
    if !state.relay.is_configured() {
        return error_response(&state, "chat", &RelayError::config(NOT_CONFIGURED));
    }

    let log = state.logger.request("chat");
    let request_id = log.request_id().to_string();
    let fragments = state
        .relay
        .stream_chat(params, log)
        .map(|fragment| Ok::<_, Infallible>(Bytes::from(fragment)));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-accel-buffering", "no")
        .header("x-request-id", request_id)
        .body(Body::from_stream(fragments))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn handle_chat_vision(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req = match parse_chat_request(&body) {
        Ok(r) => r,
        Err(e) => return error_response(&state, "chat-vision", &e),
    };

    let model = effective_model(req.model.as_deref(), &state.config.models.default_vision_model);
    let params = match normalize(&req.messages, &model, req.reasoning_effort, false) {
        Ok(p) => p.with_sampling(&state.config.params),
        Err(e) => return error_response(&state, "chat-vision", &e),
    };

    let log = state.logger.request("chat-vision");
    if !req.messages.iter().any(|m| m.content.has_image()) {
        log.warn("Vision request carries no image part");
    }

    match state
        .relay
        .compose_chat(params, is_reasoning_model(&model), &log)
        .await
    {
        Ok(composed) => Json(TextResponse {
            text: composed.render(),
        })
        .into_response(),
        Err(e) => {
            log.error(format!("Completion failed: {}", e));
            error_response(&state, "chat-vision", &e)
        }
    }
}

async fn handle_transcribe(State(state): State<Arc<AppState>>, multipart: Multipart) -> Response {
    let (upload, model) = match read_audio_form(multipart).await {
        Ok(form) => form,
        Err(e) => return error_response(&state, "transcribe", &e),
    };

    let model = effective_model(
        model.as_deref(),
        &state.config.models.default_transcription_model,
    );

    let log = state.logger.request("transcribe");
    match state.relay.transcribe(upload, &model, &log).await {
        Ok(text) => Json(TextResponse { text }).into_response(),
        Err(e) => error_response(&state, "transcribe", &e),
    }
}

/// Pull the `file` and optional `model` fields out of the form. Other fields
/// are ignored.
async fn read_audio_form(
    mut multipart: Multipart,
) -> Result<(AudioUpload, Option<String>), RelayError> {
    let mut upload = AudioUpload {
        bytes: Bytes::new(),
        filename: None,
        content_type: None,
    };
    let mut model = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| RelayError::validation(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                upload.filename = field.file_name().map(String::from);
                upload.content_type = field.content_type().map(String::from);
                upload.bytes = field.bytes().await.map_err(|e| {
                    RelayError::validation(format!("Failed to read uploaded file: {}", e))
                })?;
            }
            Some("model") => {
                let value = field.text().await.map_err(|e| {
                    RelayError::validation(format!("Failed to read model field: {}", e))
                })?;
                model = Some(value);
            }
            _ => {}
        }
    }

    Ok((upload, model))
}

async fn handle_root() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
        message: "Chat relay is running.".to_string(),
    })
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "provider_configured": state.relay.is_configured(),
        "provider": state.relay.provider_name(),
    }))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

/// Most recent journal entries, newest first.
async fn handle_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Json<Vec<LogEntry>> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT);
    Json(state.logger.recent(limit))
}
