//! HTTP surface with request handlers
//!
//! Exposes `POST /api/forward` and `GET /healthz`. The forward handler checks
//! the bearer credential before anything else, normalizes the request into
//! [`SearchCriteria`], resolves the message and forwards it. Every response
//! is wrapped in a [`ResponseEnvelope`].

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use regex::Regex;
use secrecy::SecretString;
use serde_json::{Value, json};
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::criteria::SearchCriteria;
use crate::errors::{AppError, AppResult};
use crate::forward::ForwardOrchestrator;
use crate::graph::{CallContext, MailBackend};
use crate::models::{ForwardOutcome, ForwardRequest, Meta, ResponseEnvelope};
use crate::resolver::MessageResolver;

/// `Authorization` value carrying a bearer credential, scheme case-insensitive
const BEARER_PATTERN: &str = r"(?i)^bearer\s+(\S+)\s*$";

/// Shared, immutable per-process state
#[derive(Clone)]
pub struct AppState {
    config: Arc<ServerConfig>,
    backend: Arc<dyn MailBackend>,
    bearer: Regex,
}

impl AppState {
    /// # Errors
    ///
    /// Returns `Internal` if the bearer pattern fails to compile.
    pub fn new(config: ServerConfig, backend: Arc<dyn MailBackend>) -> AppResult<Self> {
        let bearer = Regex::new(BEARER_PATTERN)
            .map_err(|e| AppError::Internal(format!("invalid bearer pattern: {e}")))?;
        Ok(Self {
            config: Arc::new(config),
            backend,
            bearer,
        })
    }
}

/// Build the service router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/forward", post(forward))
        .with_state(state)
}

async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// Handler: resolve a message from metadata and forward it
async fn forward(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let started = Instant::now();
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!("forward_request", request_id = %request_id);

    let result = forward_impl(&state, &headers, &body, &request_id)
        .instrument(span.clone())
        .await;
    let _entered = span.enter();
    finalize(started, &request_id, result)
}

async fn forward_impl(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    request_id: &str,
) -> AppResult<ForwardOutcome> {
    let token = bearer_token(headers, &state.bearer)?;
    let request: ForwardRequest = serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidInput(format!("malformed request body: {e}")))?;
    let criteria = SearchCriteria::from_request(&request)?;
    let fallback = request
        .fallback_to_search
        .unwrap_or(state.config.fallback_default);

    let ctx = CallContext::new(token, request_id);
    let backend = state.backend.as_ref();
    let message_id = MessageResolver::new(backend, state.config.policy)
        .resolve(&ctx, &criteria, fallback)
        .await?;
    ForwardOrchestrator::new(backend, &state.config.archive_folder)
        .forward(&ctx, &message_id)
        .await
}

/// Extract the bearer credential from the `Authorization` header
///
/// The scheme is matched case-insensitively.
fn bearer_token(headers: &HeaderMap, pattern: &Regex) -> AppResult<SecretString> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized("missing Authorization header".to_owned()))?
        .to_str()
        .map_err(|_| AppError::Unauthorized("Authorization header is not ASCII".to_owned()))?;

    let token = pattern
        .captures(header)
        .and_then(|c| c.get(1))
        .ok_or_else(|| AppError::Unauthorized("expected a Bearer credential".to_owned()))?;
    Ok(SecretString::from(token.as_str().to_owned()))
}

/// Wrap a handler result in the response envelope and log the outcome
fn finalize(started: Instant, request_id: &str, result: AppResult<ForwardOutcome>) -> Response {
    let meta = Meta::now(duration_ms(started), request_id);
    match result {
        Ok(outcome) => {
            info!(duration_ms = meta.duration_ms, "forward completed");
            let envelope = ResponseEnvelope {
                success: true,
                message: Some(format!(
                    "forwarded message, {} attachment(s) copied, {} skipped",
                    outcome.attachments_copied, outcome.attachments_skipped
                )),
                error: None,
                code: None,
                message_id: Some(outcome.message_id.as_str().to_owned()),
                data: Some(outcome),
                meta,
            };
            (StatusCode::OK, Json(envelope)).into_response()
        }
        Err(e) => {
            let status = e.status();
            if status.is_server_error() {
                warn!(code = %e.code(), error = %e, "forward failed");
            } else {
                info!(code = %e.code(), error = %e, "forward rejected");
            }
            let envelope: ResponseEnvelope<ForwardOutcome> = ResponseEnvelope {
                success: false,
                message: None,
                error: Some(e.to_string()),
                code: Some(e.code()),
                message_id: e.message_id().map(str::to_owned),
                data: None,
                meta,
            };
            (status, Json(envelope)).into_response()
        }
    }
}

/// Calculate elapsed milliseconds since start
fn duration_ms(started: Instant) -> u64 {
    let millis = started.elapsed().as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}
