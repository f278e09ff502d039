//! The inbound HTTP surface.
//!
//! Three routes: a health probe, the shielded chat-completions endpoint,
//! and Prometheus metrics. Block decisions map to structured `{detail}`
//! errors with the shield metadata attached for telemetry.

use super::api::ChatRequest;
use super::identity::CallerIdentity;
use super::metrics::RequestGuard;
use super::pipeline::{BlockKind, Decision, ShieldMetadata};
use super::response;
use super::upstream::UpstreamError;
use super::ShieldState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub fn router(state: Arc<ShieldState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "ward",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics(State(state): State<Arc<ShieldState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}

async fn chat_completions(
    State(state): State<Arc<ShieldState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let _guard = RequestGuard::new(&state.metrics);

    let Json(request) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            state.record_block(BlockKind::BadRequest);
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text(), None);
        }
    };

    let identity = CallerIdentity::from_request(&headers, peer);
    let decision = state
        .pipeline
        .decide(&request, &identity, Instant::now())
        .await;

    match decision {
        Decision::Block {
            kind,
            detail,
            metadata,
        } => {
            state.record_block(kind);
            info!(kind = ?kind, detail = %detail, "request blocked");
            // Bad requests carry no shield state worth reporting.
            let metadata = (kind != BlockKind::BadRequest).then_some(&metadata);
            error_response(status_for(kind), detail, metadata)
        }
        Decision::Allow {
            request: rewritten,
            metadata,
        } => complete_upstream(&state, &identity, rewritten, metadata).await,
    }
}

async fn complete_upstream(
    state: &ShieldState,
    identity: &CallerIdentity,
    request: ChatRequest,
    metadata: ShieldMetadata,
) -> Response {
    match state.upstream.complete(&request).await {
        Ok(completion) => {
            let usage = &completion.parsed.usage;
            state.penalties.record_token_cost(
                &identity.fingerprint(),
                usage.total_tokens,
                Instant::now(),
            );
            state
                .metrics
                .requests_total
                .with_label_values(&["allowed"])
                .inc();
            state.metrics.tokens_saved_total.inc_by(metadata.tokens_saved);
            state
                .metrics
                .upstream_tokens_total
                .inc_by(usage.total_tokens);
            info!(
                id = %completion.parsed.id,
                input_tokens = usage.prompt_tokens,
                output_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                tokens_saved = metadata.tokens_saved,
                finish_reason = completion
                    .parsed
                    .choices
                    .first()
                    .and_then(|c| c.finish_reason.as_deref())
                    .unwrap_or(""),
                "completion proxied"
            );
            debug!(
                caller_tokens = state.penalties.token_cost(&identity.fingerprint()),
                "caller token accounting updated"
            );
            (
                StatusCode::OK,
                Json(response::assemble(completion.raw, &metadata)),
            )
                .into_response()
        }
        Err(UpstreamError::RateLimited(detail)) => {
            warn!(detail = %detail, "upstream rate limited");
            state
                .metrics
                .requests_total
                .with_label_values(&["upstream_error"])
                .inc();
            error_response(StatusCode::TOO_MANY_REQUESTS, detail, None)
        }
        Err(e) => {
            warn!(error = %e, "upstream failure");
            state
                .metrics
                .requests_total
                .with_label_values(&["upstream_error"])
                .inc();
            error_response(StatusCode::BAD_GATEWAY, e.to_string(), None)
        }
    }
}

fn status_for(kind: BlockKind) -> StatusCode {
    match kind {
        BlockKind::BadRequest | BlockKind::EntropyWeird => StatusCode::BAD_REQUEST,
        BlockKind::SecurityHijack | BlockKind::SecurityOverride | BlockKind::JudgeRejected => {
            StatusCode::FORBIDDEN
        }
    }
}

pub(super) fn kind_label(kind: BlockKind) -> &'static str {
    match kind {
        BlockKind::BadRequest => "bad_request",
        BlockKind::EntropyWeird => "entropy_weird",
        BlockKind::SecurityHijack => "security_hijack",
        BlockKind::SecurityOverride => "security_override",
        BlockKind::JudgeRejected => "judge_rejected",
    }
}

fn error_response(
    status: StatusCode,
    detail: String,
    metadata: Option<&ShieldMetadata>,
) -> Response {
    let mut body = json!({ "detail": detail });
    if let (Some(metadata), Some(object)) = (metadata, body.as_object_mut()) {
        object.insert(
            response::METADATA_KEY.to_string(),
            serde_json::to_value(metadata).unwrap_or(serde_json::Value::Null),
        );
    }
    (status, Json(body)).into_response()
}
