//! OpenAI-compatible chat completions endpoint.
//!
//! Every request goes through the orchestrator: a cache hit answers at once,
//! anything else joins the next batch. Sync callers hold the connection
//! until the batch resolves or `server.request_timeout_secs` elapses.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use batchgate_core::{fingerprint, BatchResult, ChatCompletionRequest, ErrorKind};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::state::AppState;

/// Body returned when an async-mode request has been queued.
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub status: &'static str,
    pub fingerprint: Option<String>,
}

/// OpenAI-style error envelope.
#[derive(Debug, Serialize)]
pub struct ChatErrorResponse {
    pub error: ChatErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ChatErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: Option<String>,
}

fn chat_error(status: StatusCode, error_type: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ChatErrorResponse {
            error: ChatErrorDetail {
                message: message.into(),
                error_type: error_type.to_string(),
                code: None,
            },
        }),
    )
        .into_response()
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Fingerprint
        | ErrorKind::Submission
        | ErrorKind::BatchFailed
        | ErrorKind::Abandoned => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Route a chat completion through the batch orchestrator
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    // Reported back to async callers so they can find the cached result later.
    let request_fingerprint = fingerprint(&request).ok();

    let receiver = state.orchestrator().add_request(request);

    let result = match tokio::time::timeout(state.request_timeout(), receiver.recv()).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                fingerprint = request_fingerprint.as_ref().map(|fp| fp.short()),
                timeout_secs = state.config().server.request_timeout_secs,
                "Timed out waiting for batch result"
            );
            return chat_error(
                StatusCode::GATEWAY_TIMEOUT,
                "timeout",
                "Timed out waiting for the batch result",
            );
        }
    };

    match result {
        BatchResult::Completed(response) => (StatusCode::OK, Json(response)).into_response(),
        BatchResult::Accepted => (
            StatusCode::ACCEPTED,
            Json(AcceptedResponse {
                status: "accepted",
                fingerprint: request_fingerprint.map(|fp| fp.as_str().to_string()),
            }),
        )
            .into_response(),
        BatchResult::Failed(err) => {
            debug!(kind = %err.kind, message = %err.message, "Chat request failed");
            chat_error(status_for(err.kind), err.kind.as_str(), err.message)
        }
    }
}
