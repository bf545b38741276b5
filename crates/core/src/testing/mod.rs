//! Testing utilities and mock implementations.
//!
//! This module provides a mock batch provider and fixtures, allowing the
//! real processor and orchestrator to be exercised without network access.
//!
//! # Example
//!
//! ```rust,ignore
//! use batchgate_core::testing::{fixtures, MockProvider};
//!
//! let provider = MockProvider::new();
//! provider.set_status_script(vec![BatchStatus::InProgress, BatchStatus::Completed]).await;
//!
//! let request = fixtures::chat_request("hello");
//! ```

mod mock_provider;

pub use mock_provider::MockProvider;

/// Test fixtures and helper functions.
pub mod fixtures {
    use serde_json::{json, Value};

    use crate::chat::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
    use crate::fingerprint::fingerprint;
    use crate::provider::{BatchInputLine, BatchItemResponse, BatchOutputLine};

    /// Model used by fixture requests.
    pub const MODEL: &str = "gpt-4o-mini";

    /// Create a single-message chat request.
    pub fn chat_request(content: &str) -> ChatCompletionRequest {
        ChatCompletionRequest::new(MODEL, vec![ChatMessage::user(content)])
    }

    /// Create a chat response whose first choice carries `content`.
    pub fn chat_response(content: &str) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: format!("chatcmpl-{}", content.len()),
            object: "chat.completion".to_string(),
            created: 1_700_000_000,
            model: MODEL.to_string(),
            choices: vec![json!({
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            })],
            usage: Some(json!({"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2})),
            ..Default::default()
        }
    }

    /// Content of the first choice of a response.
    pub fn response_text(response: &ChatCompletionResponse) -> Option<&str> {
        response
            .choices
            .first()?
            .get("message")?
            .get("content")?
            .as_str()
    }

    /// The text the mock provider answers a request with.
    pub fn echo(request: &ChatCompletionRequest) -> String {
        let last = request
            .messages
            .last()
            .and_then(|m| m.content.as_str())
            .unwrap_or_default();
        format!("echo: {}", last)
    }

    /// Batch input line for a request, correlated by its fingerprint.
    pub fn input_line(request: ChatCompletionRequest) -> BatchInputLine {
        let custom_id = fingerprint(&request)
            .map(|fp| fp.as_str().to_string())
            .unwrap_or_default();
        BatchInputLine::new(custom_id, "/v1/chat/completions", request)
    }

    /// Successful batch output line.
    pub fn output_line(custom_id: &str, content: &str) -> BatchOutputLine {
        BatchOutputLine {
            id: format!("batch_req_{}", &custom_id[..custom_id.len().min(8)]),
            custom_id: custom_id.to_string(),
            response: Some(BatchItemResponse {
                status_code: 200,
                request_id: format!("req_{}", &custom_id[..custom_id.len().min(8)]),
                body: chat_response(content),
                error: None,
            }),
            error: None,
        }
    }

    /// Batch output line whose item failed with an API error.
    pub fn error_output_line(custom_id: &str, status_code: u16, message: &str) -> BatchOutputLine {
        BatchOutputLine {
            id: format!("batch_req_{}", &custom_id[..custom_id.len().min(8)]),
            custom_id: custom_id.to_string(),
            response: Some(BatchItemResponse {
                status_code,
                request_id: String::new(),
                body: ChatCompletionResponse::default(),
                error: Some(json!({"message": message, "type": "invalid_request_error"})),
            }),
            error: None,
        }
    }

    /// Raw JSON for a request body, as an HTTP client would send it.
    pub fn chat_request_json(content: &str) -> Value {
        json!({
            "model": MODEL,
            "messages": [{"role": "user", "content": content}]
        })
    }
}
