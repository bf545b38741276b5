//! Types for batch provider operations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::chat::{ChatCompletionRequest, ChatCompletionResponse};

/// Errors that can occur while talking to the batch provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Request timeout")]
    Timeout,
}

/// Lifecycle status of a provider batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Validating,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    Expired,
    Cancelling,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl BatchStatus {
    /// Returns the string representation used on the wire and in the status log.
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Validating => "validating",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Finalizing => "finalizing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Expired => "expired",
            BatchStatus::Cancelling => "cancelling",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Unknown => "unknown",
        }
    }

    /// Parse a stored status string. Unrecognized values map to `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value {
            "validating" => BatchStatus::Validating,
            "in_progress" => BatchStatus::InProgress,
            "finalizing" => BatchStatus::Finalizing,
            "completed" => BatchStatus::Completed,
            "failed" => BatchStatus::Failed,
            "expired" => BatchStatus::Expired,
            "cancelling" => BatchStatus::Cancelling,
            "cancelled" => BatchStatus::Cancelled,
            _ => BatchStatus::Unknown,
        }
    }

    /// Whether the provider will never move this batch to another status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed
                | BatchStatus::Failed
                | BatchStatus::Expired
                | BatchStatus::Cancelled
        )
    }

    /// Terminal without usable output.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            BatchStatus::Failed | BatchStatus::Expired | BatchStatus::Cancelled
        )
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-batch request counters reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounts {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub failed: u32,
}

/// A batch job as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderBatch {
    pub id: String,
    pub status: BatchStatus,
    #[serde(default)]
    pub input_file_id: String,
    #[serde(default)]
    pub output_file_id: Option<String>,
    #[serde(default)]
    pub error_file_id: Option<String>,
    #[serde(default)]
    pub request_counts: RequestCounts,
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl ProviderBatch {
    pub fn new(id: impl Into<String>, status: BatchStatus) -> Self {
        Self {
            id: id.into(),
            status,
            input_file_id: String::new(),
            output_file_id: None,
            error_file_id: None,
            request_counts: RequestCounts::default(),
            created_at: None,
        }
    }
}

/// One line of a batch input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInputLine {
    /// Correlation ID echoed back by the provider; the request fingerprint.
    pub custom_id: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub url: String,
    pub body: ChatCompletionRequest,
}

fn default_method() -> String {
    "POST".to_string()
}

impl BatchInputLine {
    pub fn new(custom_id: impl Into<String>, url: impl Into<String>, body: ChatCompletionRequest) -> Self {
        Self {
            custom_id: custom_id.into(),
            method: default_method(),
            url: url.into(),
            body,
        }
    }
}

/// Response envelope inside a batch output line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemResponse {
    pub status_code: u16,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub body: ChatCompletionResponse,
    #[serde(default)]
    pub error: Option<Value>,
}

/// One line of a batch output file:
/// `{id, custom_id, response: {status_code, request_id, body, error}, error}`.
///
/// Item errors may appear inside the response envelope or at the top level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutputLine {
    #[serde(default)]
    pub id: String,
    pub custom_id: String,
    #[serde(default)]
    pub response: Option<BatchItemResponse>,
    #[serde(default)]
    pub error: Option<Value>,
}

/// Trait for batch compute providers.
#[async_trait]
pub trait BatchProvider: Send + Sync {
    /// Provider name (for logging).
    fn name(&self) -> &str;

    /// Upload the lines and create a batch job from them.
    async fn submit_batch(&self, lines: &[BatchInputLine]) -> Result<ProviderBatch, ProviderError>;

    /// Retrieve the current state of a batch.
    async fn retrieve_batch(&self, batch_id: &str) -> Result<ProviderBatch, ProviderError>;

    /// Download the raw content of a provider file (input or output).
    async fn fetch_content(&self, file_id: &str) -> Result<Vec<u8>, ProviderError>;

    /// Ask the provider to cancel a batch.
    async fn cancel_batch(&self, batch_id: &str) -> Result<ProviderBatch, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_terminality() {
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Expired.is_terminal());
        assert!(!BatchStatus::InProgress.is_terminal());
        assert!(!BatchStatus::Cancelling.is_terminal());
        assert!(!BatchStatus::Completed.is_failure());
        assert!(BatchStatus::Cancelled.is_failure());
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            BatchStatus::Validating,
            BatchStatus::InProgress,
            BatchStatus::Finalizing,
            BatchStatus::Completed,
            BatchStatus::Failed,
            BatchStatus::Expired,
            BatchStatus::Cancelling,
            BatchStatus::Cancelled,
        ] {
            assert_eq!(BatchStatus::parse(status.as_str()), status);
        }
        assert_eq!(BatchStatus::parse("paused"), BatchStatus::Unknown);
    }

    #[test]
    fn test_unknown_status_deserializes() {
        let batch: ProviderBatch =
            serde_json::from_value(json!({"id": "batch_1", "status": "rehydrating"})).unwrap();
        assert_eq!(batch.status, BatchStatus::Unknown);
        assert_eq!(batch.request_counts, RequestCounts::default());
    }

    #[test]
    fn test_provider_batch_deserialization() {
        let batch: ProviderBatch = serde_json::from_value(json!({
            "id": "batch_abc",
            "object": "batch",
            "endpoint": "/v1/chat/completions",
            "status": "in_progress",
            "input_file_id": "file-in",
            "output_file_id": null,
            "request_counts": {"total": 3, "completed": 1, "failed": 0}
        }))
        .unwrap();

        assert_eq!(batch.id, "batch_abc");
        assert_eq!(batch.status, BatchStatus::InProgress);
        assert_eq!(batch.input_file_id, "file-in");
        assert!(batch.output_file_id.is_none());
        assert_eq!(batch.request_counts.total, 3);
    }
}
