use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chat::{ChatCompletionRequest, ChatCompletionResponse};
use crate::fingerprint::Fingerprint;
use crate::provider::{BatchStatus, RequestCounts};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A cached (fingerprint, request, response) triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub fingerprint: Fingerprint,
    pub request: ChatCompletionRequest,
    pub response: ChatCompletionResponse,
    pub cached_at: DateTime<Utc>,
}

/// One row of the batch status log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatusRecord {
    pub batch_id: String,
    pub status: BatchStatus,
    pub input_file_id: String,
    pub output_file_id: Option<String>,
    pub error_file_id: Option<String>,
    pub request_counts: RequestCounts,
    pub logged_at: DateTime<Utc>,
}
