//! Types shared by the batch processor and orchestrator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chat::{ChatCompletionRequest, ChatCompletionResponse};
use crate::config::ServingMode;
use crate::fingerprint::Fingerprint;
use crate::provider::{BatchStatus, ProviderError};

/// Category of a failed result, as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request could not be fingerprinted.
    Fingerprint,
    /// The provider rejected the batch.
    Submission,
    /// The batch or one of its items failed.
    BatchFailed,
    /// Cache-only miss.
    NotFound,
    /// Processing was abandoned before a result was produced.
    Abandoned,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Fingerprint => "fingerprint",
            ErrorKind::Submission => "submission",
            ErrorKind::BatchFailed => "batch_failed",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error half of a [`BatchResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct ResultError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ResultError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// What a caller of `add_request` eventually receives.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchResult {
    /// Async mode acknowledgment; the response will only land in the cache.
    Accepted,
    Completed(ChatCompletionResponse),
    Failed(ResultError),
}

impl BatchResult {
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        BatchResult::Failed(ResultError::new(kind, message))
    }

    pub fn abandoned(message: impl Into<String>) -> Self {
        Self::failed(ErrorKind::Abandoned, message)
    }

    /// The error kind, if this is a failure.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            BatchResult::Failed(err) => Some(err.kind),
            _ => None,
        }
    }
}

/// One deduplicated unit of work inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub fingerprint: Fingerprint,
    pub request: ChatCompletionRequest,
}

impl BatchItem {
    pub fn new(fingerprint: Fingerprint, request: ChatCompletionRequest) -> Self {
        Self {
            fingerprint,
            request,
        }
    }
}

/// Parsed responses of a completed batch, keyed by correlation ID.
pub type BatchOutcome = HashMap<Fingerprint, ChatCompletionResponse>;

/// Errors that can occur while submitting or polling a batch.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("batch submission failed: {0}")]
    Submit(#[source] ProviderError),

    #[error("failed to retrieve batch {batch_id}: {source}")]
    Retrieve {
        batch_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("failed to fetch file {file_id} of batch {batch_id}: {source}")]
    Fetch {
        batch_id: String,
        file_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("batch {batch_id} ended as {status}")]
    Terminal {
        batch_id: String,
        status: BatchStatus,
    },

    #[error("batch {batch_id} completed without an output file")]
    MissingOutput { batch_id: String },

    #[error("failed to parse file of batch {batch_id}: {source}")]
    Parse {
        batch_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("item {custom_id} of batch {batch_id} failed (status {status_code}): {message}")]
    ItemFailed {
        batch_id: String,
        custom_id: String,
        status_code: u16,
        message: String,
    },

    #[error("polling of batch {batch_id} was cancelled")]
    Cancelled { batch_id: String },
}

impl ProcessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessError::Submit(_) => ErrorKind::Submission,
            ProcessError::Cancelled { .. } => ErrorKind::Abandoned,
            _ => ErrorKind::BatchFailed,
        }
    }

    /// Whether this is a verdict on the batch itself, as opposed to a
    /// failure to reach or read it.
    pub fn is_batch_verdict(&self) -> bool {
        matches!(
            self,
            ProcessError::Terminal { .. }
                | ProcessError::ItemFailed { .. }
                | ProcessError::MissingOutput { .. }
        )
    }

    /// Caller-facing form of this error.
    pub fn to_result_error(&self) -> ResultError {
        ResultError::new(self.kind(), self.to_string())
    }
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether the orchestrator is running.
    pub running: bool,
    pub serving_mode: ServingMode,
    /// Fingerprints collected for the next window.
    pub pending_count: usize,
    /// Fingerprints submitted or recovering, not yet resolved.
    pub in_flight_count: usize,
    /// Sync callers blocked on a result.
    pub waiter_count: usize,
}

/// Result of a recovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySummary {
    /// Batches whose latest logged status was non-terminal.
    pub discovered: usize,
    /// Batches polled to completion and fanned out.
    pub recovered: usize,
    /// Batches the provider already reported as failed, expired or cancelled.
    pub terminal: usize,
    /// Batches whose recovery errored; their fingerprints stay in flight.
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        let err = ProcessError::Submit(ProviderError::Timeout);
        assert_eq!(err.kind(), ErrorKind::Submission);

        let err = ProcessError::Terminal {
            batch_id: "batch_1".to_string(),
            status: BatchStatus::Expired,
        };
        assert_eq!(err.kind(), ErrorKind::BatchFailed);
        assert_eq!(err.to_string(), "batch batch_1 ended as expired");

        let err = ProcessError::Cancelled {
            batch_id: "batch_1".to_string(),
        };
        assert_eq!(err.to_result_error().kind, ErrorKind::Abandoned);
    }

    #[test]
    fn test_result_error_display() {
        let err = ResultError::new(ErrorKind::NotFound, "no cached response");
        assert_eq!(err.to_string(), "not_found: no cached response");
    }

    #[test]
    fn test_batch_result_error_kind() {
        assert_eq!(BatchResult::Accepted.error_kind(), None);
        assert_eq!(
            BatchResult::abandoned("shutdown").error_kind(),
            Some(ErrorKind::Abandoned)
        );
    }

    #[test]
    fn test_orchestrator_status_default() {
        let status = OrchestratorStatus::default();
        assert!(!status.running);
        assert_eq!(status.serving_mode, ServingMode::Sync);
        assert_eq!(status.pending_count, 0);
    }
}
