//! Batch status log API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use batchgate_core::{
    provider::RequestCounts, store::BatchStatusRecord, BatchStatus, ProviderBatch, ProviderError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::state::AppState;

/// Maximum allowed limit for batch listings
const MAX_LIMIT: i64 = 1000;

/// Default limit for batch listings
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing batches
#[derive(Debug, Deserialize)]
pub struct ListBatchesParams {
    /// Maximum number of batches to return
    pub limit: Option<i64>,
}

/// A batch as last observed.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub id: String,
    pub status: BatchStatus,
    pub input_file_id: String,
    pub output_file_id: Option<String>,
    pub error_file_id: Option<String>,
    pub request_counts: RequestCounts,
    /// When the status was written to the log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logged_at: Option<String>,
}

impl From<BatchStatusRecord> for BatchResponse {
    fn from(record: BatchStatusRecord) -> Self {
        Self {
            id: record.batch_id,
            status: record.status,
            input_file_id: record.input_file_id,
            output_file_id: record.output_file_id,
            error_file_id: record.error_file_id,
            request_counts: record.request_counts,
            logged_at: Some(record.logged_at.to_rfc3339()),
        }
    }
}

impl From<ProviderBatch> for BatchResponse {
    fn from(batch: ProviderBatch) -> Self {
        Self {
            id: batch.id,
            status: batch.status,
            input_file_id: batch.input_file_id,
            output_file_id: batch.output_file_id,
            error_file_id: batch.error_file_id,
            request_counts: batch.request_counts,
            logged_at: None,
        }
    }
}

/// Response for listing batches
#[derive(Debug, Serialize)]
pub struct ListBatchesResponse {
    pub object: &'static str,
    pub data: Vec<BatchResponse>,
    pub limit: i64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct BatchErrorResponse {
    pub error: String,
}

fn batch_error(status: StatusCode, error: String) -> (StatusCode, Json<BatchErrorResponse>) {
    (status, Json(BatchErrorResponse { error }))
}

// ============================================================================
// Handlers
// ============================================================================

/// List the latest logged status of every batch, most recent first
pub async fn list_batches(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListBatchesParams>,
) -> Result<Json<ListBatchesResponse>, impl IntoResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    match state.store().list_latest_statuses(limit) {
        Ok(records) => Ok(Json(ListBatchesResponse {
            object: "list",
            data: records.into_iter().map(BatchResponse::from).collect(),
            limit,
        })),
        Err(e) => Err(batch_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// Get the latest logged status of a batch
pub async fn get_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchResponse>, impl IntoResponse> {
    match state.store().get_latest_status(&batch_id) {
        Ok(Some(record)) => Ok(Json(BatchResponse::from(record))),
        Ok(None) => Err(batch_error(
            StatusCode::NOT_FOUND,
            format!("Batch not found: {}", batch_id),
        )),
        Err(e) => Err(batch_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// Ask the provider to cancel a batch and log the status it reports back
pub async fn cancel_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchResponse>, impl IntoResponse> {
    let current = match state.store().get_latest_status(&batch_id) {
        Ok(Some(record)) => record,
        Ok(None) => {
            return Err(batch_error(
                StatusCode::NOT_FOUND,
                format!("Batch not found: {}", batch_id),
            ));
        }
        Err(e) => {
            return Err(batch_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    if current.status.is_terminal() {
        return Err(batch_error(
            StatusCode::BAD_REQUEST,
            format!(
                "Cannot cancel batch {} in state: {}",
                batch_id, current.status
            ),
        ));
    }

    let batch = match state.provider().cancel_batch(&batch_id).await {
        Ok(batch) => batch,
        Err(ProviderError::BatchNotFound(_)) => {
            return Err(batch_error(
                StatusCode::NOT_FOUND,
                format!("Batch not found at provider: {}", batch_id),
            ));
        }
        Err(e) => {
            warn!(batch_id = %batch_id, error = %e, "Provider rejected batch cancellation");
            return Err(batch_error(StatusCode::BAD_GATEWAY, e.to_string()));
        }
    };

    info!(batch_id = %batch.id, status = %batch.status, "Batch cancellation requested");

    if let Err(e) = state.store().log_batch_status(&batch) {
        warn!(batch_id = %batch.id, error = %e, "Failed to log batch status after cancel");
    }

    Ok(Json(BatchResponse::from(batch)))
}
