//! Durable storage for the response cache and the batch status log.
//!
//! The status log is append-only: every observed provider status is a new
//! row, and the latest row per batch is its current known state. Recovery
//! relies on it to find batches that were still running when the process
//! went away.

mod sqlite;
mod types;

pub use sqlite::SqliteStore;
pub use types::{BatchStatusRecord, CachedResponse, StoreError};

use crate::chat::{ChatCompletionRequest, ChatCompletionResponse};
use crate::fingerprint::Fingerprint;
use crate::provider::ProviderBatch;

/// Trait for durable gateway storage.
pub trait BatchStore: Send + Sync {
    /// Write (or overwrite) the cached response for a fingerprint.
    fn put_cached_response(
        &self,
        fingerprint: &Fingerprint,
        request: &ChatCompletionRequest,
        response: &ChatCompletionResponse,
    ) -> Result<(), StoreError>;

    /// Get the cached entry for a fingerprint, if any.
    fn get_cached_response(&self, fingerprint: &Fingerprint)
        -> Result<Option<CachedResponse>, StoreError>;

    /// Number of cached responses.
    fn count_cached_responses(&self) -> Result<i64, StoreError>;

    /// Append an observed batch status to the log.
    fn log_batch_status(&self, batch: &ProviderBatch) -> Result<(), StoreError>;

    /// Most recent logged status of a batch.
    fn get_latest_status(&self, batch_id: &str) -> Result<Option<BatchStatusRecord>, StoreError>;

    /// Most recent status of every known batch, most recently updated first.
    fn list_latest_statuses(&self, limit: i64) -> Result<Vec<BatchStatusRecord>, StoreError>;

    /// IDs of batches whose most recent logged status is not terminal.
    fn list_non_terminal_batch_ids(&self) -> Result<Vec<String>, StoreError>;
}
