//! Durable result cache keyed by request fingerprint.
//!
//! Writes are idempotent (last write wins) and never fail the caller: a
//! store error is logged and the entry is simply missing until the next
//! successful write.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::chat::{ChatCompletionRequest, ChatCompletionResponse};
use crate::fingerprint::Fingerprint;
use crate::metrics;
use crate::store::BatchStore;

/// Fingerprint -> response lookup and write-through.
pub trait ResultCache: Send + Sync {
    /// Look up a cached response. Read errors are treated as a miss.
    fn lookup(&self, fingerprint: &Fingerprint) -> Option<ChatCompletionResponse>;

    /// Write a resolved pair.
    fn store(
        &self,
        fingerprint: &Fingerprint,
        request: &ChatCompletionRequest,
        response: &ChatCompletionResponse,
    );
}

/// [`ResultCache`] over the durable [`BatchStore`].
pub struct StoreBackedCache {
    store: Arc<dyn BatchStore>,
}

impl StoreBackedCache {
    pub fn new(store: Arc<dyn BatchStore>) -> Self {
        Self { store }
    }
}

impl ResultCache for StoreBackedCache {
    fn lookup(&self, fingerprint: &Fingerprint) -> Option<ChatCompletionResponse> {
        match self.store.get_cached_response(fingerprint) {
            Ok(entry) => entry.map(|cached| cached.response),
            Err(e) => {
                warn!("Cache lookup for {} failed: {}", fingerprint.short(), e);
                None
            }
        }
    }

    fn store(
        &self,
        fingerprint: &Fingerprint,
        request: &ChatCompletionRequest,
        response: &ChatCompletionResponse,
    ) {
        match self.store.put_cached_response(fingerprint, request, response) {
            Ok(()) => {
                metrics::CACHE_WRITES.with_label_values(&["success"]).inc();
                debug!("Cached response for {}", fingerprint.short());
            }
            Err(e) => {
                metrics::CACHE_WRITES.with_label_values(&["error"]).inc();
                warn!("Failed to cache response for {}: {}", fingerprint.short(), e);
            }
        }
    }
}
