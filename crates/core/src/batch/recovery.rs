//! Dangling-batch recovery.
//!
//! A batch whose latest logged status is non-terminal was still running when
//! the previous process went away. Its input file is re-read from the
//! provider, its fingerprints are put back in flight (never in the pending
//! window, so no second submission happens) and it is polled like a live
//! batch.

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::provider::BatchStatus;

use super::orchestrator::{InFlight, Shared};
use super::types::{BatchItem, ProcessError, RecoverySummary};

enum Recovery {
    /// Polled to completion (or already fully cached) and fanned out.
    Recovered,
    /// The provider reported failed, expired or cancelled.
    Terminal,
    /// Could not be recovered in this process lifetime.
    Failed,
}

impl Recovery {
    fn as_str(&self) -> &'static str {
        match self {
            Recovery::Recovered => "recovered",
            Recovery::Terminal => "terminal",
            Recovery::Failed => "failed",
        }
    }
}

impl Shared {
    pub(super) async fn recover_dangling_batches(&self) -> RecoverySummary {
        let batch_ids = match self.status_log.list_non_terminal_batch_ids() {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to list dangling batches: {}", e);
                return RecoverySummary::default();
            }
        };

        let mut summary = RecoverySummary {
            discovered: batch_ids.len(),
            ..Default::default()
        };

        if batch_ids.is_empty() {
            debug!("No dangling batches to recover");
            return summary;
        }

        info!("Recovering {} dangling batches", batch_ids.len());

        let outcomes = join_all(batch_ids.iter().map(|id| self.recover_batch(id))).await;
        for outcome in outcomes {
            metrics::RECOVERED_BATCHES
                .with_label_values(&[outcome.as_str()])
                .inc();
            match outcome {
                Recovery::Recovered => summary.recovered += 1,
                Recovery::Terminal => summary.terminal += 1,
                Recovery::Failed => summary.failed += 1,
            }
        }

        info!(
            "Recovery finished: {} recovered, {} terminal, {} failed",
            summary.recovered, summary.terminal, summary.failed
        );
        summary
    }

    async fn recover_batch(&self, batch_id: &str) -> Recovery {
        let (batch, items) = match self.processor.load_batch_input(batch_id).await {
            Ok(loaded) => loaded,
            Err(e) => {
                error!("Failed to load dangling batch {}: {}", batch_id, e);
                return Recovery::Failed;
            }
        };

        if batch.status.is_failure() {
            info!("Dangling batch {} already ended as {}", batch_id, batch.status);
            return Recovery::Terminal;
        }

        let items: Vec<BatchItem> = items
            .into_iter()
            .filter(|item| self.cache.lookup(&item.fingerprint).is_none())
            .collect();

        if items.is_empty() && batch.status == BatchStatus::Completed {
            info!(
                "Dangling batch {} is completed and fully cached; nothing to deliver",
                batch_id
            );
            return Recovery::Recovered;
        }

        let registered = {
            let mut state = self.lock();
            let mut registered = 0;
            for item in &items {
                if !state.in_flight.contains_key(&item.fingerprint) {
                    state
                        .in_flight
                        .insert(item.fingerprint.clone(), InFlight::default());
                    registered += 1;
                }
            }
            registered
        };

        info!(
            "Resuming batch {} ({}, {} requests, {} newly in flight)",
            batch_id,
            batch.status,
            items.len(),
            registered
        );

        match self.processor.poll_and_collect(batch_id, &self.cancel).await {
            Ok(outcome) => {
                self.resolve(&items, Ok(outcome));
                Recovery::Recovered
            }
            Err(e) if e.is_batch_verdict() => {
                self.resolve(&items, Err(e));
                Recovery::Terminal
            }
            Err(e @ ProcessError::Cancelled { .. }) => {
                self.resolve(&items, Err(e));
                Recovery::Failed
            }
            Err(e) => {
                warn!(
                    "Failed to recover batch {}: {}; its {} requests stay in flight until the next restart",
                    batch_id,
                    e,
                    items.len()
                );
                Recovery::Failed
            }
        }
    }
}
