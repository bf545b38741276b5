//! Batch processor: submits a window to the provider and polls it to a
//! terminal status.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fingerprint::{fingerprint, Fingerprint};
use crate::metrics;
use crate::provider::{
    parse_input_lines, parse_output_lines, BatchInputLine, BatchOutputLine, BatchProvider,
    BatchStatus, ProviderBatch, ProviderError,
};
use crate::store::BatchStore;

use super::config::BatchingConfig;
use super::types::{BatchItem, BatchOutcome, ProcessError};

/// Doubling poll delay, capped at a maximum.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial.min(max),
            max,
        }
    }

    /// The delay to wait now; the following one doubles, up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}

/// Submits deduplicated items as provider batches and collects their results.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    /// Submit the items as one batch, then poll it to completion.
    async fn process_batch(
        &self,
        items: &[BatchItem],
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, ProcessError>;

    /// Poll an already-submitted batch until it is terminal and parse its output.
    async fn poll_and_collect(
        &self,
        batch_id: &str,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, ProcessError>;

    /// Fetch a batch's current status and the items of its input file.
    async fn load_batch_input(
        &self,
        batch_id: &str,
    ) -> Result<(ProviderBatch, Vec<BatchItem>), ProcessError>;
}

/// [`BatchProcessor`] backed by a [`BatchProvider`], logging every observed
/// status to the store.
pub struct ProviderBatchProcessor {
    provider: Arc<dyn BatchProvider>,
    status_log: Arc<dyn BatchStore>,
    config: BatchingConfig,
    endpoint: String,
}

impl ProviderBatchProcessor {
    pub fn new(
        provider: Arc<dyn BatchProvider>,
        status_log: Arc<dyn BatchStore>,
        config: BatchingConfig,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            status_log,
            config,
            endpoint: endpoint.into(),
        }
    }

    /// Persist an observed status. Failures are warnings only.
    fn log_status(&self, batch: &ProviderBatch) {
        if let Err(e) = self.status_log.log_batch_status(batch) {
            warn!(
                "Failed to log status {} for batch {}: {}",
                batch.status, batch.id, e
            );
        }
    }

    async fn collect_output(&self, batch: &ProviderBatch) -> Result<BatchOutcome, ProcessError> {
        let file_id = batch
            .output_file_id
            .as_deref()
            .ok_or_else(|| ProcessError::MissingOutput {
                batch_id: batch.id.clone(),
            })?;

        let content = observe("fetch_content", self.provider.fetch_content(file_id))
            .await
            .map_err(|source| ProcessError::Fetch {
                batch_id: batch.id.clone(),
                file_id: file_id.to_string(),
                source,
            })?;

        let lines = parse_output_lines(&content).map_err(|source| ProcessError::Parse {
            batch_id: batch.id.clone(),
            source,
        })?;

        let mut outcome = BatchOutcome::with_capacity(lines.len());
        for line in lines {
            let custom_id = line.custom_id.clone();
            let response = check_output_line(&batch.id, line)?;

            match Fingerprint::parse(&custom_id) {
                Ok(fp) => {
                    outcome.insert(fp, response);
                }
                Err(e) => {
                    warn!(
                        "Ignoring output line of batch {} with foreign custom_id {}: {}",
                        batch.id, custom_id, e
                    );
                }
            }
        }

        debug!("Parsed {} responses from batch {}", outcome.len(), batch.id);
        Ok(outcome)
    }
}

#[async_trait]
impl BatchProcessor for ProviderBatchProcessor {
    async fn process_batch(
        &self,
        items: &[BatchItem],
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, ProcessError> {
        let lines: Vec<BatchInputLine> = items
            .iter()
            .map(|item| {
                BatchInputLine::new(
                    item.fingerprint.as_str(),
                    self.endpoint.clone(),
                    item.request.clone(),
                )
            })
            .collect();

        let batch = observe("submit_batch", self.provider.submit_batch(&lines))
            .await
            .map_err(ProcessError::Submit)?;

        metrics::BATCHES_SUBMITTED.inc();
        info!(
            "Submitted batch {} with {} requests (status: {})",
            batch.id,
            lines.len(),
            batch.status
        );
        self.log_status(&batch);

        self.poll_and_collect(&batch.id, cancel).await
    }

    async fn poll_and_collect(
        &self,
        batch_id: &str,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, ProcessError> {
        let started = Instant::now();
        let mut backoff = Backoff::new(
            self.config.poll_initial_interval(),
            self.config.poll_max_interval(),
        );

        loop {
            if cancel.is_cancelled() {
                return Err(ProcessError::Cancelled {
                    batch_id: batch_id.to_string(),
                });
            }

            let batch = observe("retrieve_batch", self.provider.retrieve_batch(batch_id))
                .await
                .map_err(|source| ProcessError::Retrieve {
                    batch_id: batch_id.to_string(),
                    source,
                })?;

            metrics::POLL_OBSERVATIONS
                .with_label_values(&[batch.status.as_str()])
                .inc();
            self.log_status(&batch);

            if batch.status == BatchStatus::Completed {
                let result = self.collect_output(&batch).await;
                let label = if result.is_ok() { "completed" } else { "failed" };
                metrics::BATCH_OUTCOMES.with_label_values(&[label]).inc();
                metrics::BATCH_DURATION
                    .with_label_values(&[label])
                    .observe(started.elapsed().as_secs_f64());
                info!(
                    "Batch {} completed ({}/{} requests succeeded)",
                    batch.id, batch.request_counts.completed, batch.request_counts.total
                );
                return result;
            }

            if batch.status.is_failure() {
                metrics::BATCH_OUTCOMES.with_label_values(&["failed"]).inc();
                metrics::BATCH_DURATION
                    .with_label_values(&["failed"])
                    .observe(started.elapsed().as_secs_f64());
                warn!("Batch {} ended as {}", batch.id, batch.status);
                return Err(ProcessError::Terminal {
                    batch_id: batch.id,
                    status: batch.status,
                });
            }

            let delay = backoff.next_delay();
            debug!(
                "Batch {} is {}; polling again in {:?}",
                batch_id, batch.status, delay
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Polling of batch {} cancelled", batch_id);
                    return Err(ProcessError::Cancelled {
                        batch_id: batch_id.to_string(),
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn load_batch_input(
        &self,
        batch_id: &str,
    ) -> Result<(ProviderBatch, Vec<BatchItem>), ProcessError> {
        let batch = observe("retrieve_batch", self.provider.retrieve_batch(batch_id))
            .await
            .map_err(|source| ProcessError::Retrieve {
                batch_id: batch_id.to_string(),
                source,
            })?;
        self.log_status(&batch);

        if batch.status.is_failure() {
            return Ok((batch, Vec::new()));
        }

        let content = observe("fetch_content", self.provider.fetch_content(&batch.input_file_id))
            .await
            .map_err(|source| ProcessError::Fetch {
                batch_id: batch.id.clone(),
                file_id: batch.input_file_id.clone(),
                source,
            })?;

        let lines = parse_input_lines(&content).map_err(|source| ProcessError::Parse {
            batch_id: batch.id.clone(),
            source,
        })?;

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            match fingerprint(&line.body) {
                Ok(fp) if fp.as_str() == line.custom_id => {
                    items.push(BatchItem::new(fp, line.body));
                }
                Ok(fp) => match Fingerprint::parse(&line.custom_id) {
                    // Output lines carry the custom_id, so key by it
                    Ok(custom) => {
                        warn!(
                            "Input line {} of batch {} fingerprints as {}; keeping its custom_id",
                            line.custom_id, batch.id, fp
                        );
                        items.push(BatchItem::new(custom, line.body));
                    }
                    Err(_) => {
                        warn!(
                            "Input line {} of batch {} has a foreign custom_id; its output cannot be matched",
                            line.custom_id, batch.id
                        );
                        items.push(BatchItem::new(fp, line.body));
                    }
                },
                Err(e) => {
                    warn!(
                        "Skipping input line {} of batch {}: {}",
                        line.custom_id, batch.id, e
                    );
                }
            }
        }

        Ok((batch, items))
    }
}

/// Validate one output line. Any item-level error fails the whole batch.
fn check_output_line(
    batch_id: &str,
    line: BatchOutputLine,
) -> Result<crate::chat::ChatCompletionResponse, ProcessError> {
    let item_failed = |status_code: u16, message: String| ProcessError::ItemFailed {
        batch_id: batch_id.to_string(),
        custom_id: line.custom_id.clone(),
        status_code,
        message,
    };

    if let Some(error) = &line.error {
        return Err(item_failed(0, error_message(error)));
    }

    let Some(response) = line.response.clone() else {
        return Err(item_failed(0, "missing response".to_string()));
    };

    if let Some(error) = &response.error {
        return Err(item_failed(response.status_code, error_message(error)));
    }

    if response.status_code != 200 {
        return Err(item_failed(
            response.status_code,
            format!("unexpected status code {}", response.status_code),
        ));
    }

    Ok(response.body)
}

/// Extract `message` from an API error object, falling back to its JSON text.
fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

/// Time a provider call and count it by result.
async fn observe<T, F>(operation: &'static str, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    let start = Instant::now();
    let result = call.await;

    metrics::PROVIDER_DURATION
        .with_label_values(&[operation])
        .observe(start.elapsed().as_secs_f64());
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::PROVIDER_REQUESTS
        .with_label_values(&[operation, status])
        .inc();

    result
}
