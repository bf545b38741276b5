//! Mock batch provider for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::provider::{
    encode_input_lines, BatchInputLine, BatchOutputLine, BatchProvider, BatchStatus,
    ProviderBatch, ProviderError, RequestCounts,
};

use super::fixtures;

/// Internal state for a mock batch.
#[derive(Debug, Clone)]
struct ScriptedBatch {
    batch: ProviderBatch,
    lines: Vec<BatchInputLine>,
    /// Statuses reported by successive retrieve calls.
    script: VecDeque<BatchStatus>,
    /// Explicit output; generated from the input lines when absent.
    output: Option<Vec<BatchOutputLine>>,
}

/// Mock implementation of the BatchProvider trait.
///
/// Provides controllable behavior for testing:
/// - Track submitted batches for assertions
/// - Script the status sequence each retrieve call reports
/// - Serve input and output files, generated or explicit
/// - Simulate failures
///
/// By default a submitted batch reports `in_progress` once and then
/// `completed`, with one successful output line per input line whose
/// content is `echo: <last message>`.
///
/// # Example
///
/// ```rust,ignore
/// let provider = MockProvider::new();
/// provider
///     .set_status_script(vec![BatchStatus::InProgress, BatchStatus::Failed])
///     .await;
///
/// // Drive the real processor against it
/// let processor = ProviderBatchProcessor::new(Arc::new(provider.clone()), store, config, "/v1/chat/completions");
///
/// assert_eq!(provider.submission_count().await, 1);
/// ```
#[derive(Debug, Clone)]
pub struct MockProvider {
    batches: Arc<RwLock<HashMap<String, ScriptedBatch>>>,
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    /// Recorded submit_batch calls.
    submissions: Arc<RwLock<Vec<Vec<BatchInputLine>>>>,
    /// Retrieve calls per batch ID.
    retrieve_calls: Arc<RwLock<HashMap<String, usize>>>,
    /// Status script given to newly submitted batches.
    default_script: Arc<RwLock<Vec<BatchStatus>>>,
    /// If set, the next operation will fail with this error.
    next_error: Arc<RwLock<Option<ProviderError>>>,
    /// Counter for generating unique IDs.
    id_counter: Arc<RwLock<u32>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create a new mock provider.
    pub fn new() -> Self {
        Self {
            batches: Arc::new(RwLock::new(HashMap::new())),
            files: Arc::new(RwLock::new(HashMap::new())),
            submissions: Arc::new(RwLock::new(Vec::new())),
            retrieve_calls: Arc::new(RwLock::new(HashMap::new())),
            default_script: Arc::new(RwLock::new(vec![
                BatchStatus::InProgress,
                BatchStatus::Completed,
            ])),
            next_error: Arc::new(RwLock::new(None)),
            id_counter: Arc::new(RwLock::new(0)),
        }
    }

    /// Set the status sequence reported for batches submitted from now on.
    pub async fn set_status_script(&self, statuses: Vec<BatchStatus>) {
        *self.default_script.write().await = statuses;
    }

    /// Make the next operation fail with the given error.
    pub async fn set_next_error(&self, error: ProviderError) {
        *self.next_error.write().await = Some(error);
    }

    /// Register a batch that already exists on the provider side.
    ///
    /// `status` is the current status; `script` is what later retrieve calls report.
    pub async fn insert_batch(
        &self,
        batch_id: &str,
        lines: Vec<BatchInputLine>,
        status: BatchStatus,
        script: Vec<BatchStatus>,
    ) {
        let input_file_id = format!("file-in-{}", batch_id);
        let payload = encode_input_lines(&lines).unwrap_or_default();
        self.files.write().await.insert(input_file_id.clone(), payload);

        let mut batch = ProviderBatch::new(batch_id, status);
        batch.input_file_id = input_file_id;
        batch.request_counts.total = lines.len() as u32;

        let mut scripted = ScriptedBatch {
            batch,
            lines,
            script: script.into(),
            output: None,
        };
        if status == BatchStatus::Completed {
            self.attach_output(&mut scripted).await;
        }

        self.batches
            .write()
            .await
            .insert(batch_id.to_string(), scripted);
    }

    /// Use explicit output lines for a batch instead of generated ones.
    ///
    /// Must be called before the batch reports `completed`.
    pub async fn set_output(&self, batch_id: &str, output: Vec<BatchOutputLine>) {
        if let Some(scripted) = self.batches.write().await.get_mut(batch_id) {
            scripted.output = Some(output);
        }
    }

    /// Get all recorded submit_batch calls.
    pub async fn submissions(&self) -> Vec<Vec<BatchInputLine>> {
        self.submissions.read().await.clone()
    }

    /// Number of submit_batch calls.
    pub async fn submission_count(&self) -> usize {
        self.submissions.read().await.len()
    }

    /// Number of retrieve_batch calls for a batch.
    pub async fn retrieve_count(&self, batch_id: &str) -> usize {
        self.retrieve_calls
            .read()
            .await
            .get(batch_id)
            .copied()
            .unwrap_or(0)
    }

    /// IDs of all batches known to the mock.
    pub async fn batch_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.batches.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn check_error(&self) -> Result<(), ProviderError> {
        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }
        Ok(())
    }

    async fn next_id(&self) -> u32 {
        let mut counter = self.id_counter.write().await;
        *counter += 1;
        *counter
    }

    /// Store the output file of a completed batch and point the batch at it.
    async fn attach_output(&self, scripted: &mut ScriptedBatch) {
        if scripted.batch.output_file_id.is_some() {
            return;
        }

        let output = scripted.output.clone().unwrap_or_else(|| {
            scripted
                .lines
                .iter()
                .map(|line| fixtures::output_line(&line.custom_id, &fixtures::echo(&line.body)))
                .collect()
        });

        let mut payload = Vec::new();
        for line in &output {
            if serde_json::to_writer(&mut payload, line).is_ok() {
                payload.push(b'\n');
            }
        }

        let file_id = format!("file-out-{}", scripted.batch.id);
        self.files.write().await.insert(file_id.clone(), payload);

        let total = scripted.lines.len() as u32;
        scripted.batch.output_file_id = Some(file_id);
        scripted.batch.request_counts = RequestCounts {
            total,
            completed: total,
            failed: 0,
        };
    }
}

#[async_trait]
impl BatchProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit_batch(&self, lines: &[BatchInputLine]) -> Result<ProviderBatch, ProviderError> {
        self.check_error().await?;

        let id = format!("batch_mock_{}", self.next_id().await);
        self.submissions.write().await.push(lines.to_vec());

        let script = self.default_script.read().await.clone();
        self.insert_batch(&id, lines.to_vec(), BatchStatus::Validating, script)
            .await;

        self.retrieve_untracked(&id).await
    }

    async fn retrieve_batch(&self, batch_id: &str) -> Result<ProviderBatch, ProviderError> {
        self.check_error().await?;

        *self
            .retrieve_calls
            .write()
            .await
            .entry(batch_id.to_string())
            .or_insert(0) += 1;

        let mut batches = self.batches.write().await;
        let scripted = batches
            .get_mut(batch_id)
            .ok_or_else(|| ProviderError::BatchNotFound(batch_id.to_string()))?;

        if let Some(status) = scripted.script.pop_front() {
            scripted.batch.status = status;
        }
        if scripted.batch.status == BatchStatus::Completed {
            self.attach_output(scripted).await;
        }

        Ok(scripted.batch.clone())
    }

    async fn fetch_content(&self, file_id: &str) -> Result<Vec<u8>, ProviderError> {
        self.check_error().await?;

        self.files
            .read()
            .await
            .get(file_id)
            .cloned()
            .ok_or_else(|| ProviderError::Api {
                status: 404,
                message: format!("No such File object: {}", file_id),
            })
    }

    async fn cancel_batch(&self, batch_id: &str) -> Result<ProviderBatch, ProviderError> {
        self.check_error().await?;

        let mut batches = self.batches.write().await;
        let scripted = batches
            .get_mut(batch_id)
            .ok_or_else(|| ProviderError::BatchNotFound(batch_id.to_string()))?;

        scripted.script.clear();
        scripted.batch.status = BatchStatus::Cancelled;
        Ok(scripted.batch.clone())
    }
}

impl MockProvider {
    /// Current state of a batch without advancing its script.
    async fn retrieve_untracked(&self, batch_id: &str) -> Result<ProviderBatch, ProviderError> {
        self.batches
            .read()
            .await
            .get(batch_id)
            .map(|scripted| scripted.batch.clone())
            .ok_or_else(|| ProviderError::BatchNotFound(batch_id.to_string()))
    }
}
