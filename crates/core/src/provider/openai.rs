//! OpenAI-compatible batch provider implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ProviderConfig;

use super::{encode_input_lines, BatchInputLine, BatchProvider, ProviderBatch, ProviderError};

/// Batch provider speaking the OpenAI Files + Batches HTTP API.
pub struct OpenAiProvider {
    client: Client,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct CreateBatchBody<'a> {
    input_file_id: &'a str,
    endpoint: &'a str,
    completion_window: &'a str,
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl OpenAiProvider {
    /// Create a new provider client.
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.api_base.trim_end_matches('/')
    }

    fn map_send_error(e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_connect() {
            ProviderError::ConnectionFailed(e.to_string())
        } else {
            ProviderError::Http(e.to_string())
        }
    }

    /// Turn a non-success response into an `Api` error, keeping the
    /// provider's message when the body carries one.
    async fn check_status(response: Response, not_found_id: Option<&str>) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status.as_u16() == 404 {
            if let Some(id) = not_found_id {
                return Err(ProviderError::BatchNotFound(id.to_string()));
            }
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&text)
            .map(|e| e.error.message)
            .unwrap_or(text);
        Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn upload_batch_file(&self, payload: Vec<u8>) -> Result<String, ProviderError> {
        let file_name = format!("batch_{}.jsonl", uuid::Uuid::new_v4());
        let part = multipart::Part::bytes(payload)
            .file_name(file_name)
            .mime_str("application/jsonl")
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        let form = multipart::Form::new().text("purpose", "batch").part("file", part);

        let response = self
            .client
            .post(format!("{}/v1/files", self.base_url()))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let file: FileObject = Self::check_status(response, None)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidPayload(e.to_string()))?;

        debug!("Uploaded batch input file {}", file.id);
        Ok(file.id)
    }

    async fn parse_batch(response: Response, batch_id: Option<&str>) -> Result<ProviderBatch, ProviderError> {
        Self::check_status(response, batch_id)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidPayload(e.to_string()))
    }
}

#[async_trait]
impl BatchProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn submit_batch(&self, lines: &[BatchInputLine]) -> Result<ProviderBatch, ProviderError> {
        let payload = encode_input_lines(lines)?;
        let input_file_id = self.upload_batch_file(payload).await?;

        let body = CreateBatchBody {
            input_file_id: &input_file_id,
            endpoint: &self.config.endpoint,
            completion_window: &self.config.completion_window,
        };

        let response = self
            .client
            .post(format!("{}/v1/batches", self.base_url()))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        Self::parse_batch(response, None).await
    }

    async fn retrieve_batch(&self, batch_id: &str) -> Result<ProviderBatch, ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/batches/{}", self.base_url(), batch_id))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        Self::parse_batch(response, Some(batch_id)).await
    }

    async fn fetch_content(&self, file_id: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/files/{}/content", self.base_url(), file_id))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let bytes = Self::check_status(response, None)
            .await?
            .bytes()
            .await
            .map_err(Self::map_send_error)?;
        Ok(bytes.to_vec())
    }

    async fn cancel_batch(&self, batch_id: &str) -> Result<ProviderBatch, ProviderError> {
        let response = self
            .client
            .post(format!("{}/v1/batches/{}/cancel", self.base_url(), batch_id))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        Self::parse_batch(response, Some(batch_id)).await
    }
}
