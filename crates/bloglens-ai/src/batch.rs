//! HTTP client for the OpenAI Files and Batches APIs.
//!
//! Wraps `reqwest` with bearer auth and typed status handling. The
//! pipeline only needs four calls: upload a JSONL request file, create a
//! batch over it, poll batch status, and download the output file.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::error::AiError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// The provider-side completion window for every batch.
pub const BATCH_COMPLETION_WINDOW: &str = "24h";

/// Provider batch states as observed by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
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

impl BatchState {
    /// Still working; leave the tasks alone.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            BatchState::Validating
                | BatchState::InProgress
                | BatchState::Finalizing
                | BatchState::Cancelling
                | BatchState::Unknown
        )
    }

    /// Terminal without output; members must be resubmitted.
    #[must_use]
    pub fn is_dead(self) -> bool {
        matches!(
            self,
            BatchState::Failed | BatchState::Expired | BatchState::Cancelled
        )
    }
}

/// A batch as returned by create/retrieve.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderBatch {
    pub id: String,
    pub status: BatchState,
    pub output_file_id: Option<String>,
    pub error_file_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    id: String,
}

pub struct OpenAiBatchClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiBatchClient {
    /// Creates a new client pointed at the production API.
    ///
    /// # Errors
    ///
    /// Returns [`AiError::Http`] if the underlying `reqwest::Client` cannot
    /// be constructed.
    pub fn new(api_key: &str) -> Result<Self, AiError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Creates a new client with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`AiError::Http`] if the underlying `reqwest::Client` cannot
    /// be constructed.
    pub fn with_base_url(api_key: &str, base_url: &str) -> Result<Self, AiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.to_owned(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// Upload a JSONL request file with `purpose = batch`. Returns the
    /// provider file id.
    ///
    /// # Errors
    ///
    /// Returns [`AiError::Api`] on non-2xx, [`AiError::Http`] on transport
    /// failure, [`AiError::Deserialize`] on an unexpected body.
    pub async fn upload_batch_file(&self, jsonl: String) -> Result<String, AiError> {
        let part = reqwest::multipart::Part::text(jsonl)
            .file_name("batch_requests.jsonl")
            .mime_str("application/jsonl")?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", "batch")
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/v1/files", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let file: UploadedFile = Self::parse_json(response, "files.upload").await?;
        Ok(file.id)
    }

    /// Create a batch over an uploaded request file with the standard 24 h
    /// window.
    ///
    /// # Errors
    ///
    /// Returns [`AiError::Api`] on non-2xx, [`AiError::Http`] on transport
    /// failure, [`AiError::Deserialize`] on an unexpected body.
    pub async fn create_batch(&self, input_file_id: &str) -> Result<ProviderBatch, AiError> {
        let response = self
            .client
            .post(format!("{}/v1/batches", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "input_file_id": input_file_id,
                "endpoint": "/v1/chat/completions",
                "completion_window": BATCH_COMPLETION_WINDOW,
            }))
            .send()
            .await?;

        Self::parse_json(response, "batches.create").await
    }

    /// Retrieve current batch status.
    ///
    /// # Errors
    ///
    /// Returns [`AiError::Api`] on non-2xx, [`AiError::Http`] on transport
    /// failure, [`AiError::Deserialize`] on an unexpected body.
    pub async fn get_batch(&self, batch_id: &str) -> Result<ProviderBatch, AiError> {
        let response = self
            .client
            .get(format!("{}/v1/batches/{batch_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        Self::parse_json(response, "batches.retrieve").await
    }

    /// Download a file's raw content (the JSONL batch output).
    ///
    /// # Errors
    ///
    /// Returns [`AiError::Api`] on non-2xx or [`AiError::Http`] on
    /// transport failure.
    pub async fn download_file_content(&self, file_id: &str) -> Result<String, AiError> {
        let response = self
            .client
            .get(format!("{}/v1/files/{file_id}/content", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.text().await?)
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        context: &str,
    ) -> Result<T, AiError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(AiError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        serde_json::from_str(&body).map_err(|e| AiError::Deserialize {
            context: context.to_string(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_classification() {
        assert!(BatchState::Validating.is_pending());
        assert!(BatchState::InProgress.is_pending());
        assert!(BatchState::Finalizing.is_pending());
        assert!(!BatchState::Completed.is_pending());
        assert!(BatchState::Failed.is_dead());
        assert!(BatchState::Expired.is_dead());
        assert!(BatchState::Cancelled.is_dead());
        assert!(!BatchState::Completed.is_dead());
    }

    #[test]
    fn unknown_states_stay_pending() {
        let batch: ProviderBatch = serde_json::from_value(serde_json::json!({
            "id": "batch_1",
            "status": "some_future_state",
            "output_file_id": null,
            "error_file_id": null
        }))
        .expect("should parse");

        assert_eq!(batch.status, BatchState::Unknown);
        assert!(batch.status.is_pending());
    }
}
