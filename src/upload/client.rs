use reqwest::multipart::{Form, Part};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::status::UploadStatus;
use crate::capture::MediaBlob;
use crate::relay::{RelayFailure, RelayResult};

/// Multipart field the gateway expects by default
pub const DEFAULT_FIELD_NAME: &str = "recording";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload already attempted for this recording")]
    AlreadyAttempted,

    #[error("upload request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upload failed with status {status}")]
    Rejected { status: u16, body: String },

    #[error("invalid response body: {0}")]
    InvalidResponse(String),
}

impl UploadError {
    /// Failure value for the caller; the response body, if any, is the cause
    pub fn into_failure(self) -> RelayFailure {
        match self {
            UploadError::Rejected { status, body } if !body.is_empty() => {
                RelayFailure::with_cause(format!("Upload failed with status {}", status), body)
            }
            UploadError::Rejected { status, .. } => {
                RelayFailure::new(format!("Upload failed with status {}", status))
            }
            other => RelayFailure::with_cause("Upload failed", other.to_string()),
        }
    }
}

/// Single-attempt multipart uploader with an observable status signal
pub struct UploadClient {
    client: reqwest::Client,
    endpoint: String,
    field_name: String,
    status: watch::Sender<UploadStatus>,
}

impl UploadClient {
    /// `timeout` bounds the whole request; there is no retry
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        let (status, _) = watch::channel(UploadStatus::Idle);
        Self {
            client,
            endpoint: endpoint.into(),
            field_name: DEFAULT_FIELD_NAME.to_string(),
            status,
        }
    }

    pub fn with_field_name(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = field_name.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn status(&self) -> UploadStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadStatus> {
        self.status.subscribe()
    }

    /// Back to `Idle`; called when a new capture session starts
    pub fn reset(&self) {
        self.status.send_replace(UploadStatus::Idle);
    }

    /// Upload `blob` once. Every failure resolves to `RelayResult::Failure`.
    pub async fn upload(&self, blob: MediaBlob) -> RelayResult {
        let mut claimed = false;
        self.status.send_if_modified(|status| {
            if *status == UploadStatus::Idle {
                *status = UploadStatus::Uploading;
                claimed = true;
                true
            } else {
                false
            }
        });

        if !claimed {
            warn!("Upload refused: status is {:?}", self.status());
            return RelayResult::Failure(UploadError::AlreadyAttempted.into_failure());
        }

        match self.send(blob).await {
            Ok(payload) => {
                info!("Upload successful");
                self.status.send_replace(UploadStatus::Success);
                RelayResult::Success(payload)
            }
            Err(e) => {
                error!("Error uploading recording: {}", e);
                let failure = e.into_failure();
                let detail = failure
                    .cause
                    .clone()
                    .unwrap_or_else(|| failure.message.clone());
                self.status.send_replace(UploadStatus::Error { detail });
                RelayResult::Failure(failure)
            }
        }
    }

    async fn send(&self, blob: MediaBlob) -> Result<serde_json::Value, UploadError> {
        let file_name = blob.file_name();
        let size = blob.len();
        // Codec parameters are not part of the multipart content type
        let content_type = blob
            .mime_type
            .split(';')
            .next()
            .map(str::trim)
            .filter(|mime| !mime.is_empty())
            .unwrap_or("application/octet-stream")
            .to_string();

        let part = Part::bytes(blob.data)
            .file_name(file_name.clone())
            .mime_str(&content_type)?;
        let form = Form::new().part(self.field_name.clone(), part);

        info!(
            "Uploading {} ({} bytes, {}) to {}",
            file_name, size, content_type, self.endpoint
        );

        let response = self.client.post(&self.endpoint).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| UploadError::InvalidResponse(e.to_string()))
    }
}
