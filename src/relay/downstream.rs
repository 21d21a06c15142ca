use async_trait::async_trait;
use axum::body::Bytes;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::staging::{StagedPayload, StagedUpload};

/// Raw downstream response
#[derive(Debug, Clone)]
pub struct DownstreamReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl DownstreamReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("downstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to read staged payload: {0}")]
    Payload(#[from] std::io::Error),
}

/// The processing service the gateway relays to
#[async_trait]
pub trait Downstream: Send + Sync {
    /// Send one staged upload as multipart field `field_name`; single attempt
    async fn forward(
        &self,
        upload: &StagedUpload,
        field_name: &str,
    ) -> Result<DownstreamReply, ForwardError>;
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP processing service at a fixed URL
pub struct HttpDownstream {
    client: reqwest::Client,
    url: String,
}

impl HttpDownstream {
    /// Only connection setup is bounded here; `RelayService` owns the
    /// request deadline so an overrun maps to a gateway timeout.
    pub fn new(url: impl Into<String>) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

async fn payload_part(upload: &StagedUpload) -> Result<Part, ForwardError> {
    // Disk payloads stream straight from the staged file
    let body = match upload.open().await? {
        StagedPayload::File(file) => reqwest::Body::from(file),
        StagedPayload::Bytes(bytes) => reqwest::Body::from(bytes),
    };

    Ok(Part::stream_with_length(body, upload.size_bytes())
        .file_name(upload.original_filename().to_string()))
}

#[async_trait]
impl Downstream for HttpDownstream {
    async fn forward(
        &self,
        upload: &StagedUpload,
        field_name: &str,
    ) -> Result<DownstreamReply, ForwardError> {
        let mut part = payload_part(upload).await?;
        if let Some(content_type) = upload.content_type() {
            part = match part.mime_str(content_type) {
                Ok(part) => part,
                Err(e) => {
                    warn!("Ignoring invalid content type {:?}: {}", content_type, e);
                    payload_part(upload).await?
                }
            };
        }

        info!(
            staged = %upload.staged_name(),
            size_bytes = upload.size_bytes(),
            "Forwarding {} to {}",
            upload.original_filename(),
            self.url
        );

        let form = Form::new().part(field_name.to_string(), part);
        let response = self.client.post(&self.url).multipart(form).send().await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;

        info!(
            staged = %upload.staged_name(),
            status,
            "Downstream responded ({} bytes)",
            body.len()
        );

        Ok(DownstreamReply {
            status,
            content_type,
            body,
        })
    }
}
