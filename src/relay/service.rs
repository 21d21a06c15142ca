use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

use super::downstream::{Downstream, DownstreamReply};
use super::error::RelayError;
use super::staging::{StagedUpload, StagingArea};

/// Stage → forward → release pipeline shared by all gateway requests
#[derive(Clone)]
pub struct RelayService {
    staging: StagingArea,
    downstream: Arc<dyn Downstream>,
    field_name: String,
    timeout: Duration,
}

impl RelayService {
    pub fn new(
        staging: StagingArea,
        downstream: Arc<dyn Downstream>,
        field_name: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            staging,
            downstream,
            field_name: field_name.into(),
            timeout,
        }
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Forward a staged upload and translate the outcome.
    ///
    /// The staged artifact is released exactly once, after the downstream
    /// round trip has finished, failed or timed out.
    pub async fn relay(&self, staged: StagedUpload) -> Result<DownstreamReply, RelayError> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.timeout,
            self.downstream.forward(&staged, &self.field_name),
        )
        .await;

        let staged_name = staged.staged_name().to_string();
        staged.release().await;

        match outcome {
            Err(_) => {
                error!(
                    staged = %staged_name,
                    "Downstream did not respond within {:?}",
                    self.timeout
                );
                Err(RelayError::DownstreamTimeout)
            }
            Ok(Err(e)) => {
                error!(staged = %staged_name, "Error forwarding upload: {}", e);
                Err(RelayError::DownstreamUnreachable(e.to_string()))
            }
            Ok(Ok(reply)) if !reply.is_success() => {
                error!(
                    staged = %staged_name,
                    status = reply.status,
                    "Downstream rejected upload: {}",
                    String::from_utf8_lossy(&reply.body)
                );
                Err(RelayError::DownstreamRejected {
                    status: reply.status,
                })
            }
            Ok(Ok(reply)) => {
                info!(
                    staged = %staged_name,
                    status = reply.status,
                    "Relay complete in {:.2}s",
                    started.elapsed().as_secs_f64()
                );
                Ok(reply)
            }
        }
    }
}
