//! Client-side upload of finalized recordings to the gateway.

mod client;
mod status;

pub use client::{UploadClient, UploadError, DEFAULT_FIELD_NAME};
pub use status::UploadStatus;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::capture::MediaBlob;
use crate::relay::RelayResult;

/// Upload seam used by the recording controller
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Single attempt; never fails past this boundary
    async fn upload(&self, blob: MediaBlob) -> RelayResult;

    /// Return the status signal to `Idle` for a new session
    fn reset(&self);

    fn subscribe(&self) -> watch::Receiver<UploadStatus>;
}

#[async_trait]
impl Uploader for UploadClient {
    async fn upload(&self, blob: MediaBlob) -> RelayResult {
        UploadClient::upload(self, blob).await
    }

    fn reset(&self) {
        UploadClient::reset(self)
    }

    fn subscribe(&self) -> watch::Receiver<UploadStatus> {
        UploadClient::subscribe(self)
    }
}
