//! Capture sessions: device acquisition, format negotiation and the
//! fragment-producing encoder.

pub mod backend;
pub mod encoder;
pub mod file;

pub use backend::{CaptureBackend, CaptureConstraints, CaptureError, DeviceHandle, TrackControl};
pub use encoder::{
    extension_for_mime, negotiate_format, preferred_formats, Encoder, EncoderEvent, EncoderSink,
    FragmentBuffer, MediaBlob, AUDIO_FORMAT_PREFERENCES, VIDEO_FORMAT_PREFERENCES,
};
pub use file::FileCaptureBackend;

use std::sync::Arc;

/// Front door to a capture backend
#[derive(Clone)]
pub struct CaptureSession {
    backend: Arc<dyn CaptureBackend>,
}

impl CaptureSession {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self { backend }
    }

    pub async fn request_capture(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<DeviceHandle, CaptureError> {
        self.backend.request_capture(constraints).await
    }

    /// Negotiate a format from `preferences` and start encoding the device
    pub async fn begin_encoding(
        &self,
        device: &DeviceHandle,
        preferences: &[&str],
    ) -> Result<Encoder, CaptureError> {
        let mime_type = negotiate_format(preferences, self.backend.as_ref())?;
        self.backend.open_encoder(device, &mime_type).await
    }

    pub fn release(&self, device: DeviceHandle) {
        device.release();
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }
}
