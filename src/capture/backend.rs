use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::encoder::Encoder;

/// Which input tracks a capture request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub video: bool,
    pub audio: bool,
}

impl CaptureConstraints {
    pub fn audio_video() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }

    pub fn audio_only() -> Self {
        Self {
            video: false,
            audio: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.video && !self.audio
    }
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self::audio_video()
    }
}

/// Capture failures. All of them end the current session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("permission to access the capture device was denied")]
    PermissionDenied,

    #[error("no matching capture device was found")]
    DeviceNotFound,

    #[error("capture is not supported on this platform")]
    Unsupported,

    #[error("no compatible media encoder is available")]
    EncoderUnavailable,

    #[error("encoder failed: {0}")]
    Encoder(String),
}

impl CaptureError {
    /// Text rendered to the user when a session ends with this error
    pub fn user_message(&self) -> String {
        match self {
            CaptureError::PermissionDenied => {
                "Permission to use camera and microphone was denied. Please check your settings."
                    .to_string()
            }
            CaptureError::DeviceNotFound => {
                "No camera or microphone found. Please ensure they are connected and enabled."
                    .to_string()
            }
            CaptureError::Unsupported => {
                "Your platform does not support media recording.".to_string()
            }
            CaptureError::EncoderUnavailable => {
                "No supported recording format is available on this platform.".to_string()
            }
            CaptureError::Encoder(reason) => format!("Recording failed: {}", reason),
        }
    }
}

/// Stops the hardware tracks behind a device handle
pub trait TrackControl: Send + Sync {
    fn stop_tracks(&self, device_id: Uuid);
}

/// Exclusive ownership of an acquired capture device.
///
/// Releasing consumes the handle, so a handle can never be released twice.
/// A handle that is dropped without an explicit release (teardown, a
/// cancelled future) stops its tracks on drop.
pub struct DeviceHandle {
    id: Uuid,
    constraints: CaptureConstraints,
    control: Option<Arc<dyn TrackControl>>,
}

impl DeviceHandle {
    pub fn new(constraints: CaptureConstraints, control: Arc<dyn TrackControl>) -> Self {
        Self {
            id: Uuid::new_v4(),
            constraints,
            control: Some(control),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn constraints(&self) -> CaptureConstraints {
        self.constraints
    }

    /// Stop all underlying tracks
    pub fn release(mut self) {
        self.stop_tracks();
    }

    fn stop_tracks(&mut self) {
        if let Some(control) = self.control.take() {
            info!(device_id = %self.id, "Releasing capture device");
            control.stop_tracks(self.id);
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if self.control.is_some() {
            warn!(device_id = %self.id, "Capture device dropped without release, stopping tracks");
            self.stop_tracks();
        }
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("id", &self.id)
            .field("constraints", &self.constraints)
            .field("released", &self.control.is_none())
            .finish()
    }
}

/// Platform capture capability.
///
/// Implementations:
/// - `FileCaptureBackend`: replays a media file as encoder fragments
/// - test doubles scripting grants, denials and fragment sequences
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Acquire a device matching the constraints
    async fn request_capture(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<DeviceHandle, CaptureError>;

    /// Whether the encoder can produce the given MIME type
    fn is_format_supported(&self, mime_type: &str) -> bool;

    /// Format used when none of the preferred formats is supported
    fn default_format(&self) -> Option<String>;

    /// Start an encoder producing `mime_type` from the device's tracks
    async fn open_encoder(
        &self,
        device: &DeviceHandle,
        mime_type: &str,
    ) -> Result<Encoder, CaptureError>;

    /// Backend name for logging
    fn name(&self) -> &str;
}
