use async_trait::async_trait;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{error, info};
use uuid::Uuid;

use super::backend::{CaptureBackend, CaptureConstraints, CaptureError, DeviceHandle, TrackControl};
use super::encoder::{extension_for_mime, Encoder};

/// MIME type for a media file, from its extension
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "webm" => Some("video/webm"),
        "mp4" => Some("video/mp4"),
        "m4a" => Some("audio/mp4"),
        "ogg" | "opus" => Some("audio/ogg"),
        "wav" => Some("audio/wav"),
        "mp3" => Some("audio/mpeg"),
        _ => None,
    }
}

/// Tracks currently held by devices from one backend
#[derive(Debug, Default)]
struct FileTracks {
    active: Mutex<HashSet<Uuid>>,
}

impl TrackControl for FileTracks {
    fn stop_tracks(&self, device_id: Uuid) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.remove(&device_id) {
            info!(device_id = %device_id, "File capture tracks stopped");
        }
    }
}

/// Capture backend that replays a media file as encoder fragments.
///
/// The "device" is the file; the encoder reads it in fixed-size fragments,
/// one per interval, then idles until stopped, like a live recorder that
/// has nothing new to emit.
pub struct FileCaptureBackend {
    path: PathBuf,
    mime_type: Option<&'static str>,
    fragment_size: usize,
    fragment_interval: Duration,
    tracks: Arc<FileTracks>,
}

impl FileCaptureBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mime_type = mime_for_path(&path);
        Self {
            path,
            mime_type,
            fragment_size: 64 * 1024,
            fragment_interval: Duration::from_millis(100),
            tracks: Arc::new(FileTracks::default()),
        }
    }

    pub fn with_fragment_size(mut self, fragment_size: usize) -> Self {
        self.fragment_size = fragment_size.max(1);
        self
    }

    pub fn with_fragment_interval(mut self, interval: Duration) -> Self {
        self.fragment_interval = interval;
        self
    }

    /// Number of devices acquired and not yet released
    pub fn active_devices(&self) -> usize {
        self.tracks
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn base_mime(mime_type: &str) -> &str {
        mime_type.split(';').next().unwrap_or_default().trim()
    }
}

#[async_trait]
impl CaptureBackend for FileCaptureBackend {
    async fn request_capture(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<DeviceHandle, CaptureError> {
        if constraints.is_empty() {
            return Err(CaptureError::Unsupported);
        }

        // Video constraints need a video container
        let mime_type = self.mime_type.ok_or(CaptureError::DeviceNotFound)?;
        if constraints.video && !mime_type.starts_with("video/") {
            return Err(CaptureError::DeviceNotFound);
        }

        match tokio::fs::File::open(&self.path).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(CaptureError::PermissionDenied)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(CaptureError::DeviceNotFound),
            Err(e) => {
                error!("Failed to open capture source {}: {}", self.path.display(), e);
                return Err(CaptureError::DeviceNotFound);
            }
        }

        let control: Arc<dyn TrackControl> = self.tracks.clone();
        let device = DeviceHandle::new(constraints, control);
        self.tracks
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(device.id());

        info!(
            device_id = %device.id(),
            "Acquired file capture device: {}",
            self.path.display()
        );

        Ok(device)
    }

    fn is_format_supported(&self, mime_type: &str) -> bool {
        // A file replays as-is, so only its own container matches, without codec parameters
        match self.mime_type {
            Some(own) => Self::base_mime(mime_type) == own && !mime_type.contains(';'),
            None => false,
        }
    }

    fn default_format(&self) -> Option<String> {
        self.mime_type.map(str::to_string)
    }

    async fn open_encoder(
        &self,
        device: &DeviceHandle,
        mime_type: &str,
    ) -> Result<Encoder, CaptureError> {
        let own = self.mime_type.ok_or(CaptureError::EncoderUnavailable)?;
        if Self::base_mime(mime_type) != own {
            return Err(CaptureError::EncoderUnavailable);
        }

        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| CaptureError::Encoder(e.to_string()))?;

        let (encoder, mut sink) = Encoder::channel(mime_type);
        let fragment_size = self.fragment_size;
        let interval = self.fragment_interval;
        let device_id = device.id();

        info!(
            device_id = %device_id,
            "File encoder started ({}, .{} fragments of {} bytes)",
            mime_type,
            extension_for_mime(mime_type),
            fragment_size
        );

        tokio::spawn(async move {
            let mut exhausted = false;
            loop {
                if exhausted {
                    sink.stopped().await;
                    break;
                }

                let mut fragment = vec![0u8; fragment_size];
                match file.read(&mut fragment).await {
                    Ok(0) => exhausted = true,
                    Ok(n) => {
                        fragment.truncate(n);
                        if !sink.emit(fragment) {
                            break;
                        }
                    }
                    Err(e) => {
                        sink.fail(e.to_string());
                        return;
                    }
                }

                if !exhausted {
                    tokio::select! {
                        _ = sink.stopped() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
            }
            info!(device_id = %device_id, "File encoder stopped");
        });

        Ok(encoder)
    }

    fn name(&self) -> &str {
        "file"
    }
}
