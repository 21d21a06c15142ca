// Shared fixtures for integration tests: scripted capture backend,
// recording uploader, and a loopback processing service.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use summora_relay::capture::{
    CaptureBackend, CaptureConstraints, CaptureError, DeviceHandle, Encoder, MediaBlob,
    TrackControl,
};
use summora_relay::relay::{HttpDownstream, RelayService, StagingArea};
use summora_relay::upload::{UploadStatus, Uploader};
use summora_relay::{create_router, AppState, RelayResult};
use tokio::sync::watch;
use uuid::Uuid;

// ============================================================================
// Capture
// ============================================================================

/// Counts track releases per backend
#[derive(Debug, Default)]
pub struct ReleaseCounter {
    released: AtomicUsize,
}

impl ReleaseCounter {
    pub fn count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl TrackControl for ReleaseCounter {
    fn stop_tracks(&self, _device_id: Uuid) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Capture backend driven by a script
pub struct ScriptedBackend {
    /// Outcome of `request_capture`
    pub grant: Result<(), CaptureError>,
    pub supported: Vec<String>,
    pub default_format: Option<String>,
    /// Emitted as soon as the encoder opens
    pub fragments: Vec<Vec<u8>>,
    /// Emitted after the stop request, before the encoder closes
    pub trailing: Vec<Vec<u8>>,
    /// Fail the encoder after `fragments`
    pub fail_with: Option<String>,
    pub releases: Arc<ReleaseCounter>,
    pub requests: AtomicUsize,
    pub negotiated: Mutex<Option<String>>,
}

impl ScriptedBackend {
    pub fn granting(fragments: Vec<Vec<u8>>) -> Self {
        Self {
            grant: Ok(()),
            supported: vec!["video/webm".to_string()],
            default_format: None,
            fragments,
            trailing: Vec::new(),
            fail_with: None,
            releases: Arc::new(ReleaseCounter::default()),
            requests: AtomicUsize::new(0),
            negotiated: Mutex::new(None),
        }
    }

    pub fn denying(error: CaptureError) -> Self {
        Self {
            grant: Err(error),
            ..Self::granting(Vec::new())
        }
    }

    pub fn release_count(&self) -> usize {
        self.releases.count()
    }
}

#[async_trait]
impl CaptureBackend for ScriptedBackend {
    async fn request_capture(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<DeviceHandle, CaptureError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.grant.clone()?;
        let control: Arc<dyn TrackControl> = self.releases.clone();
        Ok(DeviceHandle::new(constraints, control))
    }

    fn is_format_supported(&self, mime_type: &str) -> bool {
        self.supported.iter().any(|m| m == mime_type)
    }

    fn default_format(&self) -> Option<String> {
        self.default_format.clone()
    }

    async fn open_encoder(
        &self,
        _device: &DeviceHandle,
        mime_type: &str,
    ) -> Result<Encoder, CaptureError> {
        *self.negotiated.lock().unwrap() = Some(mime_type.to_string());

        let (encoder, mut sink) = Encoder::channel(mime_type);
        for fragment in &self.fragments {
            sink.emit(fragment.clone());
        }

        if let Some(reason) = &self.fail_with {
            sink.fail(reason.clone());
            return Ok(encoder);
        }

        let trailing = self.trailing.clone();
        tokio::spawn(async move {
            sink.stopped().await;
            for fragment in trailing {
                sink.emit(fragment);
            }
        });

        Ok(encoder)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Upload
// ============================================================================

/// Uploader returning a fixed result and recording what it was given
pub struct FakeUploader {
    result: RelayResult,
    status: watch::Sender<UploadStatus>,
    pub blobs: Mutex<Vec<MediaBlob>>,
    /// Device releases observed when each upload began
    pub releases_at_upload: Mutex<Vec<usize>>,
    releases: Arc<ReleaseCounter>,
    pub resets: AtomicUsize,
    /// Time each upload takes before resolving
    delay: Duration,
}

impl FakeUploader {
    pub fn new(result: RelayResult, releases: Arc<ReleaseCounter>) -> Self {
        let (status, _) = watch::channel(UploadStatus::Idle);
        Self {
            result,
            status,
            blobs: Mutex::new(Vec::new()),
            releases_at_upload: Mutex::new(Vec::new()),
            releases,
            resets: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn upload_count(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(&self, blob: MediaBlob) -> RelayResult {
        self.releases_at_upload
            .lock()
            .unwrap()
            .push(self.releases.count());
        self.blobs.lock().unwrap().push(blob);
        self.status.send_replace(UploadStatus::Uploading);
        tokio::time::sleep(self.delay).await;
        self.status.send_replace(match &self.result {
            RelayResult::Success(_) => UploadStatus::Success,
            RelayResult::Failure(f) => UploadStatus::Error {
                detail: f.message.clone(),
            },
        });
        self.result.clone()
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.status.send_replace(UploadStatus::Idle);
    }

    fn subscribe(&self) -> watch::Receiver<UploadStatus> {
        self.status.subscribe()
    }
}

// ============================================================================
// Loopback processing service
// ============================================================================

/// One multipart upload as seen by the processing service
#[derive(Debug, Clone)]
pub struct ReceivedUpload {
    pub field: String,
    pub filename: Option<String>,
    pub data: Vec<u8>,
    /// Files in the gateway staging dir while this request was in flight
    pub staged_files_during_forward: Option<usize>,
}

pub struct MockService {
    pub status: StatusCode,
    pub error_body: serde_json::Value,
    pub delay: Duration,
    pub staging_dir: Option<PathBuf>,
    pub calls: AtomicUsize,
    pub received: Mutex<Vec<ReceivedUpload>>,
}

impl MockService {
    pub fn ok() -> Self {
        Self {
            status: StatusCode::OK,
            error_body: serde_json::Value::Null,
            delay: Duration::ZERO,
            staging_dir: None,
            calls: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(status: StatusCode, body: serde_json::Value) -> Self {
        Self {
            status,
            error_body: body,
            ..Self::ok()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn checksum(data: &[u8]) -> u64 {
    data.iter().map(|&b| b as u64).sum()
}

async fn process_recording(
    State(service): State<Arc<MockService>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    service.calls.fetch_add(1, Ordering::SeqCst);
    let staged_files = service.staging_dir.as_ref().map(|dir| count_files(dir));

    let mut received = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(str::to_string);
        let data = field.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
        received = Some(ReceivedUpload {
            field: name,
            filename,
            data,
            staged_files_during_forward: staged_files,
        });
    }

    tokio::time::sleep(service.delay).await;

    let Some(upload) = received else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "No file part"})),
        );
    };

    service.received.lock().unwrap().push(upload.clone());

    if !service.status.is_success() {
        return (service.status, Json(service.error_body.clone()));
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "message": "Transcription and summary complete",
            "filename": upload.filename,
            "size": upload.data.len(),
            "checksum": checksum(&upload.data),
        })),
    )
}

pub fn count_files(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(Result::ok).count())
        .unwrap_or(0)
}

/// Serve `router` on an ephemeral loopback port
pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

pub async fn spawn_mock_service(service: Arc<MockService>) -> SocketAddr {
    let router = Router::new()
        .route("/process-video", post(process_recording))
        .with_state(service);
    serve(router).await
}

/// Gateway in front of `downstream_url`, served on loopback
pub async fn spawn_gateway(
    staging: StagingArea,
    downstream_url: String,
    timeout: Duration,
) -> SocketAddr {
    let downstream = HttpDownstream::new(downstream_url).unwrap();
    let relay = RelayService::new(staging, Arc::new(downstream), "recording", timeout);
    serve(create_router(AppState::new(relay).with_allowed_origin("http://localhost:3000"))).await
}

/// Multipart form carrying `data` as the `recording` field
pub fn recording_form(field: &str, filename: &str, data: Vec<u8>) -> reqwest::multipart::Form {
    let part = reqwest::multipart::Part::bytes(data)
        .file_name(filename.to_string())
        .mime_str("video/webm")
        .unwrap();
    reqwest::multipart::Form::new().part(field.to_string(), part)
}
