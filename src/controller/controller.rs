use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info, warn};

use super::state::{ControllerState, Outcome};
use crate::capture::{
    preferred_formats, CaptureBackend, CaptureConstraints, CaptureError, CaptureSession,
    DeviceHandle, MediaBlob,
};
use crate::relay::RelayResult;
use crate::upload::{UploadStatus, Uploader};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
}

fn invalid(action: &'static str, state: &ControllerState) -> ControllerError {
    ControllerError::InvalidTransition {
        action,
        state: state.name(),
    }
}

/// Resources held while in `Recording`
struct ActiveRecording {
    device: DeviceHandle,
    stop_tx: oneshot::Sender<()>,
    blob_rx: oneshot::Receiver<Result<MediaBlob, CaptureError>>,
    collector: JoinHandle<()>,
}

/// State shared with the fragment collector task
struct Shared {
    state: watch::Sender<ControllerState>,
    /// Whoever takes the recording out of this slot owns its device release
    active: Mutex<Option<ActiveRecording>>,
    /// Finalize + upload task of the last `stop`
    finalizing: std::sync::Mutex<Option<AbortHandle>>,
}

impl Shared {
    fn current(&self) -> ControllerState {
        self.state.borrow().clone()
    }

    fn transition(&self, next: ControllerState) {
        let previous = self.state.send_replace(next.clone());
        info!("Recording state: {} -> {}", previous.name(), next.name());
    }

    fn finish(&self, outcome: Outcome) -> ControllerState {
        let done = ControllerState::Done(outcome);
        self.transition(done.clone());
        done
    }

    fn track_finalizing(&self, handle: AbortHandle) {
        *self.finalizing.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    fn abort_finalizing(&self) {
        if let Some(handle) = self
            .finalizing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

const UNEXPECTED_END: &str = "Recording ended unexpectedly.";

/// Capture + upload state machine
///
/// `Idle → AwaitingDevice → Recording → Stopping → Uploading → Done(..)`,
/// with every failure landing in `Done(Error)`. The capture device is
/// released exactly once: on encoder failure, on finalize (before the upload
/// starts), or on teardown.
pub struct RecordingController {
    capture: CaptureSession,
    uploader: Arc<dyn Uploader>,
    constraints: CaptureConstraints,
    shared: Arc<Shared>,
}

impl RecordingController {
    pub fn new(backend: Arc<dyn CaptureBackend>, uploader: Arc<dyn Uploader>) -> Self {
        let (state, _) = watch::channel(ControllerState::Idle);
        Self {
            capture: CaptureSession::new(backend),
            uploader,
            constraints: CaptureConstraints::default(),
            shared: Arc::new(Shared {
                state,
                active: Mutex::new(None),
                finalizing: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn with_constraints(mut self, constraints: CaptureConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn state(&self) -> ControllerState {
        self.shared.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.shared.state.subscribe()
    }

    pub fn upload_status(&self) -> watch::Receiver<UploadStatus> {
        self.uploader.subscribe()
    }

    /// Acquire a device and start encoding. Accepted from `Idle` or `Done`.
    pub async fn start(&self) -> Result<ControllerState, ControllerError> {
        let mut active = self.shared.active.lock().await;
        let current = self.shared.current();
        if !current.accepts_start() {
            return Err(invalid("start", &current));
        }

        self.uploader.reset();
        self.shared.transition(ControllerState::AwaitingDevice);

        let device = match self.capture.request_capture(self.constraints).await {
            Ok(device) => device,
            Err(e) => {
                warn!("Capture request failed: {}", e);
                return Ok(self.shared.finish(Outcome::Error(e.user_message())));
            }
        };

        let encoder = match self
            .capture
            .begin_encoding(&device, preferred_formats(self.constraints))
            .await
        {
            Ok(encoder) => encoder,
            Err(e) => {
                warn!("Encoder failed to start: {}", e);
                self.capture.release(device);
                return Ok(self.shared.finish(Outcome::Error(e.user_message())));
            }
        };

        info!(
            device_id = %device.id(),
            "Recording with {} ({})",
            self.capture.backend_name(),
            encoder.mime_type()
        );

        let (stop_tx, stop_rx) = oneshot::channel();
        let (blob_tx, blob_rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);

        let collector = tokio::spawn(async move {
            let result = encoder.record(stop_rx).await;

            if let Err(e) = &result {
                let mut active = shared.active.lock().await;
                if let Some(recording) = active.take() {
                    // Nobody is stopping yet, so the session ends here
                    error!("Encoder failed while recording: {}", e);
                    recording.device.release();
                    shared.finish(Outcome::Error(e.user_message()));
                    return;
                }
            }

            let _ = blob_tx.send(result);
        });

        *active = Some(ActiveRecording {
            device,
            stop_tx,
            blob_rx,
            collector,
        });
        self.shared.transition(ControllerState::Recording);

        Ok(ControllerState::Recording)
    }

    /// Finalize the recording, release the device, then upload.
    /// Resolves once the upload has settled.
    ///
    /// The finalize and upload run in their own task, so dropping this
    /// future does not stop the session from reaching `Done`.
    pub async fn stop(&self) -> Result<ControllerState, ControllerError> {
        let recording = {
            let mut active = self.shared.active.lock().await;
            let current = self.shared.current();
            match (&current, active.take()) {
                (ControllerState::Recording, Some(recording)) => recording,
                (_, other) => {
                    *active = other;
                    return Err(invalid("stop", &current));
                }
            }
        };

        self.shared.transition(ControllerState::Stopping);

        let task = tokio::spawn(finalize(
            Arc::clone(&self.shared),
            self.capture.clone(),
            Arc::clone(&self.uploader),
            recording,
        ));
        self.shared.track_finalizing(task.abort_handle());

        match task.await {
            Ok(state) => Ok(state),
            Err(e) if e.is_panic() => {
                error!("Finalize task panicked: {}", e);
                Ok(self.shared.finish(Outcome::Error(UNEXPECTED_END.to_string())))
            }
            // Aborted by shutdown, which already published the state
            Err(_) => Ok(self.shared.current()),
        }
    }

    /// Clear the last outcome. Accepted from `Idle` or `Done`.
    pub async fn reset(&self) -> Result<ControllerState, ControllerError> {
        let _active = self.shared.active.lock().await;
        let current = self.shared.current();
        if !current.accepts_start() {
            return Err(invalid("reset", &current));
        }

        self.uploader.reset();
        self.shared.transition(ControllerState::Idle);
        Ok(ControllerState::Idle)
    }

    /// Discard an in-progress recording or finalize and release its device
    pub async fn shutdown(&self) {
        let recording = self.shared.active.lock().await.take();
        if let Some(recording) = recording {
            recording.collector.abort();
            let _ = recording.stop_tx.send(());
            self.capture.release(recording.device);
            self.shared.transition(ControllerState::Idle);
            info!("Recording discarded on shutdown");
            return;
        }

        // An aborted finalize task drops its device handle, which releases it
        self.shared.abort_finalizing();
        if matches!(
            self.shared.current(),
            ControllerState::Stopping | ControllerState::Uploading
        ) {
            self.shared.transition(ControllerState::Idle);
            info!("Pending upload discarded on shutdown");
        }
    }
}

/// Stop the encoder, release the device, upload, publish `Done`
async fn finalize(
    shared: Arc<Shared>,
    capture: CaptureSession,
    uploader: Arc<dyn Uploader>,
    recording: ActiveRecording,
) -> ControllerState {
    let ActiveRecording {
        device,
        stop_tx,
        blob_rx,
        ..
    } = recording;

    let _ = stop_tx.send(());
    let finalized = blob_rx.await;

    // Capture ends before the upload begins
    capture.release(device);

    let blob = match finalized {
        Ok(Ok(blob)) => blob,
        Ok(Err(e)) => {
            warn!("Recording could not be finalized: {}", e);
            return shared.finish(Outcome::Error(e.user_message()));
        }
        Err(_) => {
            error!("Fragment collector ended without a result");
            return shared.finish(Outcome::Error(UNEXPECTED_END.to_string()));
        }
    };

    info!(
        "Recording finalized: {} bytes ({})",
        blob.len(),
        blob.mime_type
    );

    shared.transition(ControllerState::Uploading);

    let outcome = match uploader.upload(blob).await {
        RelayResult::Success(payload) => Outcome::Success(payload),
        RelayResult::Failure(failure) => Outcome::Error(failure.message),
    };

    shared.finish(outcome)
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        self.shared.abort_finalizing();
        // A collector holding the lock is already releasing the device itself
        if let Ok(mut active) = self.shared.active.try_lock() {
            if let Some(recording) = active.take() {
                recording.collector.abort();
                recording.device.release();
            }
        }
    }
}
