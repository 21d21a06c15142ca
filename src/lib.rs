pub mod capture;
pub mod config;
pub mod controller;
pub mod http;
pub mod identity;
pub mod relay;
pub mod upload;

pub use capture::{
    CaptureBackend, CaptureConstraints, CaptureError, CaptureSession, DeviceHandle, Encoder,
    FileCaptureBackend, MediaBlob,
};
pub use config::Config;
pub use controller::{ControllerError, ControllerState, Outcome, RecordingController};
pub use http::{create_router, AppState};
pub use identity::{Identity, IdentityConfig, IdentityHandle, SessionSink, UserRecord};
pub use relay::{
    Downstream, HttpDownstream, RelayError, RelayFailure, RelayResult, RelayService, StagingArea,
};
pub use upload::{UploadClient, UploadStatus, Uploader};
