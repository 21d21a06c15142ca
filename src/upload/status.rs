use serde::Serialize;

/// Caller-visible upload progress: `Idle → Uploading → Success | Error`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UploadStatus {
    Idle,
    Uploading,
    Success,
    Error { detail: String },
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Success | UploadStatus::Error { .. })
    }

    /// Status line shown under the recorder
    pub fn describe(&self) -> Option<&'static str> {
        match self {
            UploadStatus::Idle => None,
            UploadStatus::Uploading => Some("Uploading recording to server..."),
            UploadStatus::Success => Some("Recording successfully uploaded!"),
            UploadStatus::Error { .. } => Some("There was an error uploading your recording."),
        }
    }
}
