use serde::Serialize;

/// How a recording session ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "lowercase")]
pub enum Outcome {
    /// Processing service payload relayed by the gateway
    Success(serde_json::Value),
    /// Human-readable error detail
    Error(String),
}

/// Recording controller state, as rendered by the UI
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "result", rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    AwaitingDevice,
    Recording,
    Stopping,
    Uploading,
    Done(Outcome),
}

impl ControllerState {
    /// Whether a new `start` is accepted
    pub fn accepts_start(&self) -> bool {
        matches!(self, ControllerState::Idle | ControllerState::Done(_))
    }

    pub fn is_done(&self) -> bool {
        matches!(self, ControllerState::Done(_))
    }

    pub fn error_detail(&self) -> Option<&str> {
        match self {
            ControllerState::Done(Outcome::Error(detail)) => Some(detail),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControllerState::Idle => "idle",
            ControllerState::AwaitingDevice => "awaiting_device",
            ControllerState::Recording => "recording",
            ControllerState::Stopping => "stopping",
            ControllerState::Uploading => "uploading",
            ControllerState::Done(Outcome::Success(_)) => "done(success)",
            ControllerState::Done(Outcome::Error(_)) => "done(error)",
        }
    }
}
