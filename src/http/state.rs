use crate::relay::RelayService;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Stage/forward/release pipeline for uploads
    pub relay: RelayService,

    /// Browser origin allowed to call the API ("*" for any)
    pub allowed_origin: Option<String>,
}

impl AppState {
    pub fn new(relay: RelayService) -> Self {
        Self {
            relay,
            allowed_origin: None,
        }
    }

    pub fn with_allowed_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origin = Some(origin.into());
        self
    }
}
