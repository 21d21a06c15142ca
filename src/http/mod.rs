//! HTTP gateway for browser uploads
//!
//! - POST /api/upload - Stage a multipart recording and relay it to the processing service
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
