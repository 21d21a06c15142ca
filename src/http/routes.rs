use super::handlers;
use super::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Room for multipart boundaries and part headers on top of the payload limit
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let body_limit = state
        .relay
        .staging()
        .max_bytes()
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    let mut router = Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Recording upload relay
        .route(
            "/api/upload",
            post(handlers::upload_recording).layer(DefaultBodyLimit::max(body_limit)),
        );

    if let Some(cors) = state.allowed_origin.as_deref().and_then(cors_layer) {
        router = router.layer(cors);
    }

    router
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: &str) -> Option<CorsLayer> {
    let allow_origin = if origin == "*" {
        AllowOrigin::from(Any)
    } else {
        match HeaderValue::from_str(origin) {
            Ok(value) => AllowOrigin::exact(value),
            Err(e) => {
                warn!("Ignoring invalid allowed origin {:?}: {}", origin, e);
                return None;
            }
        }
    };

    Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]),
    )
}
