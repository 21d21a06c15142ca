use super::state::AppState;
use crate::relay::{DownstreamReply, RelayError, RelayService, StagedUpload};
use axum::{
    extract::{
        multipart::{Field, MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, info, warn};

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/upload
/// Stage the recording field, relay it downstream, return the downstream reply
pub async fn upload_recording(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, RelayError> {
    let mut multipart = multipart.map_err(|e| {
        warn!("Rejected non-multipart upload: {}", e.body_text());
        RelayError::Multipart(e.body_text())
    })?;

    let staged = stage_payload(&state.relay, &mut multipart).await?;

    info!(
        staged = %staged.staged_name(),
        size_bytes = staged.size_bytes(),
        "File received ({}), forwarding to processing service",
        staged.original_filename()
    );

    let reply = state.relay.relay(staged).await?;
    Ok(relay_response(reply))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

// ============================================================================
// Staging
// ============================================================================

/// Find the configured payload field and stage it completely.
/// Other fields are skipped.
async fn stage_payload(
    relay: &RelayService,
    multipart: &mut Multipart,
) -> Result<StagedUpload, RelayError> {
    let limit = relay.staging().max_bytes();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some(relay.field_name()) {
            debug!("Skipping multipart field {:?}", field.name());
            continue;
        }
        return stage_field(relay, field).await;
    }

    warn!("Upload request without '{}' field", relay.field_name());
    Err(RelayError::MissingField(relay.field_name().to_string()))
}

async fn stage_field(
    relay: &RelayService,
    mut field: Field<'_>,
) -> Result<StagedUpload, RelayError> {
    let limit = relay.staging().max_bytes();
    let original_filename = field
        .file_name()
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}.bin", relay.field_name()));
    let content_type = field.content_type().map(str::to_string);

    // An early return drops the writer, which discards the partial artifact
    let mut writer = relay
        .staging()
        .begin(&original_filename, content_type)
        .await?;

    while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, limit))? {
        writer.write_chunk(&chunk).await?;
    }

    Ok(writer.finish().await?)
}

fn multipart_error(err: MultipartError, limit: u64) -> RelayError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        RelayError::PayloadTooLarge { limit }
    } else {
        RelayError::Multipart(err.body_text())
    }
}

/// Downstream status and body, verbatim
fn relay_response(reply: DownstreamReply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::OK);
    let content_type = reply
        .content_type
        .as_deref()
        .and_then(|value| HeaderValue::from_str(value).ok());

    let mut response = (status, reply.body).into_response();
    if let Some(content_type) = content_type {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type);
    }
    response
}
