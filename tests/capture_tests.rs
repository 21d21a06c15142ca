mod common;

use anyhow::Result;
use common::ScriptedBackend;
use std::time::Duration;
use summora_relay::capture::{
    negotiate_format, preferred_formats, CaptureBackend, CaptureConstraints, CaptureError,
    CaptureSession, Encoder, FileCaptureBackend, AUDIO_FORMAT_PREFERENCES,
    VIDEO_FORMAT_PREFERENCES,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::oneshot;

fn media_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn write_media(dir: &TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    path
}

// ============================================================================
// Encoder
// ============================================================================

#[tokio::test]
async fn test_record_preserves_order_and_drops_empty_fragments() -> Result<()> {
    let (encoder, mut sink) = Encoder::channel("video/webm");
    let (stop_tx, stop_rx) = oneshot::channel();

    let producer = tokio::spawn(async move {
        for i in 0u8..20 {
            sink.emit(vec![i; (i % 4) as usize]);
            tokio::task::yield_now().await;
        }
        sink.stopped().await;
        // Flushed after the stop request, still part of the recording
        sink.emit(vec![]);
        sink.emit(vec![200, 201]);
    });

    let recorder = tokio::spawn(encoder.record(stop_rx));
    tokio::time::sleep(Duration::from_millis(20)).await;
    stop_tx.send(()).unwrap();

    let blob = recorder.await??;
    producer.await?;

    let mut expected = Vec::new();
    for i in 0u8..20 {
        expected.extend(std::iter::repeat(i).take((i % 4) as usize));
    }
    expected.extend([200, 201]);

    assert_eq!(blob.data, expected);
    assert_eq!(blob.mime_type, "video/webm");
    Ok(())
}

#[tokio::test]
async fn test_record_surfaces_encoder_failure() {
    let (encoder, sink) = Encoder::channel("audio/webm");
    let (_stop_tx, stop_rx) = oneshot::channel();

    sink.emit(vec![1, 2, 3]);
    sink.fail("device unplugged");

    let result = encoder.record(stop_rx).await;
    assert_eq!(
        result,
        Err(CaptureError::Encoder("device unplugged".to_string()))
    );
}

#[tokio::test]
async fn test_record_with_no_fragments_yields_empty_blob() -> Result<()> {
    let (encoder, sink) = Encoder::channel("audio/ogg");
    let (stop_tx, stop_rx) = oneshot::channel();
    drop(stop_tx);
    drop(sink);

    let blob = encoder.record(stop_rx).await?;
    assert!(blob.is_empty());
    assert_eq!(blob.file_name(), "recording.ogg");
    Ok(())
}

// ============================================================================
// Format negotiation
// ============================================================================

#[test]
fn test_preferences_follow_constraints() {
    assert_eq!(
        preferred_formats(CaptureConstraints::audio_video()),
        VIDEO_FORMAT_PREFERENCES
    );
    assert_eq!(
        preferred_formats(CaptureConstraints::audio_only()),
        AUDIO_FORMAT_PREFERENCES
    );
}

#[test]
fn test_negotiation_picks_first_supported_preference() {
    let mut backend = ScriptedBackend::granting(Vec::new());
    backend.supported = vec!["video/mp4".to_string(), "video/webm".to_string()];

    let mime = negotiate_format(VIDEO_FORMAT_PREFERENCES, &backend).unwrap();
    assert_eq!(mime, "video/webm");
}

#[test]
fn test_negotiation_falls_back_to_default_then_fails() {
    let mut backend = ScriptedBackend::granting(Vec::new());
    backend.supported = Vec::new();
    backend.default_format = Some("video/x-matroska".to_string());
    assert_eq!(
        negotiate_format(VIDEO_FORMAT_PREFERENCES, &backend).unwrap(),
        "video/x-matroska"
    );

    backend.default_format = None;
    assert_eq!(
        negotiate_format(VIDEO_FORMAT_PREFERENCES, &backend),
        Err(CaptureError::EncoderUnavailable)
    );
}

// ============================================================================
// File capture backend
// ============================================================================

#[tokio::test]
async fn test_file_backend_replays_whole_file() -> Result<()> {
    let dir = TempDir::new()?;
    let data = media_bytes(4096);
    let path = write_media(&dir, "meeting.webm", &data);

    let backend = Arc::new(
        FileCaptureBackend::new(&path)
            .with_fragment_size(500)
            .with_fragment_interval(Duration::ZERO),
    );
    let session = CaptureSession::new(backend.clone());

    let device = session
        .request_capture(CaptureConstraints::audio_video())
        .await?;
    assert_eq!(backend.active_devices(), 1);

    let encoder = session
        .begin_encoding(&device, VIDEO_FORMAT_PREFERENCES)
        .await?;
    assert_eq!(encoder.mime_type(), "video/webm");

    let (stop_tx, stop_rx) = oneshot::channel();
    let recorder = tokio::spawn(encoder.record(stop_rx));
    tokio::time::sleep(Duration::from_millis(200)).await;
    stop_tx.send(()).unwrap();

    let blob = recorder.await??;
    assert_eq!(blob.data, data);

    session.release(device);
    assert_eq!(backend.active_devices(), 0);
    Ok(())
}

#[tokio::test]
async fn test_file_backend_stop_keeps_fragments_read_so_far() -> Result<()> {
    let dir = TempDir::new()?;
    let data = media_bytes(10_000);
    let path = write_media(&dir, "meeting.webm", &data);

    let backend = FileCaptureBackend::new(&path)
        .with_fragment_size(100)
        .with_fragment_interval(Duration::from_secs(60));

    let device = backend
        .request_capture(CaptureConstraints::audio_video())
        .await?;
    let encoder = backend.open_encoder(&device, "video/webm").await?;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let blob = encoder.stop().await?;

    // First fragment is read immediately, the next waits on the interval
    assert_eq!(blob.data, data[..100].to_vec());
    device.release();
    Ok(())
}

#[tokio::test]
async fn test_file_backend_audio_file_rejects_video_constraints() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_media(&dir, "call.ogg", &media_bytes(64));
    let backend = FileCaptureBackend::new(&path);

    let err = backend
        .request_capture(CaptureConstraints::audio_video())
        .await
        .unwrap_err();
    assert_eq!(err, CaptureError::DeviceNotFound);

    let device = backend
        .request_capture(CaptureConstraints::audio_only())
        .await?;
    assert_eq!(
        negotiate_format(AUDIO_FORMAT_PREFERENCES, &backend)?,
        "audio/ogg"
    );
    device.release();
    Ok(())
}

#[tokio::test]
async fn test_file_backend_missing_or_unknown_source() {
    let dir = TempDir::new().unwrap();

    let missing = FileCaptureBackend::new(dir.path().join("absent.webm"));
    assert_eq!(
        missing
            .request_capture(CaptureConstraints::audio_video())
            .await
            .unwrap_err(),
        CaptureError::DeviceNotFound
    );

    let unknown = FileCaptureBackend::new(write_media(&dir, "notes.txt", b"hello"));
    assert_eq!(
        unknown
            .request_capture(CaptureConstraints::audio_only())
            .await
            .unwrap_err(),
        CaptureError::DeviceNotFound
    );

    let empty = CaptureConstraints {
        video: false,
        audio: false,
    };
    assert_eq!(
        missing.request_capture(empty).await.unwrap_err(),
        CaptureError::Unsupported
    );
}

#[tokio::test]
async fn test_file_backend_codec_parameters_fall_back_to_container() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_media(&dir, "meeting.webm", &media_bytes(32));
    let backend = FileCaptureBackend::new(&path);

    assert!(!backend.is_format_supported("video/webm;codecs=vp9,opus"));
    assert!(backend.is_format_supported("video/webm"));
    assert!(!backend.is_format_supported("video/mp4"));
    Ok(())
}

#[tokio::test]
async fn test_dropped_device_stops_tracks() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_media(&dir, "meeting.mp4", &media_bytes(32));
    let backend = FileCaptureBackend::new(&path);

    {
        let _device = backend
            .request_capture(CaptureConstraints::audio_video())
            .await?;
        assert_eq!(backend.active_devices(), 1);
    }

    assert_eq!(backend.active_devices(), 0);
    Ok(())
}
