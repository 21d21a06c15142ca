use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::backend::{CaptureBackend, CaptureConstraints, CaptureError};

/// Preferred containers for audio+video capture, best first
pub const VIDEO_FORMAT_PREFERENCES: &[&str] = &[
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm",
    "video/mp4",
];

/// Preferred containers for audio-only capture, best first
pub const AUDIO_FORMAT_PREFERENCES: &[&str] = &[
    "audio/webm;codecs=opus",
    "audio/webm",
    "audio/ogg",
];

pub fn preferred_formats(constraints: CaptureConstraints) -> &'static [&'static str] {
    if constraints.video {
        VIDEO_FORMAT_PREFERENCES
    } else {
        AUDIO_FORMAT_PREFERENCES
    }
}

/// Pick the first supported preference, else the platform default.
pub fn negotiate_format(
    preferences: &[&str],
    backend: &dyn CaptureBackend,
) -> Result<String, CaptureError> {
    if let Some(mime) = preferences
        .iter()
        .find(|mime| backend.is_format_supported(mime))
    {
        debug!("Negotiated preferred format {}", mime);
        return Ok((*mime).to_string());
    }

    match backend.default_format() {
        Some(mime) => {
            info!(
                "No preferred format supported by {}, falling back to {}",
                backend.name(),
                mime
            );
            Ok(mime)
        }
        None => Err(CaptureError::EncoderUnavailable),
    }
}

/// Event emitted by a running encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEvent {
    /// One encoded fragment, in capture order
    Fragment(Vec<u8>),
    /// The encoder failed; no further fragments follow
    Failed(String),
}

/// Finalized recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl MediaBlob {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// File extension matching the container, used for upload filenames
    pub fn extension(&self) -> &'static str {
        extension_for_mime(&self.mime_type)
    }

    pub fn file_name(&self) -> String {
        format!("recording.{}", self.extension())
    }
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let base = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match base.as_str() {
        "video/webm" | "audio/webm" => "webm",
        "video/mp4" => "mp4",
        "audio/mp4" => "m4a",
        "audio/ogg" => "ogg",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/mpeg" => "mp3",
        _ => "bin",
    }
}

/// Ordered fragment accumulator. Zero-length fragments are dropped.
#[derive(Debug)]
pub struct FragmentBuffer {
    mime_type: String,
    chunks: Vec<Vec<u8>>,
    total_bytes: usize,
}

impl FragmentBuffer {
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            chunks: Vec::new(),
            total_bytes: 0,
        }
    }

    pub fn push(&mut self, fragment: Vec<u8>) {
        if fragment.is_empty() {
            return;
        }
        self.total_bytes += fragment.len();
        self.chunks.push(fragment);
    }

    pub fn fragment_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Concatenate all fragments in emission order
    pub fn finish(self) -> MediaBlob {
        let mut data = Vec::with_capacity(self.total_bytes);
        for chunk in self.chunks {
            data.extend_from_slice(&chunk);
        }

        MediaBlob {
            mime_type: self.mime_type,
            data,
        }
    }
}

/// Handle to a running incremental encoder.
///
/// The producer side pushes `EncoderEvent`s into an unbounded channel (it
/// cannot be paused) and watches the stop signal. On stop it flushes what it
/// still holds and closes the channel, so draining the channel to the end
/// yields every fragment including those racing the stop request.
#[derive(Debug)]
pub struct Encoder {
    mime_type: String,
    events: mpsc::UnboundedReceiver<EncoderEvent>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl Encoder {
    pub fn new(
        mime_type: impl Into<String>,
        events: mpsc::UnboundedReceiver<EncoderEvent>,
        stop_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            mime_type: mime_type.into(),
            events,
            stop_tx: Some(stop_tx),
        }
    }

    /// Producer/consumer pair for backend implementations
    pub fn channel(
        mime_type: impl Into<String>,
    ) -> (Self, EncoderSink) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        (
            Self::new(mime_type, events_rx, stop_tx),
            EncoderSink {
                events: events_tx,
                stop: stop_rx,
            },
        )
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn request_stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            // Producer may already be gone; the channel drains either way
            let _ = stop_tx.send(());
        }
    }

    /// Stop the encoder and build the final blob from everything it emitted
    pub async fn stop(mut self) -> Result<MediaBlob, CaptureError> {
        self.request_stop();
        let mut buffer = FragmentBuffer::new(self.mime_type.clone());
        while let Some(event) = self.events.recv().await {
            match event {
                EncoderEvent::Fragment(bytes) => buffer.push(bytes),
                EncoderEvent::Failed(reason) => return Err(CaptureError::Encoder(reason)),
            }
        }
        Ok(buffer.finish())
    }

    /// Buffer fragments until `stop_rx` fires (or its sender is dropped),
    /// then stop the encoder and return the finalized blob.
    pub async fn record(
        mut self,
        mut stop_rx: oneshot::Receiver<()>,
    ) -> Result<MediaBlob, CaptureError> {
        let mut buffer = FragmentBuffer::new(self.mime_type.clone());
        let mut stop_requested = false;

        info!("Encoder started ({})", self.mime_type);

        loop {
            tokio::select! {
                _ = &mut stop_rx, if !stop_requested => {
                    stop_requested = true;
                    self.request_stop();
                }
                event = self.events.recv() => match event {
                    Some(EncoderEvent::Fragment(bytes)) => buffer.push(bytes),
                    Some(EncoderEvent::Failed(reason)) => {
                        warn!("Encoder failed after {} fragments: {}", buffer.fragment_count(), reason);
                        return Err(CaptureError::Encoder(reason));
                    }
                    None => break,
                },
            }
        }

        info!(
            "Encoder finalized: {} fragments, {} bytes",
            buffer.fragment_count(),
            buffer.total_bytes()
        );

        Ok(buffer.finish())
    }
}

/// Producer side of an `Encoder`
#[derive(Debug)]
pub struct EncoderSink {
    events: mpsc::UnboundedSender<EncoderEvent>,
    stop: oneshot::Receiver<()>,
}

impl EncoderSink {
    /// Emit a fragment. Returns false once the consumer is gone.
    pub fn emit(&self, fragment: Vec<u8>) -> bool {
        self.events.send(EncoderEvent::Fragment(fragment)).is_ok()
    }

    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.events.send(EncoderEvent::Failed(reason.into()));
    }

    /// Resolves when the consumer requests a stop (or goes away).
    /// Must not be awaited again once it has resolved.
    pub async fn stopped(&mut self) {
        let _ = (&mut self.stop).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_fragments_are_dropped() {
        let mut buffer = FragmentBuffer::new("video/webm");
        buffer.push(vec![1, 2]);
        buffer.push(Vec::new());
        buffer.push(vec![3]);

        assert_eq!(buffer.fragment_count(), 2);
        let blob = buffer.finish();
        assert_eq!(blob.data, vec![1, 2, 3]);
        assert_eq!(blob.mime_type, "video/webm");
    }

    #[test]
    fn extension_ignores_codec_parameters() {
        assert_eq!(extension_for_mime("video/webm;codecs=vp9,opus"), "webm");
        assert_eq!(extension_for_mime("Video/MP4"), "mp4");
        assert_eq!(extension_for_mime("application/x-unknown"), "bin");
    }

    #[tokio::test]
    async fn stop_drains_fragments_emitted_before_close() {
        let (encoder, sink) = Encoder::channel("audio/ogg");
        sink.emit(vec![1]);
        sink.emit(vec![]);
        sink.emit(vec![2, 3]);
        drop(sink);

        let blob = encoder.stop().await.unwrap();
        assert_eq!(blob.data, vec![1, 2, 3]);
        assert_eq!(blob.file_name(), "recording.ogg");
    }
}
