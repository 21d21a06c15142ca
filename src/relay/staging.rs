use axum::body::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StagingConfig;

/// Where uploads are held between receipt and forwarding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagingMode {
    Disk,
    Memory,
}

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("payload exceeds the staging limit of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("staging I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// In-memory staged payloads, keyed by staged name
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl MemoryStore {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, Bytes>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, key: String, data: Bytes) {
        self.entries().insert(key, data);
    }

    fn get(&self, key: &str) -> Option<Bytes> {
        self.entries().get(key).cloned()
    }

    fn remove(&self, key: &str) -> bool {
        self.entries().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }
}

/// Unique staged name: timestamp + random id + the original extension.
/// Never derived from the rest of the client-supplied filename.
pub fn staged_name(original_filename: &str) -> String {
    let ext = Path::new(original_filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 16 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();

    format!(
        "{}-{}{}",
        Utc::now().format("%Y%m%dT%H%M%S"),
        Uuid::new_v4().simple(),
        ext
    )
}

#[derive(Debug, Clone)]
enum Backing {
    Disk(PathBuf),
    Memory(MemoryStore),
}

/// Bounded staging area shared by all requests. Requests never share a
/// staged name, so the only shared state is the directory (or store) itself.
#[derive(Debug, Clone)]
pub struct StagingArea {
    backing: Backing,
    max_bytes: u64,
}

impl StagingArea {
    pub async fn disk(dir: impl Into<PathBuf>, max_bytes: u64) -> Result<Self, StagingError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        info!("Disk staging at {} (limit {} bytes)", dir.display(), max_bytes);

        Ok(Self {
            backing: Backing::Disk(dir),
            max_bytes,
        })
    }

    pub fn memory(max_bytes: u64) -> Self {
        info!("Memory staging (limit {} bytes)", max_bytes);
        Self {
            backing: Backing::Memory(MemoryStore::default()),
            max_bytes,
        }
    }

    pub async fn from_config(config: &StagingConfig) -> Result<Self, StagingError> {
        match config.mode {
            StagingMode::Disk => Self::disk(&config.dir, config.max_bytes).await,
            StagingMode::Memory => Ok(Self::memory(config.max_bytes)),
        }
    }

    pub fn mode(&self) -> StagingMode {
        match self.backing {
            Backing::Disk(_) => StagingMode::Disk,
            Backing::Memory(_) => StagingMode::Memory,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn dir(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Disk(dir) => Some(dir),
            Backing::Memory(_) => None,
        }
    }

    pub fn memory_store(&self) -> Option<&MemoryStore> {
        match &self.backing {
            Backing::Disk(_) => None,
            Backing::Memory(store) => Some(store),
        }
    }

    /// Open a writer for one incoming payload
    pub async fn begin(
        &self,
        original_filename: &str,
        content_type: Option<String>,
    ) -> Result<StagingWriter, StagingError> {
        let name = staged_name(original_filename);

        let sink = match &self.backing {
            Backing::Disk(dir) => {
                let path = dir.join(&name);
                let file = tokio::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .await?;
                WriterSink::Disk { path, file }
            }
            Backing::Memory(store) => WriterSink::Memory {
                store: store.clone(),
                buf: Vec::new(),
            },
        };

        debug!("Staging {} as {}", original_filename, name);

        Ok(StagingWriter {
            staged_name: name,
            original_filename: original_filename.to_string(),
            content_type,
            max_bytes: self.max_bytes,
            written: 0,
            sink: Some(sink),
        })
    }
}

#[derive(Debug)]
enum WriterSink {
    Disk { path: PathBuf, file: tokio::fs::File },
    Memory { store: MemoryStore, buf: Vec<u8> },
}

/// In-progress staging write. Dropping an unfinished writer discards the
/// partial artifact, so truncated uploads are never visible to forwarding.
#[derive(Debug)]
pub struct StagingWriter {
    staged_name: String,
    original_filename: String,
    content_type: Option<String>,
    max_bytes: u64,
    written: u64,
    sink: Option<WriterSink>,
}

impl StagingWriter {
    pub fn staged_name(&self) -> &str {
        &self.staged_name
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StagingError> {
        let next = self.written + chunk.len() as u64;
        if next > self.max_bytes {
            return Err(StagingError::TooLarge {
                limit: self.max_bytes,
            });
        }

        match self.sink.as_mut() {
            Some(WriterSink::Disk { file, .. }) => file.write_all(chunk).await?,
            Some(WriterSink::Memory { buf, .. }) => buf.extend_from_slice(chunk),
            None => {
                return Err(StagingError::Io(std::io::Error::new(
                    ErrorKind::Other,
                    "staging writer already finished",
                )))
            }
        }

        self.written = next;
        Ok(())
    }

    /// Complete the write and hand over ownership of the staged artifact
    pub async fn finish(mut self) -> Result<StagedUpload, StagingError> {
        let sink = self.sink.take().ok_or_else(|| {
            StagingError::Io(std::io::Error::new(
                ErrorKind::Other,
                "staging writer already finished",
            ))
        })?;
        let staged_name = std::mem::take(&mut self.staged_name);

        let location = match sink {
            WriterSink::Disk { path, mut file } => {
                let synced: std::io::Result<()> = async {
                    file.flush().await?;
                    file.sync_all().await
                }
                .await;
                drop(file);

                if let Err(e) = synced {
                    remove_file_now(&path);
                    return Err(e.into());
                }
                StagedLocation::Disk(path)
            }
            WriterSink::Memory { store, buf } => {
                store.insert(staged_name.clone(), Bytes::from(buf));
                StagedLocation::Memory {
                    key: staged_name.clone(),
                    store,
                }
            }
        };

        info!(
            staged = %staged_name,
            size_bytes = self.written,
            "Staged upload {}",
            self.original_filename
        );

        Ok(StagedUpload {
            staged_name,
            original_filename: std::mem::take(&mut self.original_filename),
            content_type: self.content_type.take(),
            size_bytes: self.written,
            received_at: Utc::now(),
            location: Some(location),
        })
    }
}

impl Drop for StagingWriter {
    fn drop(&mut self) {
        if let Some(WriterSink::Disk { path, file }) = self.sink.take() {
            drop(file);
            debug!("Discarding partial staged upload {}", path.display());
            remove_file_now(&path);
        }
    }
}

fn remove_file_now(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove staged file {}: {}", path.display(), e),
    }
}

#[derive(Debug)]
enum StagedLocation {
    Disk(PathBuf),
    Memory { key: String, store: MemoryStore },
}

impl StagedLocation {
    async fn remove(self) {
        match self {
            StagedLocation::Disk(path) => match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Removed staged file {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!("Staged file already gone: {}", path.display())
                }
                Err(e) => warn!("Failed to remove staged file {}: {}", path.display(), e),
            },
            StagedLocation::Memory { key, store } => {
                if !store.remove(&key) {
                    warn!("Staged payload already gone: {}", key);
                }
            }
        }
    }

    fn remove_now(self) {
        match self {
            StagedLocation::Disk(path) => remove_file_now(&path),
            StagedLocation::Memory { key, store } => {
                store.remove(&key);
            }
        }
    }
}

/// Readable staged payload
pub enum StagedPayload {
    File(tokio::fs::File),
    Bytes(Bytes),
}

/// A fully staged upload. Owned by exactly one request.
///
/// `release` removes the artifact; if the owner never gets there (panic,
/// cancelled handler future) the artifact is removed on drop instead.
#[derive(Debug)]
pub struct StagedUpload {
    staged_name: String,
    original_filename: String,
    content_type: Option<String>,
    size_bytes: u64,
    received_at: DateTime<Utc>,
    location: Option<StagedLocation>,
}

impl StagedUpload {
    pub fn staged_name(&self) -> &str {
        &self.staged_name
    }

    pub fn original_filename(&self) -> &str {
        &self.original_filename
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Disk path of the staged artifact (disk staging only)
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Some(StagedLocation::Disk(path)) => Some(path),
            _ => None,
        }
    }

    pub async fn open(&self) -> std::io::Result<StagedPayload> {
        match &self.location {
            Some(StagedLocation::Disk(path)) => {
                Ok(StagedPayload::File(tokio::fs::File::open(path).await?))
            }
            Some(StagedLocation::Memory { key, store }) => store
                .get(key)
                .map(StagedPayload::Bytes)
                .ok_or_else(|| {
                    std::io::Error::new(ErrorKind::NotFound, format!("staged payload {} missing", key))
                }),
            None => Err(std::io::Error::new(
                ErrorKind::NotFound,
                "staged upload already released",
            )),
        }
    }

    /// Remove the staged artifact
    pub async fn release(mut self) {
        if let Some(location) = self.location.take() {
            location.remove().await;
            info!(staged = %self.staged_name, "Released staged upload");
        }
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if let Some(location) = self.location.take() {
            warn!(staged = %self.staged_name, "Staged upload dropped without release, removing");
            location.remove_now();
        }
    }
}
