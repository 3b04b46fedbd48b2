//! Attachment sources
//!
//! A source turns an opaque message identifier into a byte stream. The
//! stream is consumed once; a retry asks the source again.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use relaydrive_core::{UploadError, UploadResult};
use relaydrive_infra::ByteStream;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;

const FILE_READ_CAPACITY: usize = 64 * 1024;

#[async_trait]
pub trait AttachmentSource: Send + Sync {
    /// Open the content stream of attachment `message_id`.
    async fn fetch(&self, message_id: &str) -> UploadResult<ByteStream>;
}

/// Reads attachments from the local filesystem; the message id is a path.
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    base_dir: Option<PathBuf>,
}

impl FileSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative ids against `base_dir`.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve(&self, message_id: &str) -> PathBuf {
        match &self.base_dir {
            Some(base) => base.join(message_id),
            None => PathBuf::from(message_id),
        }
    }
}

#[async_trait]
impl AttachmentSource for FileSource {
    async fn fetch(&self, message_id: &str) -> UploadResult<ByteStream> {
        let path = self.resolve(message_id);
        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            UploadError::Unknown(format!("Cannot open {}: {}", path.display(), e))
        })?;

        tracing::debug!(path = %path.display(), "Opened local attachment");
        let reader = ReaderStream::with_capacity(file, FILE_READ_CAPACITY);
        Ok(Box::pin(reader.map(|chunk| chunk.map_err(UploadError::network))))
    }
}

#[derive(Clone)]
struct Scripted {
    chunks: Vec<Bytes>,
    /// Error yielded after the chunks, instead of a clean end
    error: Option<UploadError>,
}

#[derive(Default)]
struct MemorySourceState {
    attachments: HashMap<String, Scripted>,
    fetches: HashMap<String, u32>,
}

/// In-memory attachments with scriptable mid-stream failures.
#[derive(Clone, Default)]
pub struct MemorySource {
    state: Arc<Mutex<MemorySourceState>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `data` in `chunk_size` pieces.
    pub async fn insert(&self, message_id: impl Into<String>, data: Bytes, chunk_size: usize) {
        self.insert_scripted(message_id, split(data, chunk_size), None)
            .await;
    }

    /// Serve the first `fail_after` bytes of `data`, then fail with `err`.
    pub async fn insert_failing(
        &self,
        message_id: impl Into<String>,
        data: Bytes,
        chunk_size: usize,
        fail_after: usize,
        err: UploadError,
    ) {
        let prefix = data.slice(..fail_after.min(data.len()));
        self.insert_scripted(message_id, split(prefix, chunk_size), Some(err))
            .await;
    }

    async fn insert_scripted(
        &self,
        message_id: impl Into<String>,
        chunks: Vec<Bytes>,
        error: Option<UploadError>,
    ) {
        self.state
            .lock()
            .await
            .attachments
            .insert(message_id.into(), Scripted { chunks, error });
    }

    /// How many times `message_id` was fetched
    pub async fn fetch_count(&self, message_id: &str) -> u32 {
        self.state
            .lock()
            .await
            .fetches
            .get(message_id)
            .copied()
            .unwrap_or(0)
    }
}

fn split(data: Bytes, chunk_size: usize) -> Vec<Bytes> {
    let chunk_size = chunk_size.max(1);
    (0..data.len())
        .step_by(chunk_size)
        .map(|start| data.slice(start..(start + chunk_size).min(data.len())))
        .collect()
}

#[async_trait]
impl AttachmentSource for MemorySource {
    async fn fetch(&self, message_id: &str) -> UploadResult<ByteStream> {
        let mut state = self.state.lock().await;
        *state.fetches.entry(message_id.to_string()).or_insert(0) += 1;

        let scripted = state
            .attachments
            .get(message_id)
            .cloned()
            .ok_or_else(|| UploadError::Unknown(format!("Attachment not found: {}", message_id)))?;

        let items = scripted
            .chunks
            .into_iter()
            .map(Ok)
            .chain(scripted.error.into_iter().map(Err));
        Ok(Box::pin(stream::iter(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaydrive_core::{ErrorKind, ErrorMetadata};
    use relaydrive_infra::{bufferize, BufferOptions};
    use std::io::Write;
    use std::time::Duration;

    fn options() -> BufferOptions {
        BufferOptions {
            timeout: Duration::from_secs(5),
            max_bytes: 1024 * 1024,
            stall_warning: Duration::from_secs(1),
            label: "source-test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_source_serves_chunks() {
        let source = MemorySource::new();
        source
            .insert("m1", Bytes::from_static(b"0123456789"), 4)
            .await;

        let chunks: Vec<_> = source.fetch("m1").await.unwrap().collect().await;
        let sizes: Vec<_> = chunks.iter().map(|c| c.as_ref().unwrap().len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(source.fetch_count("m1").await, 1);
    }

    #[tokio::test]
    async fn test_memory_source_fails_mid_stream() {
        let source = MemorySource::new();
        source
            .insert_failing(
                "m1",
                Bytes::from(vec![0u8; 100]),
                10,
                30,
                UploadError::Network("ECONNRESET".to_string()),
            )
            .await;

        let err = bufferize(source.fetch("m1").await.unwrap(), &options())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_memory_source_unknown_attachment() {
        let source = MemorySource::new();
        assert!(source.fetch("missing").await.is_err());
        assert_eq!(source.fetch_count("missing").await, 1);
    }

    #[tokio::test]
    async fn test_file_source_reads_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&vec![9u8; 200_000]).unwrap();

        let source = FileSource::with_base_dir(dir.path());
        let data = bufferize(source.fetch("report.pdf").await.unwrap(), &options())
            .await
            .unwrap();
        assert_eq!(data.len(), 200_000);

        assert!(source.fetch("absent.pdf").await.is_err());
    }
}
