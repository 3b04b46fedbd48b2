//! In-memory storage backend
//!
//! Keeps uploaded files in process memory. Useful for local runs without
//! credentials and for exercising the queue; failures and latency can be
//! scripted.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use relaydrive_core::constants::view_link_for;
use relaydrive_core::models::{StoredFile, UploadStrategy, UploadedFile};
use relaydrive_core::UploadError;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{Storage, StorageBackend, StorageResult, UploadRequest};

/// Which path a recorded call went through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPath {
    Strategy(UploadStrategy),
    Simple,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCall {
    pub path: UploadPath,
    pub file_name: String,
    pub size: u64,
    /// Byte lengths of the ranges a chunked transfer would send
    pub chunk_sizes: Vec<u64>,
    pub succeeded: bool,
}

#[derive(Default)]
struct FailurePlan {
    primary: VecDeque<UploadError>,
    primary_always: Option<UploadError>,
    simple: VecDeque<UploadError>,
    simple_always: Option<UploadError>,
}

#[derive(Default)]
struct MemoryState {
    files: Vec<(StoredFile, Bytes, String)>,
    calls: Vec<UploadCall>,
    failures: FailurePlan,
}

#[derive(Clone)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
    chunk_size: u64,
    latency: Option<Duration>,
}

impl MemoryStorage {
    pub fn new(chunk_size: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            chunk_size: chunk_size.max(1),
            latency: None,
        }
    }

    /// Every upload call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// The next strategy-path upload fails with `err`.
    pub async fn fail_next_primary(&self, err: UploadError) {
        self.state.lock().await.failures.primary.push_back(err);
    }

    /// Every strategy-path upload fails with `err`.
    pub async fn fail_primary_always(&self, err: UploadError) {
        self.state.lock().await.failures.primary_always = Some(err);
    }

    /// The next fallback upload fails with `err`.
    pub async fn fail_next_simple(&self, err: UploadError) {
        self.state.lock().await.failures.simple.push_back(err);
    }

    /// Every fallback upload fails with `err`.
    pub async fn fail_simple_always(&self, err: UploadError) {
        self.state.lock().await.failures.simple_always = Some(err);
    }

    pub async fn calls(&self) -> Vec<UploadCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn file_count(&self) -> usize {
        self.state.lock().await.files.len()
    }

    pub async fn content(&self, file_id: &str) -> Option<Bytes> {
        self.state
            .lock()
            .await
            .files
            .iter()
            .find(|(file, _, _)| file.id == file_id)
            .map(|(_, data, _)| data.clone())
    }

    fn chunk_sizes(&self, size: u64) -> Vec<u64> {
        let mut sizes = Vec::new();
        let mut offset = 0;
        while offset < size {
            let end = (offset + self.chunk_size).min(size);
            sizes.push(end - offset);
            offset = end;
        }
        sizes
    }

    async fn store(&self, path: UploadPath, request: &UploadRequest) -> StorageResult<UploadedFile> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().await;
        let failure = match path {
            UploadPath::Strategy(_) => state
                .failures
                .primary
                .pop_front()
                .or_else(|| state.failures.primary_always.clone()),
            UploadPath::Simple => state
                .failures
                .simple
                .pop_front()
                .or_else(|| state.failures.simple_always.clone()),
        };

        let chunk_sizes = match path {
            UploadPath::Strategy(UploadStrategy::ChunkedResumable) => {
                self.chunk_sizes(request.size())
            }
            _ => Vec::new(),
        };
        state.calls.push(UploadCall {
            path,
            file_name: request.file_name.clone(),
            size: request.size(),
            chunk_sizes,
            succeeded: failure.is_none(),
        });

        if let Some(err) = failure {
            tracing::debug!(error = %err, file_name = %request.file_name, "Memory upload failed (scripted)");
            return Err(err);
        }

        let id = Uuid::new_v4().simple().to_string();
        let file = UploadedFile {
            view_link: view_link_for(&id),
            id,
            name: request.file_name.clone(),
            mime_type: request.mime_type.clone(),
            size: request.size(),
        };
        let mut stored = StoredFile::from(file.clone());
        stored.created_time = Some(Utc::now());
        state
            .files
            .push((stored, request.data.clone(), request.destination.clone()));

        tracing::debug!(file_id = %file.id, file_name = %file.name, size_bytes = file.size, "Memory upload stored");
        Ok(file)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn upload(
        &self,
        strategy: UploadStrategy,
        request: &UploadRequest,
    ) -> StorageResult<UploadedFile> {
        self.store(UploadPath::Strategy(strategy), request).await
    }

    async fn upload_simple(&self, request: &UploadRequest) -> StorageResult<UploadedFile> {
        self.store(UploadPath::Simple, request).await
    }

    async fn list_files(&self, destination: &str, limit: usize) -> StorageResult<Vec<StoredFile>> {
        let state = self.state.lock().await;
        Ok(state
            .files
            .iter()
            .rev()
            .filter(|(_, _, dest)| dest == destination)
            .take(limit)
            .map(|(file, _, _)| file.clone())
            .collect())
    }

    async fn get_file(&self, file_id: &str) -> StorageResult<StoredFile> {
        let state = self.state.lock().await;
        state
            .files
            .iter()
            .find(|(file, _, _)| file.id == file_id)
            .map(|(file, _, _)| file.clone())
            .ok_or_else(|| UploadError::Unknown(format!("File not found: {}", file_id)))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}
