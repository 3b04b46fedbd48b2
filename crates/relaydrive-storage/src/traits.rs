//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use relaydrive_core::models::{StoredFile, UploadStrategy, UploadedFile};
use relaydrive_core::UploadError;
use thiserror::Error;

/// Errors raised while constructing a backend
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, UploadError>;

/// One file to be transferred
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
    /// Folder the file is created in
    pub destination: String,
}

impl UploadRequest {
    pub fn new(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Bytes,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data,
            destination: destination.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn size_mb(&self) -> f64 {
        self.data.len() as f64 / (1024.0 * 1024.0)
    }
}

/// Storage abstraction trait
///
/// Backends perform the transfer for an already-selected strategy; choosing
/// the strategy, enforcing the size ceiling and falling back are the
/// [`Uploader`](crate::Uploader)'s job.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Transfer `request` using `strategy`.
    async fn upload(
        &self,
        strategy: UploadStrategy,
        request: &UploadRequest,
    ) -> StorageResult<UploadedFile>;

    /// Single direct request with no chunking and no session negotiation.
    async fn upload_simple(&self, request: &UploadRequest) -> StorageResult<UploadedFile>;

    /// Files in `destination`, newest first, at most `limit`.
    async fn list_files(&self, destination: &str, limit: usize) -> StorageResult<Vec<StoredFile>>;

    /// Metadata of a single file
    async fn get_file(&self, file_id: &str) -> StorageResult<StoredFile>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
