//! Upload executor trait
//!
//! The queue knows nothing about where bytes come from or where they go. It
//! calls `prepare` to obtain the buffer for an attempt and `upload` to
//! transfer it; [`crate::Pipeline`] is the production implementation.

use async_trait::async_trait;
use bytes::Bytes;
use relaydrive_core::models::{UploadStrategy, UploadedFile};
use relaydrive_core::UploadResult;

/// What a queue entry carries until it reaches a terminal state
#[derive(Debug, Clone)]
pub enum Payload {
    /// Bytes already in memory
    Buffer(Bytes),
    /// Attachment fetched and buffered when the attempt starts
    Attachment { message_id: String },
}

impl Payload {
    pub fn size(&self) -> Option<u64> {
        match self {
            Payload::Buffer(data) => Some(data.len() as u64),
            Payload::Attachment { .. } => None,
        }
    }
}

#[async_trait]
pub trait UploadExecutor: Send + Sync {
    /// Materialize the payload into one contiguous buffer.
    async fn prepare(&self, file_name: &str, payload: Payload) -> UploadResult<Bytes>;

    /// Transfer the buffer to storage.
    async fn upload(&self, file_name: &str, data: Bytes) -> UploadResult<UploadedFile>;

    /// Strategy a buffer of `byte_length` bytes would use; for metrics only.
    fn strategy_for(&self, byte_length: u64) -> UploadStrategy;
}
