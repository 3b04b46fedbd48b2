//! Fetch, buffer and upload one file

use async_trait::async_trait;
use bytes::Bytes;
use relaydrive_core::models::{UploadStrategy, UploadedFile};
use relaydrive_core::{UploadError, UploadResult};
use relaydrive_infra::{bufferize, BufferOptions};
use relaydrive_services::AttachmentSource;
use relaydrive_storage::Uploader;
use std::sync::Arc;

use crate::context::{Payload, UploadExecutor};

#[derive(Clone)]
pub struct Pipeline {
    uploader: Uploader,
    source: Option<Arc<dyn AttachmentSource>>,
    destination: String,
}

impl Pipeline {
    pub fn new(uploader: Uploader, destination: impl Into<String>) -> Self {
        Self {
            uploader,
            source: None,
            destination: destination.into(),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn AttachmentSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }
}

#[async_trait]
impl UploadExecutor for Pipeline {
    async fn prepare(&self, file_name: &str, payload: Payload) -> UploadResult<Bytes> {
        let message_id = match payload {
            Payload::Buffer(data) => return Ok(data),
            Payload::Attachment { message_id } => message_id,
        };

        let source = self.source.as_ref().ok_or_else(|| {
            UploadError::Unknown("No attachment source configured".to_string())
        })?;

        let stream = source.fetch(&message_id).await?;
        let options = BufferOptions::from_config(self.uploader.config(), file_name);
        bufferize(stream, &options).await
    }

    async fn upload(&self, file_name: &str, data: Bytes) -> UploadResult<UploadedFile> {
        self.uploader
            .upload(file_name, data, &self.destination)
            .await
    }

    fn strategy_for(&self, byte_length: u64) -> UploadStrategy {
        self.uploader.strategy_for(byte_length)
    }
}
