//! Shared plumbing for the `relaydrive` binary.

use bytes::Bytes;
use relaydrive_core::models::UploadedFile;
use relaydrive_core::{ClassifiedError, UploadConfig, UploadError, UploadResult};
use relaydrive_infra::{bufferize, BufferOptions, ErrorTracker, PerformanceMonitor};
use relaydrive_services::{AttachmentSource, FileSource};
use relaydrive_storage::{Storage, Uploader};
use relaydrive_worker::{Payload, Pipeline, QueueConfig, QueueTicket, UploadQueue};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Outcome of one local file
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReport {
    pub path: PathBuf,
    pub file_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<UploadedFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ClassifiedError>,
}

impl UploadReport {
    fn new(path: &Path, file_name: &str, outcome: Result<UploadedFile, ClassifiedError>) -> Self {
        let (file, error) = match outcome {
            Ok(file) => (Some(file), None),
            Err(err) => (None, Some(err)),
        };
        Self {
            path: path.to_path_buf(),
            file_name: file_name.to_string(),
            success: file.is_some(),
            file,
            error,
        }
    }
}

/// Start a queue that uploads into `destination` on `storage`.
pub fn start_queue(
    storage: Arc<dyn Storage>,
    config: &UploadConfig,
    destination: &str,
    source: Option<Arc<dyn AttachmentSource>>,
) -> UploadQueue {
    let mut pipeline = Pipeline::new(Uploader::new(storage, config.clone()), destination);
    if let Some(source) = source {
        pipeline = pipeline.with_source(source);
    }

    UploadQueue::start(
        Arc::new(pipeline),
        QueueConfig::from(config),
        Arc::new(PerformanceMonitor::new()),
        Arc::new(ErrorTracker::new()),
    )
}

pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Stream a local file into memory under the same limits as attachments.
pub async fn read_local_file(path: &Path, config: &UploadConfig) -> UploadResult<Bytes> {
    let stream = FileSource::new().fetch(&path.to_string_lossy()).await?;
    let options = BufferOptions::from_config(config, &file_name_of(path));
    bufferize(stream, &options).await
}

/// Upload local files one after another through the queue.
///
/// Every file is read before it is enqueued; a file that cannot be read is
/// reported as failed and never reaches the queue.
pub async fn upload_local_files(
    queue: &UploadQueue,
    owner_id: &str,
    paths: &[PathBuf],
    config: &UploadConfig,
) -> Vec<UploadReport> {
    let mut pending: Vec<(PathBuf, String, Result<QueueTicket, UploadError>)> = Vec::new();
    for path in paths {
        let file_name = file_name_of(path);
        let ticket = match read_local_file(path, config).await {
            Ok(data) => Ok(queue
                .enqueue(owner_id, &file_name, Payload::Buffer(data))
                .await),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot read local file");
                Err(e)
            }
        };
        pending.push((path.clone(), file_name, ticket));
    }

    let mut reports = Vec::with_capacity(pending.len());
    for (path, file_name, ticket) in pending {
        let outcome = match ticket {
            Ok(ticket) => ticket.wait().await,
            Err(e) => Err(e.classify()),
        };
        reports.push(UploadReport::new(&path, &file_name, outcome));
    }
    reports
}
