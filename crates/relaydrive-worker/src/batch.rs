//! Per-sender batch collector
//!
//! Attachments from one sender that arrive close together are held until
//! the sender has been quiet for the debounce window. Each arrival restarts
//! that sender's timer. When the timer fires, the batch is handed to the
//! upload queue one file at a time, in arrival order, waiting for each file
//! to finish before the next one is enqueued.
//!
//! Arrivals after a batch has started processing open a new batch.

use chrono::{DateTime, Utc};
use relaydrive_core::models::{
    BatchFileSnapshot, BatchSnapshot, BatchStatus, BatchSummary, FileDescriptor, FileStatus,
};
use relaydrive_core::UploadConfig;
use relaydrive_services::{messages, notify_logged, Notifier};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::context::Payload;
use crate::queue::UploadQueue;

const SUMMARY_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub debounce: Duration,
    pub retention: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

impl From<&UploadConfig> for BatchConfig {
    fn from(config: &UploadConfig) -> Self {
        Self {
            debounce: config.batch_debounce,
            retention: config.batch_retention,
        }
    }
}

struct BatchFile {
    descriptor: FileDescriptor,
    status: FileStatus,
    view_link: Option<String>,
    error: Option<String>,
}

struct Batch {
    id: Uuid,
    owner_id: String,
    status: BatchStatus,
    files: Vec<BatchFile>,
    started_at: DateTime<Utc>,
    started: Instant,
    completed_at: Option<DateTime<Utc>>,
    finished: Option<Instant>,
    timer: Option<JoinHandle<()>>,
}

impl Batch {
    fn new(owner_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            status: BatchStatus::Collecting,
            files: Vec::new(),
            started_at: Utc::now(),
            started: Instant::now(),
            completed_at: None,
            finished: None,
            timer: None,
        }
    }

    fn count(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }

    fn snapshot(&self) -> BatchSnapshot {
        let success_count = self.count(FileStatus::Completed);
        let failure_count = self.count(FileStatus::Failed);
        BatchSnapshot {
            id: self.id,
            owner_id: self.owner_id.clone(),
            status: self.status,
            total_files: self.files.len(),
            processed_files: success_count + failure_count,
            success_count,
            failure_count,
            started_at: self.started_at,
            completed_at: self.completed_at,
            files: self
                .files
                .iter()
                .map(|f| BatchFileSnapshot {
                    message_id: f.descriptor.message_id.clone(),
                    file_name: f.descriptor.file_name.clone(),
                    status: f.status,
                    view_link: f.view_link.clone(),
                    error: f.error.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Default)]
struct BatchState {
    batches: HashMap<Uuid, Batch>,
    /// Owner -> the batch still accepting files
    collecting: HashMap<String, Uuid>,
}

impl BatchState {
    fn reap_expired(&mut self, retention: Duration) {
        self.batches.retain(|_, b| match b.finished {
            Some(finished) => finished.elapsed() < retention,
            None => true,
        });
    }
}

struct CollectorInner {
    state: Mutex<BatchState>,
    queue: UploadQueue,
    notifier: Arc<dyn Notifier>,
    config: BatchConfig,
    summaries: broadcast::Sender<BatchSummary>,
}

#[derive(Clone)]
pub struct BatchCollector {
    inner: Arc<CollectorInner>,
}

impl BatchCollector {
    pub fn new(queue: UploadQueue, notifier: Arc<dyn Notifier>, config: BatchConfig) -> Self {
        let (summaries, _) = broadcast::channel(SUMMARY_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(CollectorInner {
                state: Mutex::new(BatchState::default()),
                queue,
                notifier,
                config,
                summaries,
            }),
        }
    }

    /// Add a file to the sender's collecting batch and restart its timer.
    /// Returns the number of files now in that batch.
    #[tracing::instrument(skip(self, descriptor), fields(file_name = %descriptor.file_name))]
    pub async fn add_file(&self, owner_id: &str, descriptor: FileDescriptor) -> usize {
        let mut state = self.inner.state.lock().await;
        state.reap_expired(self.inner.config.retention);

        let batch_id = match state.collecting.get(owner_id) {
            Some(id) => *id,
            None => {
                let batch = Batch::new(owner_id);
                let id = batch.id;
                state.batches.insert(id, batch);
                state.collecting.insert(owner_id.to_string(), id);
                tracing::info!(owner_id = %owner_id, batch_id = %id, "New batch started");
                id
            }
        };

        let inner = self.inner.clone();
        let Some(batch) = state.batches.get_mut(&batch_id) else {
            return 0;
        };
        batch.files.push(BatchFile {
            descriptor,
            status: FileStatus::Pending,
            view_link: None,
            error: None,
        });
        if let Some(timer) = batch.timer.take() {
            timer.abort();
        }
        let debounce = self.inner.config.debounce;
        batch.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            inner.fire(batch_id).await;
        }));

        tracing::debug!(
            owner_id = %owner_id,
            batch_id = %batch_id,
            batch_size = batch.files.len(),
            debounce_ms = debounce.as_millis() as u64,
            "File added to batch, timer reset"
        );
        batch.files.len()
    }

    /// The sender's collecting batch, or else their most recent one.
    pub async fn batch_status(&self, owner_id: &str) -> Option<BatchSnapshot> {
        let mut state = self.inner.state.lock().await;
        state.reap_expired(self.inner.config.retention);

        if let Some(batch) = state
            .collecting
            .get(owner_id)
            .and_then(|id| state.batches.get(id))
        {
            return Some(batch.snapshot());
        }
        state
            .batches
            .values()
            .filter(|b| b.owner_id == owner_id)
            .max_by_key(|b| b.started)
            .map(Batch::snapshot)
    }

    /// Summaries of batches as they complete
    pub fn subscribe(&self) -> broadcast::Receiver<BatchSummary> {
        self.inner.summaries.subscribe()
    }
}

impl CollectorInner {
    /// Debounce timer expired: close the batch and process it.
    async fn fire(self: Arc<Self>, batch_id: Uuid) {
        let (owner_id, files) = {
            let mut state = self.state.lock().await;
            let Some(batch) = state.batches.get_mut(&batch_id) else {
                return;
            };
            if batch.status != BatchStatus::Collecting {
                return;
            }
            batch.status = BatchStatus::Processing;
            batch.timer = None;
            let owner_id = batch.owner_id.clone();
            let files: Vec<FileDescriptor> =
                batch.files.iter().map(|f| f.descriptor.clone()).collect();
            state.collecting.remove(&owner_id);
            (owner_id, files)
        };

        tracing::info!(
            owner_id = %owner_id,
            batch_id = %batch_id,
            total_files = files.len(),
            "Batch window closed, processing"
        );

        self.process(batch_id, &owner_id, files).await;
    }

    async fn process(&self, batch_id: Uuid, owner_id: &str, files: Vec<FileDescriptor>) {
        let total = files.len();
        notify_logged(self.notifier.as_ref(), owner_id, &messages::batch_started(&files)).await;

        for (index, descriptor) in files.into_iter().enumerate() {
            let position = index + 1;
            self.set_file(batch_id, index, FileStatus::Uploading, None, None)
                .await;
            notify_logged(
                self.notifier.as_ref(),
                owner_id,
                &messages::batch_progress(position, total, &descriptor.file_name),
            )
            .await;

            let ticket = self
                .queue
                .enqueue(
                    owner_id,
                    &descriptor.file_name,
                    Payload::Attachment {
                        message_id: descriptor.message_id.clone(),
                    },
                )
                .await;

            match ticket.wait().await {
                Ok(file) => {
                    self.set_file(
                        batch_id,
                        index,
                        FileStatus::Completed,
                        Some(file.view_link.clone()),
                        None,
                    )
                    .await;
                    notify_logged(
                        self.notifier.as_ref(),
                        owner_id,
                        &messages::batch_file_succeeded(position, total, &file),
                    )
                    .await;
                }
                Err(err) => {
                    tracing::warn!(
                        owner_id = %owner_id,
                        batch_id = %batch_id,
                        file_name = %descriptor.file_name,
                        error = %err,
                        "Batch file failed"
                    );
                    self.set_file(
                        batch_id,
                        index,
                        FileStatus::Failed,
                        None,
                        Some(err.user_message.clone()),
                    )
                    .await;
                    notify_logged(
                        self.notifier.as_ref(),
                        owner_id,
                        &messages::batch_file_failed(
                            position,
                            total,
                            &descriptor.file_name,
                            &err.user_message,
                        ),
                    )
                    .await;
                }
            }
        }

        let summary = {
            let mut state = self.state.lock().await;
            let Some(batch) = state.batches.get_mut(&batch_id) else {
                return;
            };
            batch.status = BatchStatus::Completed;
            batch.completed_at = Some(Utc::now());
            batch.finished = Some(Instant::now());
            BatchSummary {
                batch_id,
                total_files: batch.files.len(),
                success_count: batch.count(FileStatus::Completed),
                failure_count: batch.count(FileStatus::Failed),
                elapsed: batch.started.elapsed(),
            }
        };

        tracing::info!(
            owner_id = %owner_id,
            batch_id = %batch_id,
            total_files = summary.total_files,
            success_count = summary.success_count,
            failure_count = summary.failure_count,
            duration_ms = summary.elapsed.as_secs_f64() * 1000.0,
            "Batch completed"
        );
        notify_logged(self.notifier.as_ref(), owner_id, &messages::batch_summary(&summary)).await;
        // No subscribers is fine.
        let _ = self.summaries.send(summary);
    }

    async fn set_file(
        &self,
        batch_id: Uuid,
        index: usize,
        status: FileStatus,
        view_link: Option<String>,
        error: Option<String>,
    ) {
        let mut state = self.state.lock().await;
        if let Some(file) = state
            .batches
            .get_mut(&batch_id)
            .and_then(|b| b.files.get_mut(index))
        {
            file.status = status;
            file.view_link = view_link;
            file.error = error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::UploadExecutor;
    use crate::queue::QueueConfig;
    use async_trait::async_trait;
    use bytes::Bytes;
    use relaydrive_core::models::{UploadStrategy, UploadedFile};
    use relaydrive_core::{UploadError, UploadResult};
    use relaydrive_infra::{ErrorTracker, PerformanceMonitor};
    use relaydrive_services::MemoryNotifier;

    /// Uploads everything except files named `bad*`.
    struct NameExecutor;

    #[async_trait]
    impl UploadExecutor for NameExecutor {
        async fn prepare(&self, file_name: &str, _payload: Payload) -> UploadResult<Bytes> {
            Ok(Bytes::from(file_name.to_string()))
        }

        async fn upload(&self, file_name: &str, data: Bytes) -> UploadResult<UploadedFile> {
            if file_name.starts_with("bad") {
                return Err(UploadError::PermissionDenied("no access".to_string()));
            }
            Ok(UploadedFile {
                id: file_name.to_string(),
                name: file_name.to_string(),
                view_link: format!("https://example.test/{file_name}"),
                mime_type: "text/plain".to_string(),
                size: data.len() as u64,
            })
        }

        fn strategy_for(&self, _byte_length: u64) -> UploadStrategy {
            UploadStrategy::Multipart
        }
    }

    fn collector(notifier: &MemoryNotifier) -> BatchCollector {
        let queue = UploadQueue::start(
            Arc::new(NameExecutor),
            QueueConfig {
                max_attempts: 1,
                inter_item_delay: Duration::from_millis(100),
                retention: Duration::from_secs(3600),
            },
            Arc::new(PerformanceMonitor::new()),
            Arc::new(ErrorTracker::new()),
        );
        BatchCollector::new(
            queue,
            Arc::new(notifier.clone()),
            BatchConfig {
                debounce: Duration::from_secs(30),
                retention: Duration::from_secs(3600),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_arrivals_extend_the_window() {
        let notifier = MemoryNotifier::new();
        let batches = collector(&notifier);

        assert_eq!(batches.add_file("u1", FileDescriptor::new("m1", "a.txt")).await, 1);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(batches.add_file("u1", FileDescriptor::new("m2", "b.txt")).await, 2);
        tokio::time::sleep(Duration::from_secs(20)).await;

        // 40s after the first file, 20s after the last: still collecting.
        let status = batches.batch_status("u1").await.unwrap();
        assert_eq!(status.status, BatchStatus::Collecting);
        assert!(notifier.sent().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_processes_in_order_and_summarizes() {
        let notifier = MemoryNotifier::new();
        let batches = collector(&notifier);
        let mut summaries = batches.subscribe();

        batches.add_file("u1", FileDescriptor::new("m1", "a.txt")).await;
        batches.add_file("u1", FileDescriptor::new("m2", "bad.txt")).await;
        batches.add_file("u1", FileDescriptor::new("m3", "c.txt")).await;

        let summary = summaries.recv().await.unwrap();
        assert_eq!(summary.total_files, 3);
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.failure_count, 1);

        let status = batches.batch_status("u1").await.unwrap();
        assert_eq!(status.status, BatchStatus::Completed);
        let names: Vec<_> = status.files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "bad.txt", "c.txt"]);
        assert_eq!(status.files[1].status, FileStatus::Failed);
        assert_eq!(
            status.files[2].view_link.as_deref(),
            Some("https://example.test/c.txt")
        );

        let texts = notifier.texts_for("u1").await;
        assert!(texts.first().unwrap().contains("Processing 3 file(s)"));
        assert!(texts.last().unwrap().contains("Batch finished"));
        assert_eq!(texts.iter().filter(|t| t.starts_with("✅")).count(), 2);
        assert_eq!(texts.iter().filter(|t| t.starts_with("❌")).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_owners_are_independent() {
        let notifier = MemoryNotifier::new();
        let batches = collector(&notifier);
        let mut summaries = batches.subscribe();

        batches.add_file("u1", FileDescriptor::new("m1", "a.txt")).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        batches.add_file("u2", FileDescriptor::new("m2", "b.txt")).await;

        let first = summaries.recv().await.unwrap();
        let second = summaries.recv().await.unwrap();
        assert_eq!(first.total_files, 1);
        assert_eq!(second.total_files, 1);
        assert_eq!(
            batches.batch_status("u1").await.unwrap().id,
            first.batch_id
        );
        assert_eq!(
            batches.batch_status("u2").await.unwrap().id,
            second.batch_id
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_batch_is_reaped() {
        let notifier = MemoryNotifier::new();
        let batches = collector(&notifier);
        let mut summaries = batches.subscribe();

        batches.add_file("u1", FileDescriptor::new("m1", "a.txt")).await;
        summaries.recv().await.unwrap();
        assert!(batches.batch_status("u1").await.is_some());

        tokio::time::sleep(Duration::from_secs(3601)).await;
        assert!(batches.batch_status("u1").await.is_none());
    }
}
