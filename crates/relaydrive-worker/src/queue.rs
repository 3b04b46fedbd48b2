//! Upload queue: one worker, FIFO order, per-entry retry and completion.
//!
//! At most one entry is `processing` at any time. A failed attempt goes back
//! to the end of the line until the entry has used all of its attempts; the
//! decision looks at the attempt counter only, never at the error kind.
//!
//! Every entry completes exactly once through its [`QueueTicket`]. Buffers
//! are dropped as soon as an entry is terminal, and terminal entries are
//! purged after the retention window.
//!
//! Shutdown: [`UploadQueue::shutdown`] stops the worker between attempts; it
//! does not interrupt a running upload. Pending tickets then resolve with an
//! error.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use relaydrive_core::models::{
    EntrySnapshot, EntryStatus, OwnerQueueStatus, QueueStats, UploadOutcome, UploadedFile,
};
use relaydrive_core::{ClassifiedError, ErrorMetadata, UploadConfig, UploadError, UploadResult};
use relaydrive_infra::{ErrorTracker, PerformanceMonitor};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::context::{Payload, UploadExecutor};

const ERROR_CONTEXT: &str = "upload_queue";

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub inter_item_delay: Duration,
    pub retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

impl From<&UploadConfig> for QueueConfig {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            inter_item_delay: config.inter_item_delay,
            retention: config.queue_retention,
        }
    }
}

/// Handle on one enqueued entry
#[derive(Debug)]
pub struct QueueTicket {
    id: Uuid,
    completion: oneshot::Receiver<UploadOutcome>,
}

impl QueueTicket {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the entry to reach `completed` or `failed`.
    pub async fn wait(self) -> UploadOutcome {
        match self.completion.await {
            Ok(outcome) => outcome,
            Err(_) => Err(UploadError::Unknown("Upload queue shut down".to_string()).classify()),
        }
    }
}

struct Entry {
    id: Uuid,
    owner_id: String,
    file_name: String,
    payload: Option<Payload>,
    status: EntryStatus,
    attempts: u32,
    max_attempts: u32,
    size_bytes: Option<u64>,
    added_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    finished: Option<Instant>,
    last_error: Option<String>,
    result: Option<UploadedFile>,
    completion: Option<oneshot::Sender<UploadOutcome>>,
}

impl Entry {
    fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            id: self.id,
            owner_id: self.owner_id.clone(),
            file_name: self.file_name.clone(),
            status: self.status,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            size_bytes: self.size_bytes,
            added_at: self.added_at,
            completed_at: self.completed_at,
            last_error: self.last_error.clone(),
            result: self.result.clone(),
        }
    }

    /// Terminal transition: release the buffer and fire the completion once.
    fn finish(&mut self, status: EntryStatus, outcome: UploadOutcome) {
        self.status = status;
        self.payload = None;
        self.completed_at = Some(Utc::now());
        self.finished = Some(Instant::now());
        if let Some(tx) = self.completion.take() {
            // The caller may have stopped listening; the entry is terminal either way.
            let _ = tx.send(outcome);
        }
    }
}

#[derive(Default)]
struct QueueState {
    entries: Vec<Entry>,
    order: VecDeque<Uuid>,
    processing: bool,
    stopped: bool,
}

impl QueueState {
    fn entry_mut(&mut self, id: Uuid) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    fn purge_expired(&mut self, retention: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| match e.finished {
            Some(finished) if e.status.is_terminal() => finished.elapsed() < retention,
            _ => true,
        });
        before - self.entries.len()
    }
}

/// One attempt, taken out of the shared state
#[derive(Clone)]
struct Attempt {
    id: Uuid,
    owner_id: String,
    file_name: String,
    attempt: u32,
    max_attempts: u32,
    payload: Payload,
}

struct QueueInner {
    state: Mutex<QueueState>,
    wake: Notify,
    executor: Arc<dyn UploadExecutor>,
    config: QueueConfig,
    monitor: Arc<PerformanceMonitor>,
    errors: Arc<ErrorTracker>,
}

#[derive(Clone)]
pub struct UploadQueue {
    inner: Arc<QueueInner>,
    shutdown_tx: mpsc::Sender<()>,
}

impl UploadQueue {
    /// Create the queue and spawn its worker. Must be called inside a Tokio runtime.
    pub fn start(
        executor: Arc<dyn UploadExecutor>,
        config: QueueConfig,
        monitor: Arc<PerformanceMonitor>,
        errors: Arc<ErrorTracker>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let inner = Arc::new(QueueInner {
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            executor,
            config,
            monitor,
            errors,
        });

        let worker = inner.clone();
        tokio::spawn(async move {
            worker.run(shutdown_rx).await;
        });

        Self { inner, shutdown_tx }
    }

    /// Add a file for `owner_id`. Processing starts without further calls.
    #[tracing::instrument(skip(self, payload), fields(size_bytes = ?payload.size()))]
    pub async fn enqueue(&self, owner_id: &str, file_name: &str, payload: Payload) -> QueueTicket {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();
        let entry = Entry {
            id,
            owner_id: owner_id.to_string(),
            file_name: file_name.to_string(),
            size_bytes: payload.size(),
            payload: Some(payload),
            status: EntryStatus::Pending,
            attempts: 0,
            max_attempts: self.inner.config.max_attempts,
            added_at: Utc::now(),
            completed_at: None,
            finished: None,
            last_error: None,
            result: None,
            completion: Some(tx),
        };

        let depth = {
            let mut state = self.inner.state.lock().await;
            if state.stopped {
                tracing::warn!(file_name = %file_name, "Upload queue is shut down, entry rejected");
                return QueueTicket { id, completion: rx };
            }
            state.entries.push(entry);
            state.order.push_back(id);
            state.order.len()
        };
        self.inner.wake.notify_one();

        tracing::info!(
            entry_id = %id,
            owner_id = %owner_id,
            file_name = %file_name,
            queue_depth = depth,
            "File added to upload queue"
        );

        QueueTicket { id, completion: rx }
    }

    pub async fn stats(&self) -> QueueStats {
        let mut state = self.inner.state.lock().await;
        state.purge_expired(self.inner.config.retention);
        let mut stats = QueueStats {
            is_processing: state.processing,
            ..QueueStats::default()
        };
        for entry in &state.entries {
            stats.count(entry.status);
        }
        stats
    }

    pub async fn owner_status(&self, owner_id: &str) -> OwnerQueueStatus {
        let mut state = self.inner.state.lock().await;
        state.purge_expired(self.inner.config.retention);
        let files = state
            .entries
            .iter()
            .filter(|e| e.owner_id == owner_id)
            .map(Entry::snapshot)
            .collect();
        OwnerQueueStatus::from_entries(owner_id, files)
    }

    pub async fn entry(&self, id: Uuid) -> Option<EntrySnapshot> {
        let state = self.inner.state.lock().await;
        state.entries.iter().find(|e| e.id == id).map(Entry::snapshot)
    }

    /// Drop terminal entries older than the retention window.
    pub async fn purge_expired(&self) -> usize {
        self.inner
            .state
            .lock()
            .await
            .purge_expired(self.inner.config.retention)
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.inner.monitor
    }

    pub fn errors(&self) -> &Arc<ErrorTracker> {
        &self.inner.errors
    }

    /// Stop the worker after the current attempt.
    pub async fn shutdown(&self) {
        if let Err(e) = self.shutdown_tx.send(()).await {
            tracing::debug!(error = %e, "Upload queue worker already stopped");
        }
    }
}

impl QueueInner {
    async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        tracing::info!(
            max_attempts = self.config.max_attempts,
            inter_item_delay_ms = self.config.inter_item_delay.as_millis() as u64,
            "Upload queue worker started"
        );

        loop {
            let next = self.take_next().await;
            let attempt = match next {
                Some(attempt) => attempt,
                None => {
                    tokio::select! {
                        _ = self.wake.notified() => continue,
                        _ = shutdown_rx.recv() => break,
                    }
                }
            };

            self.process(attempt).await;

            let more = !self.state.lock().await.order.is_empty();
            if more {
                tokio::select! {
                    _ = sleep(self.config.inter_item_delay) => {}
                    _ = shutdown_rx.recv() => break,
                }
            }
        }

        let abandoned = self.stop().await;
        tracing::info!(abandoned = abandoned, "Upload queue worker stopped");
    }

    /// Fail everything still pending so no ticket waits forever.
    async fn stop(&self) -> usize {
        let mut state = self.state.lock().await;
        state.stopped = true;
        state.processing = false;
        state.order.clear();
        let mut abandoned = 0;
        for entry in state.entries.iter_mut().filter(|e| !e.status.is_terminal()) {
            let err = UploadError::Unknown("Upload queue shut down".to_string());
            entry.last_error = Some(err.to_string());
            entry.finish(EntryStatus::Failed, Err(err.classify()));
            abandoned += 1;
        }
        abandoned
    }

    /// Move the oldest pending entry to `processing`.
    async fn take_next(&self) -> Option<Attempt> {
        let mut state = self.state.lock().await;
        let purged = state.purge_expired(self.config.retention);
        if purged > 0 {
            tracing::debug!(purged = purged, "Purged expired queue entries");
        }

        while let Some(id) = state.order.pop_front() {
            let Some(entry) = state.entry_mut(id) else {
                continue;
            };
            if entry.status != EntryStatus::Pending {
                continue;
            }
            let Some(payload) = entry.payload.clone() else {
                continue;
            };

            entry.status = EntryStatus::Processing;
            entry.attempts += 1;
            let attempt = Attempt {
                id,
                owner_id: entry.owner_id.clone(),
                file_name: entry.file_name.clone(),
                attempt: entry.attempts,
                max_attempts: entry.max_attempts,
                payload,
            };
            state.processing = true;
            return Some(attempt);
        }

        state.processing = false;
        None
    }

    async fn process(self: &Arc<Self>, attempt: Attempt) {
        tracing::info!(
            entry_id = %attempt.id,
            owner_id = %attempt.owner_id,
            file_name = %attempt.file_name,
            attempt = attempt.attempt,
            max_attempts = attempt.max_attempts,
            "Processing upload"
        );

        let worker = self.clone();
        let task_attempt = attempt.clone();
        let outcome = match tokio::spawn(async move { worker.execute(&task_attempt).await }).await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(entry_id = %attempt.id, error = %e, "Upload task panicked");
                (
                    Err(UploadError::Unknown("Upload task panicked".to_string())),
                    None,
                )
            }
        };

        self.settle(attempt, outcome).await;
    }

    /// Run one attempt. Also returns the buffer when one was produced, so a
    /// retry does not fetch the attachment again.
    async fn execute(&self, attempt: &Attempt) -> (UploadResult<UploadedFile>, Option<Bytes>) {
        let data = match self
            .executor
            .prepare(&attempt.file_name, attempt.payload.clone())
            .await
        {
            Ok(data) => data,
            Err(e) => return (Err(e), None),
        };

        let size = data.len() as u64;
        if let Some(entry) = self.state.lock().await.entry_mut(attempt.id) {
            entry.size_bytes = Some(size);
        }

        let strategy = self.executor.strategy_for(size);
        let timing = self
            .monitor
            .start_upload(&attempt.file_name, size, strategy.to_string());
        let result = self.executor.upload(&attempt.file_name, data.clone()).await;
        self.monitor
            .complete_upload(timing, result.as_ref().err().map(|e| e.kind()));

        (result, Some(data))
    }

    async fn settle(&self, attempt: Attempt, outcome: (UploadResult<UploadedFile>, Option<Bytes>)) {
        let (result, buffer) = outcome;
        let mut state = self.state.lock().await;
        let requeue = {
            let Some(entry) = state.entry_mut(attempt.id) else {
                tracing::warn!(entry_id = %attempt.id, "Entry vanished while processing");
                return;
            };

            match result {
                Ok(file) => {
                    tracing::info!(
                        entry_id = %entry.id,
                        owner_id = %entry.owner_id,
                        file_name = %entry.file_name,
                        file_id = %file.id,
                        attempt = entry.attempts,
                        "Upload completed"
                    );
                    entry.result = Some(file.clone());
                    entry.finish(EntryStatus::Completed, Ok(file));
                    false
                }
                Err(e) if entry.attempts < entry.max_attempts => {
                    tracing::warn!(
                        entry_id = %entry.id,
                        file_name = %entry.file_name,
                        error = %e,
                        error_kind = %e.kind(),
                        attempt = entry.attempts,
                        max_attempts = entry.max_attempts,
                        "Upload attempt failed, will retry"
                    );
                    entry.last_error = Some(e.to_string());
                    entry.status = EntryStatus::Pending;
                    if let Some(data) = buffer {
                        entry.payload = Some(Payload::Buffer(data));
                    }
                    true
                }
                Err(e) => {
                    let classified: ClassifiedError = self.errors.record(&e, ERROR_CONTEXT);
                    tracing::error!(
                        entry_id = %entry.id,
                        owner_id = %entry.owner_id,
                        file_name = %entry.file_name,
                        error = %e,
                        error_kind = %classified.kind,
                        attempts = entry.attempts,
                        "Upload failed permanently"
                    );
                    entry.last_error = Some(e.to_string());
                    entry.finish(EntryStatus::Failed, Err(classified));
                    false
                }
            }
        };

        // Behind anything that arrived while this attempt ran.
        if requeue {
            state.order.push_back(attempt.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relaydrive_core::models::UploadStrategy;
    use relaydrive_core::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` uploads, then succeeds.
    struct FlakyExecutor {
        failures: u32,
        calls: AtomicU32,
        fetches: AtomicU32,
        log: std::sync::Mutex<Vec<String>>,
    }

    impl FlakyExecutor {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
                fetches: AtomicU32::new(0),
                log: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl UploadExecutor for FlakyExecutor {
        async fn prepare(&self, _file_name: &str, payload: Payload) -> UploadResult<Bytes> {
            match payload {
                Payload::Buffer(data) => Ok(data),
                Payload::Attachment { .. } => {
                    self.fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(Bytes::from_static(b"fetched"))
                }
            }
        }

        async fn upload(&self, file_name: &str, data: Bytes) -> UploadResult<UploadedFile> {
            self.log.lock().unwrap().push(file_name.to_string());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(UploadError::Network(format!("reset #{call}")));
            }
            if file_name == "panic.txt" {
                panic!("executor bug");
            }
            Ok(UploadedFile {
                id: format!("id-{call}"),
                name: file_name.to_string(),
                view_link: format!("https://example.test/{call}"),
                mime_type: "text/plain".to_string(),
                size: data.len() as u64,
            })
        }

        fn strategy_for(&self, _byte_length: u64) -> UploadStrategy {
            UploadStrategy::Multipart
        }
    }

    fn start(executor: Arc<FlakyExecutor>) -> UploadQueue {
        UploadQueue::start(
            executor,
            QueueConfig {
                max_attempts: 3,
                inter_item_delay: Duration::from_secs(1),
                retention: Duration::from_secs(3600),
            },
            Arc::new(PerformanceMonitor::new()),
            Arc::new(ErrorTracker::new()),
        )
    }

    fn buffer(text: &'static str) -> Payload {
        Payload::Buffer(Bytes::from_static(text.as_bytes()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_completes_and_releases_buffer() {
        let queue = start(FlakyExecutor::new(0));
        let ticket = queue.enqueue("u1", "a.txt", buffer("hello")).await;
        let id = ticket.id();

        let file = ticket.wait().await.unwrap();
        assert_eq!(file.name, "a.txt");
        assert_eq!(file.size, 5);

        let entry = queue.entry(id).await.unwrap();
        assert_eq!(entry.status, EntryStatus::Completed);
        assert_eq!(entry.attempts, 1);
        assert!(entry.completed_at.is_some());
        let state = queue.inner.state.lock().await;
        assert!(state.entries[0].payload.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_entry_stops_at_max_attempts() {
        let executor = FlakyExecutor::new(u32::MAX);
        let queue = start(executor.clone());

        let ticket = queue.enqueue("u1", "a.txt", buffer("hello")).await;
        let id = ticket.id();
        let err = ticket.wait().await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Network);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
        let entry = queue.entry(id).await.unwrap();
        assert_eq!(entry.status, EntryStatus::Failed);
        assert_eq!(entry.attempts, 3);
        assert!(entry.last_error.unwrap().contains("reset #2"));
        assert_eq!(queue.errors().occurrences(ErrorKind::Network, "upload_queue"), 1);

        // Nothing further happens to a terminal entry.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_goes_behind_newer_entries() {
        let executor = FlakyExecutor::new(1);
        let queue = start(executor.clone());

        let first = queue.enqueue("u1", "first.txt", buffer("1")).await;
        let second = queue.enqueue("u1", "second.txt", buffer("2")).await;

        assert!(first.wait().await.is_ok());
        assert!(second.wait().await.is_ok());
        let log = executor.log.lock().unwrap().clone();
        assert_eq!(log, vec!["first.txt", "second.txt", "first.txt"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_reuses_prepared_buffer() {
        let executor = FlakyExecutor::new(2);
        let queue = start(executor.clone());

        let ticket = queue
            .enqueue(
                "u1",
                "a.bin",
                Payload::Attachment {
                    message_id: "m1".to_string(),
                },
            )
            .await;
        assert!(ticket.wait().await.is_ok());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_contained_to_the_entry() {
        let executor = FlakyExecutor::new(0);
        let queue = start(executor.clone());

        let bad = queue.enqueue("u1", "panic.txt", buffer("x")).await;
        let good = queue.enqueue("u1", "ok.txt", buffer("y")).await;

        let err = bad.wait().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert!(good.wait().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_and_owner_status() {
        let queue = start(FlakyExecutor::new(0));
        let a = queue.enqueue("u1", "a.txt", buffer("a")).await;
        let b = queue.enqueue("u2", "b.txt", buffer("b")).await;
        a.wait().await.unwrap();
        b.wait().await.unwrap();

        let stats = queue.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 2);
        assert!(!stats.is_processing);

        let owner = queue.owner_status("u1").await;
        assert_eq!(owner.total, 1);
        assert_eq!(owner.files[0].file_name, "a.txt");
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_entries_purged_after_retention() {
        let queue = start(FlakyExecutor::new(0));
        queue
            .enqueue("u1", "a.txt", buffer("a"))
            .await
            .wait()
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1800)).await;
        assert_eq!(queue.stats().await.total, 1);

        tokio::time::sleep(Duration::from_secs(1801)).await;
        assert_eq!(queue.purge_expired().await, 1);
        assert_eq!(queue.stats().await.total, 0);
    }

    /// Upload that never finishes.
    struct StalledExecutor;

    #[async_trait]
    impl UploadExecutor for StalledExecutor {
        async fn prepare(&self, _file_name: &str, payload: Payload) -> UploadResult<Bytes> {
            match payload {
                Payload::Buffer(data) => Ok(data),
                Payload::Attachment { .. } => Ok(Bytes::new()),
            }
        }

        async fn upload(&self, _file_name: &str, _data: Bytes) -> UploadResult<UploadedFile> {
            std::future::pending().await
        }

        fn strategy_for(&self, _byte_length: u64) -> UploadStrategy {
            UploadStrategy::Multipart
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_keeps_pending_and_processing_entries() {
        let queue = UploadQueue::start(
            Arc::new(StalledExecutor),
            QueueConfig {
                max_attempts: 3,
                inter_item_delay: Duration::from_secs(1),
                retention: Duration::from_secs(3600),
            },
            Arc::new(PerformanceMonitor::new()),
            Arc::new(ErrorTracker::new()),
        );
        let _first = queue.enqueue("u1", "a.txt", buffer("a")).await;
        let _second = queue.enqueue("u1", "b.txt", buffer("b")).await;

        tokio::time::sleep(Duration::from_secs(7300)).await;
        assert_eq!(queue.purge_expired().await, 0);

        let stats = queue.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.processing, 1);
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_resolves_tickets() {
        let queue = start(FlakyExecutor::new(0));
        queue.shutdown().await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let ticket = queue.enqueue("u1", "late.txt", buffer("z")).await;
        let err = ticket.wait().await.unwrap_err();
        assert!(err.technical_message.contains("shut down"));
        assert_eq!(queue.stats().await.total, 0);
    }
}
