//! End-to-end flows through the queue, the batch collector and the relay,
//! backed by in-memory storage and attachment sources.

use bytes::Bytes;
use relaydrive_core::constants::MIB;
use relaydrive_core::models::{BatchStatus, EntryStatus, UploadStrategy};
use relaydrive_core::{ErrorKind, UploadConfig, UploadError};
use relaydrive_infra::{ErrorTracker, PerformanceMonitor};
use relaydrive_services::{MemoryNotifier, MemorySource};
use relaydrive_storage::memory::UploadPath;
use relaydrive_storage::{MemoryStorage, Uploader};
use relaydrive_worker::{
    AttachmentRelay, BatchCollector, BatchConfig, Payload, Pipeline, QueueConfig, RelayReceipt,
    UploadQueue,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const READ_CHUNK: usize = 64 * 1024;

struct Harness {
    storage: MemoryStorage,
    source: MemorySource,
    notifier: MemoryNotifier,
    queue: UploadQueue,
}

impl Harness {
    fn new() -> Self {
        let config = UploadConfig::default();
        let storage = MemoryStorage::new(config.chunk_size_bytes);
        let source = MemorySource::new();
        let pipeline = Pipeline::new(Uploader::new(Arc::new(storage.clone()), config.clone()), "root")
            .with_source(Arc::new(source.clone()));
        let queue = UploadQueue::start(
            Arc::new(pipeline),
            QueueConfig::from(&config),
            Arc::new(PerformanceMonitor::new()),
            Arc::new(ErrorTracker::new()),
        );
        Self {
            storage,
            source,
            notifier: MemoryNotifier::new(),
            queue,
        }
    }

    fn batches(&self) -> BatchCollector {
        BatchCollector::new(
            self.queue.clone(),
            Arc::new(self.notifier.clone()),
            BatchConfig::default(),
        )
    }

    async fn attachment(&self, message_id: &str, size: usize) {
        self.source
            .insert(message_id, Bytes::from(vec![b'x'; size]), READ_CHUNK)
            .await;
    }
}

fn attachment(message_id: &str) -> Payload {
    Payload::Attachment {
        message_id: message_id.to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_small_file_uses_multipart() {
    let harness = Harness::new();
    harness.attachment("m1", 2 * MIB as usize).await;

    let ticket = harness.queue.enqueue("u1", "a.txt", attachment("m1")).await;
    let file = assert_ok!(ticket.wait().await);
    assert_eq!(file.size, 2 * MIB);

    let calls = harness.storage.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, UploadPath::Strategy(UploadStrategy::Multipart));
    assert!(calls[0].succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_large_file_is_sent_in_chunks() {
    let harness = Harness::new();
    harness.attachment("m1", 40 * MIB as usize).await;

    let file = harness
        .queue
        .enqueue("u1", "video.txt", attachment("m1"))
        .await
        .wait()
        .await
        .unwrap();

    let calls = harness.storage.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].path,
        UploadPath::Strategy(UploadStrategy::ChunkedResumable)
    );
    assert_eq!(calls[0].chunk_sizes, vec![8 * MIB; 5]);
    assert_eq!(
        harness.storage.content(&file.id).await.unwrap().len(),
        40 * MIB as usize
    );
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_download_fails_after_max_attempts() {
    let harness = Harness::new();
    harness
        .source
        .insert_failing(
            "m1",
            Bytes::from(vec![b'x'; 10 * MIB as usize]),
            READ_CHUNK,
            MIB as usize,
            UploadError::Network("connection reset".to_string()),
        )
        .await;

    let ticket = harness.queue.enqueue("u1", "report.txt", attachment("m1")).await;
    let id = ticket.id();
    let err = assert_err!(ticket.wait().await);

    assert_eq!(err.kind, ErrorKind::Network);
    assert!(err.retryable);
    assert_eq!(harness.source.fetch_count("m1").await, 3);
    assert!(harness.storage.calls().await.is_empty());

    let entry = harness.queue.entry(id).await.unwrap();
    assert_eq!(entry.status, EntryStatus::Failed);
    assert_eq!(entry.attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn test_each_entry_completes_exactly_once() {
    let harness = Harness::new();
    let mut tickets = Vec::new();
    for i in 0..4 {
        let id = format!("m{i}");
        harness.attachment(&id, 1024).await;
        tickets.push(
            harness
                .queue
                .enqueue("u1", &format!("file{i}.txt"), attachment(&id))
                .await,
        );
    }

    for ticket in tickets {
        ticket.wait().await.unwrap();
    }

    assert_eq!(harness.storage.file_count().await, 4);
    assert_eq!(harness.storage.calls().await.len(), 4);
    let stats = harness.queue.stats().await;
    assert_eq!(stats.completed, 4);
    assert_eq!(stats.pending + stats.processing + stats.failed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_batch_runs_once_then_late_arrival_opens_new_batch() {
    let harness = Harness::new();
    let batches = harness.batches();
    let mut summaries = batches.subscribe();

    for (i, name) in ["one.txt", "two.txt", "three.txt"].iter().enumerate() {
        let id = format!("m{i}");
        harness.attachment(&id, 2048).await;
        batches
            .add_file("u1", relaydrive_core::models::FileDescriptor::new(id, *name))
            .await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    let first = summaries.recv().await.unwrap();
    assert_eq!(first.total_files, 3);
    assert_eq!(first.success_count, 3);

    let names: Vec<_> = harness
        .storage
        .calls()
        .await
        .into_iter()
        .map(|c| c.file_name)
        .collect();
    assert_eq!(names, vec!["one.txt", "two.txt", "three.txt"]);

    harness.attachment("m9", 2048).await;
    let size = batches
        .add_file("u1", relaydrive_core::models::FileDescriptor::new("m9", "late.txt"))
        .await;
    assert_eq!(size, 1);

    let current = batches.batch_status("u1").await.unwrap();
    assert_eq!(current.status, BatchStatus::Collecting);
    assert_ne!(current.id, first.batch_id);

    let second = summaries.recv().await.unwrap();
    assert_eq!(second.total_files, 1);
    assert_eq!(harness.storage.file_count().await, 4);
}

#[tokio::test(start_paused = true)]
async fn test_relay_direct_mode_reports_each_upload() {
    let harness = Harness::new();
    harness.attachment("m1", 1024).await;
    harness.attachment("m2", 1024).await;
    let relay = AttachmentRelay::new(
        harness.queue.clone(),
        None,
        Arc::new(harness.notifier.clone()),
    );

    let mut handles = Vec::new();
    for (id, name) in [("m1", "a.txt"), ("m2", "b.txt")] {
        match relay.handle_attachment("u1", id, name).await {
            RelayReceipt::Queued { notified, .. } => handles.push(notified),
            other => panic!("expected direct enqueue, got {other:?}"),
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let texts = harness.notifier.texts_for("u1").await;
    assert_eq!(texts.iter().filter(|t| t.starts_with("📊")).count(), 1);
    assert!(texts.iter().any(|t| t.starts_with("✅ Uploaded a.txt")));
    assert!(texts.iter().any(|t| t.starts_with("✅ Uploaded b.txt")));
}

#[tokio::test(start_paused = true)]
async fn test_relay_direct_mode_reports_failure() {
    let harness = Harness::new();
    let relay = AttachmentRelay::new(
        harness.queue.clone(),
        None,
        Arc::new(harness.notifier.clone()),
    );

    let RelayReceipt::Queued { notified, .. } =
        relay.handle_attachment("u1", "missing", "a.txt").await
    else {
        panic!("expected direct enqueue");
    };
    notified.await.unwrap();

    let texts = harness.notifier.texts_for("u1").await;
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("❌ Could not upload a.txt"));
}

#[tokio::test(start_paused = true)]
async fn test_relay_batch_mode_acknowledges_arrivals() {
    let harness = Harness::new();
    harness.attachment("m1", 1024).await;
    harness.attachment("m2", 1024).await;
    let batches = harness.batches();
    let mut summaries = batches.subscribe();
    let relay = AttachmentRelay::new(
        harness.queue.clone(),
        Some(batches),
        Arc::new(harness.notifier.clone()),
    );

    assert!(matches!(
        relay.handle_attachment("u1", "m1", "a.txt").await,
        RelayReceipt::Batched { batch_size: 1 }
    ));
    assert!(matches!(
        relay.handle_attachment("u1", "m2", "b.txt").await,
        RelayReceipt::Batched { batch_size: 2 }
    ));

    let summary = summaries.recv().await.unwrap();
    assert_eq!(summary.success_count, 2);

    let texts = harness.notifier.texts_for("u1").await;
    assert!(texts[0].starts_with("📥 Received a.txt (file 1"));
    assert!(texts[1].starts_with("📥 Received b.txt (file 2"));
    assert!(texts.last().unwrap().contains("Batch finished"));
}
