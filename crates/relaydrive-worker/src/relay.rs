//! Attachment ingestion
//!
//! Entry point for every inbound attachment. With batching enabled the file
//! joins the sender's batch; otherwise it goes straight to the upload queue
//! and the sender hears back when it completes.

use relaydrive_core::models::FileDescriptor;
use relaydrive_services::{messages, notify_logged, Notifier};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::batch::BatchCollector;
use crate::context::Payload;
use crate::queue::UploadQueue;

/// What happened to an inbound attachment
#[derive(Debug)]
pub enum RelayReceipt {
    /// Held in the sender's batch, which now has `batch_size` files
    Batched { batch_size: usize },
    /// Enqueued directly; `notified` finishes once the sender was told the outcome
    Queued {
        entry_id: Uuid,
        notified: JoinHandle<()>,
    },
}

#[derive(Clone)]
pub struct AttachmentRelay {
    queue: UploadQueue,
    batches: Option<BatchCollector>,
    notifier: Arc<dyn Notifier>,
}

impl AttachmentRelay {
    /// `batches: None` selects direct mode.
    pub fn new(
        queue: UploadQueue,
        batches: Option<BatchCollector>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            queue,
            batches,
            notifier,
        }
    }

    pub fn queue(&self) -> &UploadQueue {
        &self.queue
    }

    pub fn batches(&self) -> Option<&BatchCollector> {
        self.batches.as_ref()
    }

    #[tracing::instrument(skip(self))]
    pub async fn handle_attachment(
        &self,
        owner_id: &str,
        message_id: &str,
        file_name: &str,
    ) -> RelayReceipt {
        if let Some(batches) = &self.batches {
            let batch_size = batches
                .add_file(owner_id, FileDescriptor::new(message_id, file_name))
                .await;
            notify_logged(
                self.notifier.as_ref(),
                owner_id,
                &messages::file_queued(file_name, batch_size),
            )
            .await;
            return RelayReceipt::Batched { batch_size };
        }

        let ticket = self
            .queue
            .enqueue(
                owner_id,
                file_name,
                Payload::Attachment {
                    message_id: message_id.to_string(),
                },
            )
            .await;
        let entry_id = ticket.id();

        let status = self.queue.owner_status(owner_id).await;
        if status.total > 1 {
            notify_logged(
                self.notifier.as_ref(),
                owner_id,
                &messages::queue_status(&status),
            )
            .await;
        }

        let notifier = self.notifier.clone();
        let owner = owner_id.to_string();
        let name = file_name.to_string();
        let notified = tokio::spawn(async move {
            let text = match ticket.wait().await {
                Ok(file) => messages::upload_succeeded(&file),
                Err(err) => messages::upload_failed(&name, &err),
            };
            notify_logged(notifier.as_ref(), &owner, &text).await;
        });

        RelayReceipt::Queued { entry_id, notified }
    }
}
