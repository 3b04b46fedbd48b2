//! Sender notifications
//!
//! Notifications are fire-and-forget: a failed delivery is logged and never
//! changes the outcome of an upload.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &str, text: &str) -> anyhow::Result<()>;
}

/// Deliver `text`, logging instead of returning a delivery failure.
pub async fn notify_logged(notifier: &dyn Notifier, recipient: &str, text: &str) {
    if let Err(e) = notifier.notify(recipient, text).await {
        tracing::warn!(
            recipient = %recipient,
            error = %e,
            "Failed to deliver notification"
        );
    }
}

/// Writes notifications to the log; used when no messaging channel is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipient: &str, text: &str) -> anyhow::Result<()> {
        tracing::info!(recipient = %recipient, message = %text, "Notification");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: String,
    pub text: String,
}

/// Keeps every notification in memory, in delivery order.
#[derive(Clone, Default)]
pub struct MemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing: bool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every delivery fails (nothing is recorded).
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }

    pub async fn texts_for(&self, recipient: &str) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|n| n.recipient == recipient)
            .map(|n| n.text.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, recipient: &str, text: &str) -> anyhow::Result<()> {
        if self.failing {
            anyhow::bail!("notification channel unavailable");
        }
        self.sent.lock().await.push(Notification {
            recipient: recipient.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}
