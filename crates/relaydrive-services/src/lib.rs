//! Relaydrive Services Layer
//!
//! The collaborators the upload pipeline talks to but does not own: where
//! attachment bytes come from and how the sender is told what happened.
//! The LINE Messaging API client implements both.

#[cfg(feature = "line")]
pub mod line;
pub mod messages;
pub mod notifier;
pub mod source;

#[cfg(feature = "line")]
pub use line::{DownloadRetry, LineClient};
pub use notifier::{notify_logged, LogNotifier, MemoryNotifier, Notification, Notifier};
pub use source::{AttachmentSource, FileSource, MemorySource};
