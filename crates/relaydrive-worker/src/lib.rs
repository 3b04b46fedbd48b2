//! Relaydrive upload worker
//!
//! The upload queue (one worker, FIFO, bounded retries), the per-sender
//! batch collector in front of it, and the relay that routes inbound
//! attachments to one or the other.

pub mod batch;
pub mod context;
pub mod pipeline;
pub mod queue;
pub mod relay;

pub use batch::{BatchCollector, BatchConfig};
pub use context::{Payload, UploadExecutor};
pub use pipeline::Pipeline;
pub use queue::{QueueConfig, QueueTicket, UploadQueue};
pub use relay::{AttachmentRelay, RelayReceipt};
