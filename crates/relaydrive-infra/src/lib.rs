//! Relaydrive Infrastructure Library
//!
//! Cross-cutting pieces shared by the worker and the CLI: tracing setup,
//! stream buffering with deadlines, upload performance counters and the
//! recent-error tracker.

pub mod buffer;
pub mod errors;
pub mod monitor;
pub mod telemetry;

pub use buffer::{bufferize, BufferOptions, ByteStream};
pub use errors::{ErrorRecord, ErrorTracker, TrackerSnapshot};
pub use monitor::{MonitorSnapshot, PerformanceMonitor, UploadTiming};
pub use telemetry::{init_telemetry, shutdown_telemetry, LogFormat};
