//! Relaydrive Core Library
//!
//! This crate provides the error taxonomy, configuration, shared models and
//! file validation used by every relaydrive component.

pub mod config;
pub mod constants;
pub mod error;
pub mod mime;
pub mod models;
pub mod storage_types;
pub mod validation;

// Re-export commonly used types
pub use config::{Config, DriveConfig, LineConfig, UploadConfig};
pub use error::{
    classify_message, ClassifiedError, ErrorKind, ErrorMetadata, LogLevel, UploadError,
    UploadResult,
};
pub use mime::mime_type_for;
pub use storage_types::StorageBackend;
pub use validation::{FileReport, FileValidator};
