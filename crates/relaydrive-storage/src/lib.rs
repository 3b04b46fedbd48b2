//! Relaydrive Storage Library
//!
//! This crate provides the storage abstraction and its backends: a
//! Google-Drive-compatible REST client and an in-memory store. On top of
//! them, [`Uploader`] picks a strategy by size, enforces the size ceiling and
//! falls back to a single-request upload when the selected path fails.

pub mod auth;
#[cfg(feature = "storage-drive")]
pub mod drive;
pub mod factory;
#[cfg(feature = "storage-memory")]
pub mod memory;
pub mod strategy;
pub mod traits;
pub mod uploader;

// Re-export commonly used types
pub use auth::{StaticTokenProvider, TokenProvider};
#[cfg(feature = "storage-drive")]
pub use drive::DriveStorage;
pub use factory::create_storage;
#[cfg(feature = "storage-memory")]
pub use memory::MemoryStorage;
pub use relaydrive_core::StorageBackend;
pub use strategy::select_strategy;
pub use traits::{Storage, StorageError, StorageResult, UploadRequest};
pub use uploader::Uploader;
