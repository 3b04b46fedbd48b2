#[cfg(feature = "storage-drive")]
use crate::drive::{ChunkSettings, DriveStorage};
#[cfg(feature = "storage-memory")]
use crate::MemoryStorage;
use crate::{Storage, StorageBackend, StorageError};
use relaydrive_core::Config;
use std::sync::Arc;

/// Create a storage backend based on configuration
pub fn create_storage(config: &Config) -> Result<Arc<dyn Storage>, StorageError> {
    match config.storage_backend() {
        #[cfg(feature = "storage-drive")]
        StorageBackend::Drive => {
            use crate::auth::StaticTokenProvider;

            let token = config.drive.access_token.clone().ok_or_else(|| {
                StorageError::ConfigError("GOOGLE_ACCESS_TOKEN not configured".to_string())
            })?;
            let storage = DriveStorage::new(
                &config.drive,
                Arc::new(StaticTokenProvider::new(token)),
                ChunkSettings::from(&config.upload),
            )?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-drive"))]
        StorageBackend::Drive => Err(StorageError::ConfigError(
            "Drive storage backend not available (storage-drive feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-memory")]
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage: uploaded files are lost on restart");
            Ok(Arc::new(MemoryStorage::new(config.upload.chunk_size_bytes)))
        }

        #[cfg(not(feature = "storage-memory"))]
        StorageBackend::Memory => Err(StorageError::ConfigError(
            "Memory storage backend not available (storage-memory feature not enabled)".to_string(),
        )),
    }
}
