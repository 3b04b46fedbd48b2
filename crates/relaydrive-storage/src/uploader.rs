//! Strategy-selected upload with a single-request fallback
//!
//! Checks run before any network call: the size ceiling, then file
//! validation. The selected path runs under an overall deadline; when it
//! fails for any reason the fallback path gets one try under its own
//! deadline.

use bytes::Bytes;
use relaydrive_core::models::{UploadStrategy, UploadedFile};
use relaydrive_core::{
    mime_type_for, ErrorMetadata, FileValidator, UploadConfig, UploadError, UploadResult,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::strategy::{ensure_within_ceiling, primary_deadline, select_strategy, FALLBACK_DEADLINE};
use crate::{Storage, UploadRequest};

#[derive(Clone)]
pub struct Uploader {
    storage: Arc<dyn Storage>,
    config: UploadConfig,
    validator: FileValidator,
    fallback_deadline: Duration,
}

impl Uploader {
    pub fn new(storage: Arc<dyn Storage>, config: UploadConfig) -> Self {
        Self {
            validator: FileValidator::new(config.max_file_size_bytes),
            storage,
            config,
            fallback_deadline: FALLBACK_DEADLINE,
        }
    }

    pub fn with_fallback_deadline(mut self, deadline: Duration) -> Self {
        self.fallback_deadline = deadline;
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn strategy_for(&self, byte_length: u64) -> UploadStrategy {
        select_strategy(byte_length, &self.config)
    }

    #[tracing::instrument(skip(self, data), fields(size_bytes = data.len()))]
    pub async fn upload(
        &self,
        file_name: &str,
        data: Bytes,
        destination: &str,
    ) -> UploadResult<UploadedFile> {
        let size = data.len() as u64;
        ensure_within_ceiling(size, &self.config)?;

        let report = self.validator.validate(file_name, &data).into_result()?;
        if !report.warnings.is_empty() {
            tracing::warn!(
                file_name = %file_name,
                warnings = ?report.warnings,
                category = %report.category,
                "File validation warnings"
            );
        }

        let request = UploadRequest::new(file_name, mime_type_for(file_name), data, destination);
        let strategy = self.strategy_for(size);
        let deadline = primary_deadline(size);
        let start = Instant::now();

        let primary = match tokio::time::timeout(deadline, self.storage.upload(strategy, &request)).await {
            Ok(result) => result,
            Err(_) => Err(UploadError::timeout(format!("{strategy} upload"), deadline)),
        };

        let primary_err = match primary {
            Ok(file) => return Ok(file),
            Err(e) => e,
        };

        tracing::warn!(
            error = %primary_err,
            error_kind = %primary_err.kind(),
            file_name = %file_name,
            strategy = %strategy,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Primary upload failed, trying fallback"
        );

        let fallback = match tokio::time::timeout(
            self.fallback_deadline,
            self.storage.upload_simple(&request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(UploadError::timeout("Fallback upload", self.fallback_deadline)),
        };

        match fallback {
            Ok(file) => {
                tracing::info!(
                    file_name = %file_name,
                    file_id = %file.id,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Fallback upload successful"
                );
                Ok(file)
            }
            Err(fallback_err) => {
                let err = UploadError::Fallback {
                    primary: Box::new(primary_err),
                    fallback: Box::new(fallback_err),
                };
                tracing::error!(
                    error = %err,
                    error_kind = %err.kind(),
                    file_name = %file_name,
                    "Upload failed on both paths"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryStorage, UploadPath};
    use relaydrive_core::constants::MIB;
    use relaydrive_core::ErrorKind;

    fn uploader(storage: &MemoryStorage) -> Uploader {
        Uploader::new(Arc::new(storage.clone()), UploadConfig::default())
    }

    #[tokio::test]
    async fn test_small_file_uses_multipart() {
        let storage = MemoryStorage::new(8 * MIB);
        let file = uploader(&storage)
            .upload("a.txt", Bytes::from(vec![b'a'; 2 * MIB as usize]), "root")
            .await
            .unwrap();

        assert_eq!(file.name, "a.txt");
        assert_eq!(file.size, 2 * MIB);
        let calls = storage.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].path, UploadPath::Strategy(UploadStrategy::Multipart));
    }

    #[tokio::test]
    async fn test_oversize_fails_before_any_call() {
        let storage = MemoryStorage::new(8 * MIB);
        let err = uploader(&storage)
            .upload("big.bin", Bytes::from(vec![0u8; 50 * MIB as usize + 1]), "root")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::FileTooLarge);
        assert!(storage.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_file_fails_before_any_call() {
        let storage = MemoryStorage::new(8 * MIB);
        let err = uploader(&storage)
            .upload("setup.exe", Bytes::from_static(b"MZ"), "root")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert!(storage.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_after_primary_failure() {
        let storage = MemoryStorage::new(8 * MIB);
        storage
            .fail_next_primary(UploadError::SessionInitFailed("no location".to_string()))
            .await;

        let file = uploader(&storage)
            .upload("a.txt", Bytes::from_static(b"hello"), "root")
            .await
            .unwrap();

        assert_eq!(file.name, "a.txt");
        let paths: Vec<_> = storage.calls().await.iter().map(|c| c.path).collect();
        assert_eq!(
            paths,
            vec![UploadPath::Strategy(UploadStrategy::Multipart), UploadPath::Simple]
        );
    }

    #[tokio::test]
    async fn test_both_paths_failing_reports_fallback_kind() {
        let storage = MemoryStorage::new(8 * MIB);
        storage
            .fail_next_primary(UploadError::Network("reset".to_string()))
            .await;
        storage
            .fail_next_simple(UploadError::QuotaExceeded("full".to_string()))
            .await;

        let err = uploader(&storage)
            .upload("a.txt", Bytes::from_static(b"hello"), "root")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert!(matches!(err, UploadError::Fallback { .. }));
        assert!(err.to_string().contains("reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_hits_deadlines() {
        let storage = MemoryStorage::new(8 * MIB).with_latency(Duration::from_secs(120));
        let err = uploader(&storage)
            .with_fallback_deadline(Duration::from_secs(5))
            .upload("a.txt", Bytes::from_static(b"hello"), "root")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        match err {
            UploadError::Fallback { primary, .. } => {
                assert_eq!(primary.kind(), ErrorKind::Timeout);
            }
            other => panic!("expected fallback error, got {other:?}"),
        }
    }
}
