//! Configuration module
//!
//! Upload tunables, the storage backend and the messaging collaborator are
//! read from the environment (after loading `.env`), with defaults for
//! everything that has a sensible one.

use std::env;
use std::time::Duration;

use crate::constants::{CHUNK_GRANULARITY, DEFAULT_DESTINATION, MIB};
use crate::storage_types::StorageBackend;

const MAX_FILE_SIZE_MB: u64 = 50;
const MULTIPART_THRESHOLD_MB: u64 = 5;
const CHUNKED_THRESHOLD_MB: u64 = 25;
const CHUNK_SIZE_MB: u64 = 8;
const UPLOAD_MAX_ATTEMPTS: u32 = 3;
const QUEUE_INTER_ITEM_DELAY_MS: u64 = 1000;
const BATCH_DEBOUNCE_SECS: u64 = 30;
const QUEUE_RETENTION_SECS: u64 = 3600;
const BATCH_RETENTION_SECS: u64 = 3600;
const BUFFER_TIMEOUT_SECS: u64 = 60;
const BUFFER_STALL_WARNING_SECS: u64 = 20;
const CHUNK_RETRY_DELAY_MS: u64 = 2000;
const CHUNK_MAX_RETRIES: u32 = 3;

const DRIVE_API_URL: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3";
const LINE_API_URL: &str = "https://api.line.me";
const LINE_DATA_API_URL: &str = "https://api-data.line.me";

/// Tunables of the upload pipeline
#[derive(Clone, Debug, PartialEq)]
pub struct UploadConfig {
    /// Hard ceiling for a single file, enforced before any network call.
    pub max_file_size_bytes: u64,
    /// Below this size the multipart strategy is used.
    pub multipart_threshold_bytes: u64,
    /// Above this size the resumable upload is split into chunks.
    pub chunked_threshold_bytes: u64,
    pub chunk_size_bytes: u64,
    pub max_attempts: u32,
    pub inter_item_delay: Duration,
    pub batch_debounce: Duration,
    pub queue_retention: Duration,
    pub batch_retention: Duration,
    pub buffer_timeout: Duration,
    pub buffer_stall_warning: Duration,
    pub chunk_retry_delay: Duration,
    pub chunk_max_retries: u32,
    pub batch_enabled: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: MAX_FILE_SIZE_MB * MIB,
            multipart_threshold_bytes: MULTIPART_THRESHOLD_MB * MIB,
            chunked_threshold_bytes: CHUNKED_THRESHOLD_MB * MIB,
            chunk_size_bytes: CHUNK_SIZE_MB * MIB,
            max_attempts: UPLOAD_MAX_ATTEMPTS,
            inter_item_delay: Duration::from_millis(QUEUE_INTER_ITEM_DELAY_MS),
            batch_debounce: Duration::from_secs(BATCH_DEBOUNCE_SECS),
            queue_retention: Duration::from_secs(QUEUE_RETENTION_SECS),
            batch_retention: Duration::from_secs(BATCH_RETENTION_SECS),
            buffer_timeout: Duration::from_secs(BUFFER_TIMEOUT_SECS),
            buffer_stall_warning: Duration::from_secs(BUFFER_STALL_WARNING_SECS),
            chunk_retry_delay: Duration::from_millis(CHUNK_RETRY_DELAY_MS),
            chunk_max_retries: CHUNK_MAX_RETRIES,
            batch_enabled: true,
        }
    }
}

impl UploadConfig {
    pub fn from_env() -> Self {
        let mb = |key: &str, default: u64| env_parse(key, default) * MIB;
        let ms = |key: &str, default: u64| Duration::from_millis(env_parse(key, default));
        let secs = |key: &str, default: u64| Duration::from_secs(env_parse(key, default));

        Self {
            max_file_size_bytes: mb("MAX_FILE_SIZE_MB", MAX_FILE_SIZE_MB),
            multipart_threshold_bytes: mb("MULTIPART_THRESHOLD_MB", MULTIPART_THRESHOLD_MB),
            chunked_threshold_bytes: mb("CHUNKED_THRESHOLD_MB", CHUNKED_THRESHOLD_MB),
            chunk_size_bytes: mb("CHUNK_SIZE_MB", CHUNK_SIZE_MB),
            max_attempts: env_parse("UPLOAD_MAX_ATTEMPTS", UPLOAD_MAX_ATTEMPTS),
            inter_item_delay: ms("QUEUE_INTER_ITEM_DELAY_MS", QUEUE_INTER_ITEM_DELAY_MS),
            batch_debounce: secs("BATCH_DEBOUNCE_SECS", BATCH_DEBOUNCE_SECS),
            queue_retention: secs("QUEUE_RETENTION_SECS", QUEUE_RETENTION_SECS),
            batch_retention: secs("BATCH_RETENTION_SECS", BATCH_RETENTION_SECS),
            buffer_timeout: secs("BUFFER_TIMEOUT_SECS", BUFFER_TIMEOUT_SECS),
            buffer_stall_warning: secs("BUFFER_STALL_WARNING_SECS", BUFFER_STALL_WARNING_SECS),
            chunk_retry_delay: ms("CHUNK_RETRY_DELAY_MS", CHUNK_RETRY_DELAY_MS),
            chunk_max_retries: env_parse("CHUNK_MAX_RETRIES", CHUNK_MAX_RETRIES),
            batch_enabled: env_parse("BATCH_ENABLED", true),
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.max_file_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_FILE_SIZE_MB must be greater than 0"));
        }

        if self.multipart_threshold_bytes > self.chunked_threshold_bytes {
            return Err(anyhow::anyhow!(
                "MULTIPART_THRESHOLD_MB must not exceed CHUNKED_THRESHOLD_MB"
            ));
        }

        if self.chunk_size_bytes == 0 || self.chunk_size_bytes % CHUNK_GRANULARITY != 0 {
            return Err(anyhow::anyhow!(
                "CHUNK_SIZE_MB must be a positive multiple of 256 KiB"
            ));
        }

        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("UPLOAD_MAX_ATTEMPTS must be at least 1"));
        }

        if self.buffer_timeout.is_zero() {
            return Err(anyhow::anyhow!("BUFFER_TIMEOUT_SECS must be greater than 0"));
        }

        Ok(())
    }
}

/// Storage backend configuration
#[derive(Clone, Debug)]
pub struct DriveConfig {
    pub backend: StorageBackend,
    /// Folder files are created in unless a destination is given.
    pub folder_id: String,
    pub access_token: Option<String>,
    pub api_url: String,
    pub upload_url: String,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Drive,
            folder_id: DEFAULT_DESTINATION.to_string(),
            access_token: None,
            api_url: DRIVE_API_URL.to_string(),
            upload_url: DRIVE_UPLOAD_URL.to_string(),
        }
    }
}

impl DriveConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let backend = match env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse::<StorageBackend>()?,
            Err(_) => StorageBackend::Drive,
        };

        Ok(Self {
            backend,
            folder_id: env::var("GOOGLE_DRIVE_FOLDER_ID")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DESTINATION.to_string()),
            access_token: env::var("GOOGLE_ACCESS_TOKEN").ok(),
            api_url: env::var("GOOGLE_DRIVE_API_URL").unwrap_or_else(|_| DRIVE_API_URL.to_string()),
            upload_url: env::var("GOOGLE_DRIVE_UPLOAD_URL")
                .unwrap_or_else(|_| DRIVE_UPLOAD_URL.to_string()),
        })
    }
}

/// Messaging collaborator configuration
#[derive(Clone, Debug)]
pub struct LineConfig {
    pub channel_access_token: Option<String>,
    pub api_url: String,
    pub data_api_url: String,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            channel_access_token: None,
            api_url: LINE_API_URL.to_string(),
            data_api_url: LINE_DATA_API_URL.to_string(),
        }
    }
}

impl LineConfig {
    pub fn from_env() -> Self {
        Self {
            channel_access_token: env::var("LINE_CHANNEL_ACCESS_TOKEN").ok(),
            api_url: env::var("LINE_API_URL").unwrap_or_else(|_| LINE_API_URL.to_string()),
            data_api_url: env::var("LINE_DATA_API_URL")
                .unwrap_or_else(|_| LINE_DATA_API_URL.to_string()),
        }
    }
}

/// Top-level configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub upload: UploadConfig,
    pub drive: DriveConfig,
    pub line: LineConfig,
    pub environment: String,
    pub log_format: String,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let config = Config {
            upload: UploadConfig::from_env(),
            drive: DriveConfig::from_env()?,
            line: LineConfig::from_env(),
            environment: env::var("ENVIRONMENT")
                .or_else(|_| env::var("APP_ENV"))
                .unwrap_or_else(|_| "development".to_string()),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "console".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.upload.validate()?;

        if self.drive.backend == StorageBackend::Drive && self.drive.access_token.is_none() {
            return Err(anyhow::anyhow!(
                "GOOGLE_ACCESS_TOKEN must be set when using the drive storage backend"
            ));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.upload.max_file_size_bytes
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.drive.backend
    }

    pub fn drive_folder_id(&self) -> &str {
        &self.drive.folder_id
    }

    pub fn line_channel_access_token(&self) -> Option<&str> {
        self.line.channel_access_token.as_deref()
    }
}

fn env_parse<T: std::str::FromStr + ToString>(key: &str, default: T) -> T {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .to_lowercase()
        .parse()
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_tunables() {
        let config = UploadConfig::default();
        assert_eq!(config.max_file_size_bytes, 50 * MIB);
        assert_eq!(config.multipart_threshold_bytes, 5 * MIB);
        assert_eq!(config.chunked_threshold_bytes, 25 * MIB);
        assert_eq!(config.chunk_size_bytes, 8 * MIB);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.inter_item_delay, Duration::from_secs(1));
        assert_eq!(config.batch_debounce, Duration::from_secs(30));
        assert_eq!(config.queue_retention, Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unaligned_chunk_size() {
        let config = UploadConfig {
            chunk_size_bytes: 1000,
            ..UploadConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_thresholds() {
        let config = UploadConfig {
            multipart_threshold_bytes: 30 * MIB,
            ..UploadConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let config = UploadConfig {
            max_attempts: 0,
            ..UploadConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn drive_backend_requires_token() {
        let config = Config {
            upload: UploadConfig::default(),
            drive: DriveConfig::default(),
            line: LineConfig::default(),
            environment: "test".to_string(),
            log_format: "console".to_string(),
        };
        assert!(config.validate().is_err());

        let memory = Config {
            drive: DriveConfig {
                backend: StorageBackend::Memory,
                ..DriveConfig::default()
            },
            ..config
        };
        assert!(memory.validate().is_ok());
    }
}
