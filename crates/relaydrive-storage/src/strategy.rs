//! Size-based strategy selection and request timeouts

use std::time::Duration;

use relaydrive_core::constants::MIB;
use relaydrive_core::models::UploadStrategy;
use relaydrive_core::{UploadConfig, UploadError, UploadResult};

/// Pick the transfer path for a buffer of `byte_length` bytes.
///
/// Below the multipart threshold a single request carries metadata and
/// data; up to the chunked threshold a resumable session takes one PUT;
/// anything larger is sent in fixed-size chunks.
pub fn select_strategy(byte_length: u64, config: &UploadConfig) -> UploadStrategy {
    if byte_length < config.multipart_threshold_bytes {
        UploadStrategy::Multipart
    } else if byte_length <= config.chunked_threshold_bytes {
        UploadStrategy::Resumable
    } else {
        UploadStrategy::ChunkedResumable
    }
}

/// Fail fast on anything above the configured ceiling.
pub fn ensure_within_ceiling(byte_length: u64, config: &UploadConfig) -> UploadResult<()> {
    if byte_length > config.max_file_size_bytes {
        return Err(UploadError::FileTooLarge {
            size: byte_length,
            limit: config.max_file_size_bytes,
        });
    }
    Ok(())
}

fn scaled(floor: Duration, per_mib: Duration, byte_length: u64) -> Duration {
    let mib = byte_length as f64 / MIB as f64;
    floor.max(per_mib.mul_f64(mib))
}

/// Multipart request timeout: at least 30s, 10s per MiB.
pub fn multipart_timeout(byte_length: u64) -> Duration {
    scaled(Duration::from_secs(30), Duration::from_secs(10), byte_length)
}

/// Data PUT timeout (whole buffer or one chunk): at least 60s, 15s per MiB.
pub fn put_timeout(byte_length: u64) -> Duration {
    scaled(Duration::from_secs(60), Duration::from_secs(15), byte_length)
}

/// Deadline for the whole strategy-selected path: at least 45s, 1s per MiB.
pub fn primary_deadline(byte_length: u64) -> Duration {
    scaled(Duration::from_secs(45), Duration::from_secs(1), byte_length)
}

pub const SESSION_INIT_TIMEOUT: Duration = Duration::from_secs(30);
pub const FALLBACK_DEADLINE: Duration = Duration::from_secs(55);
pub const SIMPLE_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

pub const MULTIPART_MAX_RETRIES: u32 = 2;
pub const MULTIPART_RETRY_BASE: Duration = Duration::from_secs(2);

/// Backoff before multipart retry `retry` (0-based): `base` doubling, capped at four times `base`.
pub fn multipart_retry_delay(base: Duration, retry: u32) -> Duration {
    base.saturating_mul(1u32 << retry.min(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_thresholds() {
        let config = UploadConfig::default();
        assert_eq!(select_strategy(1, &config), UploadStrategy::Multipart);
        assert_eq!(select_strategy(2 * MIB, &config), UploadStrategy::Multipart);
        assert_eq!(select_strategy(5 * MIB - 1, &config), UploadStrategy::Multipart);
        assert_eq!(select_strategy(5 * MIB, &config), UploadStrategy::Resumable);
        assert_eq!(select_strategy(25 * MIB, &config), UploadStrategy::Resumable);
        assert_eq!(
            select_strategy(25 * MIB + 1, &config),
            UploadStrategy::ChunkedResumable
        );
        assert_eq!(
            select_strategy(40 * MIB, &config),
            UploadStrategy::ChunkedResumable
        );
    }

    #[test]
    fn strategy_is_monotonic_in_size() {
        let config = UploadConfig::default();
        let rank = |s: UploadStrategy| match s {
            UploadStrategy::Multipart => 0,
            UploadStrategy::Resumable => 1,
            UploadStrategy::ChunkedResumable => 2,
        };
        let mut previous = 0;
        for step in 0..=120u64 {
            let size = step * MIB / 2;
            let current = rank(select_strategy(size, &config));
            assert!(current >= previous, "strategy went backwards at {size}");
            assert_eq!(select_strategy(size, &config), select_strategy(size, &config));
            previous = current;
        }
    }

    #[test]
    fn ceiling_rejects_oversize() {
        let config = UploadConfig::default();
        assert!(ensure_within_ceiling(50 * MIB, &config).is_ok());
        let err = ensure_within_ceiling(50 * MIB + 1, &config).unwrap_err();
        assert!(matches!(err, UploadError::FileTooLarge { .. }));
    }

    #[test]
    fn timeouts_scale_with_size() {
        assert_eq!(multipart_timeout(MIB), Duration::from_secs(30));
        assert_eq!(multipart_timeout(4 * MIB), Duration::from_secs(40));
        assert_eq!(put_timeout(2 * MIB), Duration::from_secs(60));
        assert_eq!(put_timeout(8 * MIB), Duration::from_secs(120));
        assert_eq!(primary_deadline(10 * MIB), Duration::from_secs(45));
        assert_eq!(primary_deadline(50 * MIB), Duration::from_secs(50));
    }

    #[test]
    fn multipart_backoff_is_capped() {
        let base = MULTIPART_RETRY_BASE;
        assert_eq!(multipart_retry_delay(base, 0), Duration::from_secs(2));
        assert_eq!(multipart_retry_delay(base, 1), Duration::from_secs(4));
        assert_eq!(multipart_retry_delay(base, 2), Duration::from_secs(8));
        assert_eq!(multipart_retry_delay(base, 5), Duration::from_secs(8));
        assert_eq!(
            multipart_retry_delay(Duration::from_millis(10), 1),
            Duration::from_millis(20)
        );
    }
}
