//! Upload performance counters
//!
//! In-process only. Counts are kept for the life of the process (or until
//! [`PerformanceMonitor::reset`]) and exposed as a serializable snapshot.

use relaydrive_core::constants::MIB;
use relaydrive_core::ErrorKind;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

const SMALL_FILE_LIMIT: u64 = 5 * MIB;
const MEDIUM_FILE_LIMIT: u64 = 50 * MIB;

/// Handed out when an upload starts, consumed when it ends
#[derive(Debug, Clone)]
pub struct UploadTiming {
    pub file_name: String,
    pub size_bytes: u64,
    pub method: String,
    started: Instant,
}

impl UploadTiming {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SizeBuckets {
    /// Under 5 MiB
    pub small: u64,
    /// 5 MiB up to 50 MiB
    pub medium: u64,
    pub large: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadExtreme {
    pub file_name: String,
    pub duration_ms: u64,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub total_uploads: u64,
    pub successful_uploads: u64,
    pub failed_uploads: u64,
    /// Percentage, 0 when nothing finished yet
    pub success_rate: f64,
    pub total_bytes: u64,
    pub average_speed_mbps: f64,
    pub average_time_ms: f64,
    pub file_sizes: SizeBuckets,
    pub methods: BTreeMap<String, u64>,
    pub errors: BTreeMap<String, u64>,
    pub fastest: Option<UploadExtreme>,
    pub slowest: Option<UploadExtreme>,
}

#[derive(Default)]
struct MonitorState {
    total: u64,
    successful: u64,
    failed: u64,
    total_bytes: u64,
    successful_bytes: u64,
    successful_time: Duration,
    sizes: SizeBuckets,
    methods: BTreeMap<String, u64>,
    errors: BTreeMap<String, u64>,
    fastest: Option<UploadExtreme>,
    slowest: Option<UploadExtreme>,
}

#[derive(Default)]
pub struct PerformanceMonitor {
    state: Mutex<MonitorState>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn start_upload(
        &self,
        file_name: impl Into<String>,
        size_bytes: u64,
        method: impl Into<String>,
    ) -> UploadTiming {
        UploadTiming {
            file_name: file_name.into(),
            size_bytes,
            method: method.into(),
            started: Instant::now(),
        }
    }

    /// Record the end of an upload; `error` is `None` on success.
    pub fn complete_upload(&self, timing: UploadTiming, error: Option<ErrorKind>) {
        let elapsed = timing.elapsed();
        let mut state = self.lock();

        state.total += 1;
        state.total_bytes += timing.size_bytes;
        *state.methods.entry(timing.method.clone()).or_insert(0) += 1;

        if timing.size_bytes < SMALL_FILE_LIMIT {
            state.sizes.small += 1;
        } else if timing.size_bytes < MEDIUM_FILE_LIMIT {
            state.sizes.medium += 1;
        } else {
            state.sizes.large += 1;
        }

        match error {
            Some(kind) => {
                state.failed += 1;
                *state.errors.entry(kind.to_string()).or_insert(0) += 1;
            }
            None => {
                state.successful += 1;
                state.successful_bytes += timing.size_bytes;
                state.successful_time += elapsed;

                let record = UploadExtreme {
                    file_name: timing.file_name.clone(),
                    duration_ms: elapsed.as_millis() as u64,
                    size_bytes: timing.size_bytes,
                };
                if state
                    .fastest
                    .as_ref()
                    .map_or(true, |f| record.duration_ms < f.duration_ms)
                {
                    state.fastest = Some(record.clone());
                }
                if state
                    .slowest
                    .as_ref()
                    .map_or(true, |s| record.duration_ms > s.duration_ms)
                {
                    state.slowest = Some(record);
                }
            }
        }

        tracing::debug!(
            file_name = %timing.file_name,
            method = %timing.method,
            size_bytes = timing.size_bytes,
            duration_ms = elapsed.as_secs_f64() * 1000.0,
            success = error.is_none(),
            "Upload recorded"
        );
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let state = self.lock();
        let secs = state.successful_time.as_secs_f64();

        MonitorSnapshot {
            total_uploads: state.total,
            successful_uploads: state.successful,
            failed_uploads: state.failed,
            success_rate: if state.total > 0 {
                state.successful as f64 * 100.0 / state.total as f64
            } else {
                0.0
            },
            total_bytes: state.total_bytes,
            average_speed_mbps: if secs > 0.0 {
                state.successful_bytes as f64 / MIB as f64 / secs
            } else {
                0.0
            },
            average_time_ms: if state.successful > 0 {
                secs * 1000.0 / state.successful as f64
            } else {
                0.0
            },
            file_sizes: state.sizes.clone(),
            methods: state.methods.clone(),
            errors: state.errors.clone(),
            fastest: state.fastest.clone(),
            slowest: state.slowest.clone(),
        }
    }

    pub fn reset(&self) {
        *self.lock() = MonitorState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_monitor_tracks_outcomes() {
        let monitor = PerformanceMonitor::new();

        let quick = monitor.start_upload("a.txt", 2 * MIB, "multipart");
        tokio::time::sleep(Duration::from_secs(1)).await;
        monitor.complete_upload(quick, None);

        let slow = monitor.start_upload("b.mp4", 40 * MIB, "chunked_resumable");
        tokio::time::sleep(Duration::from_secs(4)).await;
        monitor.complete_upload(slow, None);

        let failed = monitor.start_upload("c.zip", 60 * MIB, "chunked_resumable");
        monitor.complete_upload(failed, Some(ErrorKind::Network));

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.total_uploads, 3);
        assert_eq!(snapshot.successful_uploads, 2);
        assert_eq!(snapshot.failed_uploads, 1);
        assert_eq!(
            snapshot.file_sizes,
            SizeBuckets {
                small: 1,
                medium: 1,
                large: 1
            }
        );
        assert_eq!(snapshot.methods.get("chunked_resumable"), Some(&2));
        assert_eq!(snapshot.errors.get("network"), Some(&1));
        assert_eq!(snapshot.fastest.unwrap().file_name, "a.txt");
        assert_eq!(snapshot.slowest.unwrap().file_name, "b.mp4");
        assert!((snapshot.average_speed_mbps - 42.0 / 5.0).abs() < 0.01);
        assert!((snapshot.average_time_ms - 2500.0).abs() < 1.0);
    }

    #[test]
    fn test_monitor_reset() {
        let monitor = PerformanceMonitor::new();
        let timing = monitor.start_upload("a.txt", 1, "multipart");
        monitor.complete_upload(timing, Some(ErrorKind::Timeout));
        monitor.reset();
        assert_eq!(monitor.snapshot(), MonitorSnapshot::default());
    }
}
