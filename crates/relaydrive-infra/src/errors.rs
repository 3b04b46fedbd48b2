//! Recent-error tracking
//!
//! Every failure that reaches a sender goes through [`ErrorTracker::record`]:
//! it is classified, logged at the level its kind asks for, counted per
//! `(kind, context)` and kept in a bounded most-recent-first list.

use chrono::{DateTime, Utc};
use relaydrive_core::{ClassifiedError, ErrorKind, ErrorMetadata, LogLevel, UploadError};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

const MAX_RECENT_ERRORS: usize = 50;
const FREQUENT_ERROR_THRESHOLD: u64 = 5;
const SNAPSHOT_RECENT: usize = 10;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub context: String,
    pub technical_message: String,
    pub user_message: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub total_errors: usize,
    pub errors_by_kind: BTreeMap<String, usize>,
    pub recent_errors: Vec<ErrorRecord>,
}

#[derive(Default)]
struct TrackerState {
    counts: HashMap<(ErrorKind, String), u64>,
    recent: VecDeque<ErrorRecord>,
}

#[derive(Default)]
pub struct ErrorTracker {
    state: Mutex<TrackerState>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Classify, log and remember `err`. Returns what the sender should see.
    pub fn record(&self, err: &UploadError, context: &str) -> ClassifiedError {
        let classified = err.classify();

        match err.log_level() {
            LogLevel::Error => tracing::error!(
                error = %err,
                error_kind = %classified.kind,
                error_code = err.error_code(),
                context = %context,
                "Upload error"
            ),
            LogLevel::Warn => tracing::warn!(
                error = %err,
                error_kind = %classified.kind,
                error_code = err.error_code(),
                context = %context,
                "Upload error"
            ),
            LogLevel::Debug => tracing::debug!(
                error = %err,
                error_kind = %classified.kind,
                context = %context,
                "Upload error"
            ),
        }

        let mut state = self.lock();
        let count = state
            .counts
            .entry((classified.kind, context.to_string()))
            .or_insert(0);
        *count += 1;
        if *count > FREQUENT_ERROR_THRESHOLD {
            tracing::warn!(
                error_kind = %classified.kind,
                context = %context,
                occurrences = *count,
                "Frequent error detected"
            );
        }

        state.recent.push_front(ErrorRecord {
            kind: classified.kind,
            context: context.to_string(),
            technical_message: classified.technical_message.clone(),
            user_message: classified.user_message.clone(),
            occurred_at: Utc::now(),
        });
        state.recent.truncate(MAX_RECENT_ERRORS);

        classified
    }

    /// How many times `kind` was recorded under `context`
    pub fn occurrences(&self, kind: ErrorKind, context: &str) -> u64 {
        self.lock()
            .counts
            .get(&(kind, context.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.lock();
        let mut errors_by_kind = BTreeMap::new();
        for record in &state.recent {
            *errors_by_kind.entry(record.kind.to_string()).or_insert(0) += 1;
        }
        TrackerSnapshot {
            total_errors: state.recent.len(),
            errors_by_kind,
            recent_errors: state.recent.iter().take(SNAPSHOT_RECENT).cloned().collect(),
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.counts.clear();
        state.recent.clear();
    }
}
