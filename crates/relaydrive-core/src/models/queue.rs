use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ClassifiedError;
use crate::models::UploadedFile;

/// What a queue entry's completion delivers to its caller
pub type UploadOutcome = Result<UploadedFile, ClassifiedError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl EntryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryStatus::Completed | EntryStatus::Failed)
    }
}

impl Display for EntryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            EntryStatus::Pending => write!(f, "pending"),
            EntryStatus::Processing => write!(f, "processing"),
            EntryStatus::Completed => write!(f, "completed"),
            EntryStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for EntryStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EntryStatus::Pending),
            "processing" => Ok(EntryStatus::Processing),
            "completed" => Ok(EntryStatus::Completed),
            "failed" => Ok(EntryStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid entry status: {}", s)),
        }
    }
}

/// Read-only view of one queue entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntrySnapshot {
    pub id: Uuid,
    pub owner_id: String,
    pub file_name: String,
    pub status: EntryStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub size_bytes: Option<u64>,
    pub added_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result: Option<UploadedFile>,
}

/// Counts across the whole queue
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub is_processing: bool,
}

impl QueueStats {
    pub fn count(&mut self, status: EntryStatus) {
        self.total += 1;
        match status {
            EntryStatus::Pending => self.pending += 1,
            EntryStatus::Processing => self.processing += 1,
            EntryStatus::Completed => self.completed += 1,
            EntryStatus::Failed => self.failed += 1,
        }
    }
}

/// Counts and file list for one sender
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OwnerQueueStatus {
    pub owner_id: String,
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub files: Vec<EntrySnapshot>,
}

impl OwnerQueueStatus {
    pub fn from_entries(owner_id: &str, files: Vec<EntrySnapshot>) -> Self {
        let mut stats = QueueStats::default();
        for file in &files {
            stats.count(file.status);
        }
        OwnerQueueStatus {
            owner_id: owner_id.to_string(),
            total: stats.total,
            pending: stats.pending,
            processing: stats.processing,
            completed: stats.completed,
            failed: stats.failed,
            files,
        }
    }
}
