use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Collecting,
    Processing,
    Completed,
}

impl Display for BatchStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            BatchStatus::Collecting => write!(f, "collecting"),
            BatchStatus::Processing => write!(f, "processing"),
            BatchStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

impl Display for FileStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            FileStatus::Pending => write!(f, "pending"),
            FileStatus::Uploading => write!(f, "uploading"),
            FileStatus::Completed => write!(f, "completed"),
            FileStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Reference to an attachment that has not been fetched yet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub message_id: String,
    pub file_name: String,
}

impl FileDescriptor {
    pub fn new(message_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            file_name: file_name.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchFileSnapshot {
    pub message_id: String,
    pub file_name: String,
    pub status: FileStatus,
    pub view_link: Option<String>,
    pub error: Option<String>,
}

/// Read-only view of a batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchSnapshot {
    pub id: Uuid,
    pub owner_id: String,
    pub status: BatchStatus,
    pub total_files: usize,
    pub processed_files: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub files: Vec<BatchFileSnapshot>,
}

/// Aggregate result of one processing pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub total_files: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub elapsed: Duration,
}
