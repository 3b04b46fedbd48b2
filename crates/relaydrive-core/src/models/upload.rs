use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Transfer path chosen once per attempt from the buffer size
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UploadStrategy {
    /// One request carrying metadata and body
    Multipart,
    /// Session init followed by a single PUT
    Resumable,
    /// Session init followed by fixed-size ranged PUTs
    ChunkedResumable,
}

impl Display for UploadStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UploadStrategy::Multipart => write!(f, "multipart"),
            UploadStrategy::Resumable => write!(f, "resumable"),
            UploadStrategy::ChunkedResumable => write!(f, "chunked_resumable"),
        }
    }
}

impl FromStr for UploadStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multipart" => Ok(UploadStrategy::Multipart),
            "resumable" => Ok(UploadStrategy::Resumable),
            "chunked_resumable" => Ok(UploadStrategy::ChunkedResumable),
            _ => Err(anyhow::anyhow!("Invalid upload strategy: {}", s)),
        }
    }
}

/// A file created in the storage backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub id: String,
    pub name: String,
    pub view_link: String,
    pub mime_type: String,
    pub size: u64,
}

/// File metadata as returned by listing or lookup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub view_link: String,
    pub created_time: Option<DateTime<Utc>>,
    pub size: Option<u64>,
}

impl From<UploadedFile> for StoredFile {
    fn from(file: UploadedFile) -> Self {
        StoredFile {
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            view_link: file.view_link,
            created_time: None,
            size: Some(file.size),
        }
    }
}
