//! Shared constants

pub const MIB: u64 = 1024 * 1024;

/// Chunk sizes for resumable uploads must be a multiple of this.
pub const CHUNK_GRANULARITY: u64 = 256 * 1024;

pub const DEFAULT_DESTINATION: &str = "root";

/// Fields requested from the storage backend for every created or listed file.
pub const FILE_FIELDS: &str = "id,name,webViewLink,mimeType,size";

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Link used when the backend response does not include one.
pub fn view_link_for(file_id: &str) -> String {
    format!("https://drive.google.com/file/d/{}/view", file_id)
}
