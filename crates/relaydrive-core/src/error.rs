//! Error types module
//!
//! Every failure the upload pipeline can produce is an [`UploadError`]. Each
//! variant maps to exactly one [`ErrorKind`], which is what user messaging,
//! logging and metrics key on. Retry control flow never looks at the kind:
//! the upload queue decides from its attempt counter alone.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like timeouts
    Warn,
    /// Error level - for failures that need an operator
    Error,
}

/// Metadata describing how an error should be presented and logged
pub trait ErrorMetadata {
    /// Category of the failure
    fn kind(&self) -> ErrorKind;

    /// Machine-readable error code (e.g., "UPLOAD_TIMEOUT")
    fn error_code(&self) -> &'static str;

    /// Whether a fresh attempt has a reasonable chance of succeeding
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the person who sent the file
    fn suggested_action(&self) -> Option<&'static str>;

    /// Message shown to the sender (may differ from the technical message)
    fn client_message(&self) -> String;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

/// Failure category used for messaging, logging and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Network,
    SizeExceeded,
    FileTooLarge,
    SessionInitFailed,
    IncompleteUpload,
    QuotaExceeded,
    PermissionDenied,
    ValidationFailed,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 10] = [
        ErrorKind::Timeout,
        ErrorKind::Network,
        ErrorKind::SizeExceeded,
        ErrorKind::FileTooLarge,
        ErrorKind::SessionInitFailed,
        ErrorKind::IncompleteUpload,
        ErrorKind::QuotaExceeded,
        ErrorKind::PermissionDenied,
        ErrorKind::ValidationFailed,
        ErrorKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::SizeExceeded => "size_exceeded",
            ErrorKind::FileTooLarge => "file_too_large",
            ErrorKind::SessionInitFailed => "session_init_failed",
            ErrorKind::IncompleteUpload => "incomplete_upload",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Whether this kind of failure is worth retrying without outside help.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorKind::SizeExceeded
                | ErrorKind::FileTooLarge
                | ErrorKind::QuotaExceeded
                | ErrorKind::PermissionDenied
                | ErrorKind::ValidationFailed
        )
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => {
                "The upload timed out. The file may be too large or the network too slow."
            }
            ErrorKind::Network => "A network problem interrupted the upload. Please try again.",
            ErrorKind::SizeExceeded | ErrorKind::FileTooLarge => {
                "The file is larger than the allowed maximum."
            }
            ErrorKind::SessionInitFailed | ErrorKind::IncompleteUpload => {
                "The storage service did not accept the whole file. Please try again."
            }
            ErrorKind::QuotaExceeded => "The storage space is full.",
            ErrorKind::PermissionDenied => "The service has no permission to store files.",
            ErrorKind::ValidationFailed => "The file is invalid or its type is not supported.",
            ErrorKind::Unknown => "An unexpected error occurred. Please try again.",
        }
    }

    pub fn suggested_action(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "Send a smaller file or check the network speed",
            ErrorKind::Network => "Check the internet connection",
            ErrorKind::SizeExceeded | ErrorKind::FileTooLarge => {
                "Reduce the file size or split it into smaller parts"
            }
            ErrorKind::SessionInitFailed | ErrorKind::IncompleteUpload => "Send the file again",
            ErrorKind::QuotaExceeded => "Ask an administrator to free up storage space",
            ErrorKind::PermissionDenied => "Ask an administrator to check the storage access",
            ErrorKind::ValidationFailed => "Check the file type and size",
            ErrorKind::Unknown => "Try again",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.to_lowercase())
            .ok_or_else(|| anyhow::anyhow!("Invalid error kind: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UploadError {
    #[error("{operation} timed out{}", elapsed_suffix(.after))]
    Timeout { operation: String, after: Duration },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Stream exceeded size limit: received {received} bytes, limit is {limit} bytes")]
    SizeExceeded { limit: u64, received: u64 },

    #[error("File too large: {size} bytes exceeds the {limit} byte ceiling")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Failed to get resumable session URI: {0}")]
    SessionInitFailed(String),

    #[error("Upload incomplete: server acknowledged {acknowledged} of {total} bytes")]
    IncompleteUpload { acknowledged: u64, total: u64 },

    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("File validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("Upload failed: {0}")]
    Unknown(String),

    /// Both the strategy path and the fallback path failed. Classified by
    /// the fallback failure, which is the one the caller acts on.
    #[error("Fallback upload failed ({}): {fallback}; primary path: {primary}", .fallback.kind())]
    Fallback {
        primary: Box<UploadError>,
        fallback: Box<UploadError>,
    },
}

pub type UploadResult<T> = Result<T, UploadError>;

fn elapsed_suffix(after: &Duration) -> String {
    if after.is_zero() {
        String::new()
    } else {
        format!(" after {}ms", after.as_millis())
    }
}

impl UploadError {
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        UploadError::Timeout {
            operation: operation.into(),
            after,
        }
    }

    pub fn network(cause: impl Display) -> Self {
        UploadError::Network(cause.to_string())
    }

    /// Get the error type name for structured logs
    pub fn error_type(&self) -> &'static str {
        match self {
            UploadError::Timeout { .. } => "Timeout",
            UploadError::Network(_) => "Network",
            UploadError::SizeExceeded { .. } => "SizeExceeded",
            UploadError::FileTooLarge { .. } => "FileTooLarge",
            UploadError::SessionInitFailed(_) => "SessionInitFailed",
            UploadError::IncompleteUpload { .. } => "IncompleteUpload",
            UploadError::QuotaExceeded(_) => "QuotaExceeded",
            UploadError::PermissionDenied(_) => "PermissionDenied",
            UploadError::ValidationFailed(_) => "ValidationFailed",
            UploadError::Unknown(_) => "Unknown",
            UploadError::Fallback { .. } => "Fallback",
        }
    }

    /// Classify this error for delivery to the sender.
    pub fn classify(&self) -> ClassifiedError {
        ClassifiedError {
            kind: self.kind(),
            technical_message: self.to_string(),
            user_message: self.client_message(),
            suggested_action: self.suggested_action().map(str::to_string),
            retryable: self.is_recoverable(),
        }
    }
}

/// Returns (error_code, is_recoverable, log_level)
fn upload_error_static_metadata(err: &UploadError) -> (&'static str, bool, LogLevel) {
    match err {
        UploadError::Timeout { .. } => ("UPLOAD_TIMEOUT", true, LogLevel::Warn),
        UploadError::Network(_) => ("NETWORK_ERROR", true, LogLevel::Warn),
        UploadError::SizeExceeded { .. } => ("SIZE_EXCEEDED", false, LogLevel::Debug),
        UploadError::FileTooLarge { .. } => ("FILE_TOO_LARGE", false, LogLevel::Debug),
        UploadError::SessionInitFailed(_) => ("SESSION_INIT_FAILED", true, LogLevel::Warn),
        UploadError::IncompleteUpload { .. } => ("INCOMPLETE_UPLOAD", true, LogLevel::Warn),
        UploadError::QuotaExceeded(_) => ("QUOTA_EXCEEDED", false, LogLevel::Error),
        UploadError::PermissionDenied(_) => ("PERMISSION_DENIED", false, LogLevel::Error),
        UploadError::ValidationFailed(_) => ("VALIDATION_FAILED", false, LogLevel::Debug),
        UploadError::Unknown(_) => ("UNKNOWN_ERROR", true, LogLevel::Error),
        UploadError::Fallback { fallback, .. } => upload_error_static_metadata(fallback),
    }
}

impl ErrorMetadata for UploadError {
    fn kind(&self) -> ErrorKind {
        match self {
            UploadError::Timeout { .. } => ErrorKind::Timeout,
            UploadError::Network(_) => ErrorKind::Network,
            UploadError::SizeExceeded { .. } => ErrorKind::SizeExceeded,
            UploadError::FileTooLarge { .. } => ErrorKind::FileTooLarge,
            UploadError::SessionInitFailed(_) => ErrorKind::SessionInitFailed,
            UploadError::IncompleteUpload { .. } => ErrorKind::IncompleteUpload,
            UploadError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            UploadError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            UploadError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            UploadError::Unknown(_) => ErrorKind::Unknown,
            UploadError::Fallback { fallback, .. } => fallback.kind(),
        }
    }

    fn error_code(&self) -> &'static str {
        upload_error_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        upload_error_static_metadata(self).1
    }

    fn suggested_action(&self) -> Option<&'static str> {
        Some(self.kind().suggested_action())
    }

    fn client_message(&self) -> String {
        match self {
            UploadError::FileTooLarge { limit, .. } | UploadError::SizeExceeded { limit, .. } => {
                format!(
                    "The file is larger than the allowed maximum of {} MB.",
                    limit / (1024 * 1024)
                )
            }
            UploadError::ValidationFailed(errors) => {
                format!("The file was rejected: {}", errors.join("; "))
            }
            other => other.kind().user_message().to_string(),
        }
    }

    fn log_level(&self) -> LogLevel {
        upload_error_static_metadata(self).2
    }
}

/// A failure as reported to whoever owns notifying the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub technical_message: String,
    pub user_message: String,
    pub suggested_action: Option<String>,
    pub retryable: bool,
}

impl Display for ClassifiedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} ({})", self.technical_message, self.kind)
    }
}

impl From<&UploadError> for ClassifiedError {
    fn from(err: &UploadError) -> Self {
        err.classify()
    }
}

/// Map free-form failure text to a kind, for collaborators that only report text.
///
/// Checked in priority order: network, timeout, size, quota, permission,
/// validation. Anything else is `Unknown`.
pub fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&[
        "econnreset",
        "econnrefused",
        "enotfound",
        "etimedout",
        "network",
        "connection",
        "dns",
    ]) {
        ErrorKind::Network
    } else if has(&["timeout", "timed out"]) {
        ErrorKind::Timeout
    } else if has(&["too large", "size", "limit"]) {
        ErrorKind::FileTooLarge
    } else if has(&["quota", "storage", "insufficient"]) {
        ErrorKind::QuotaExceeded
    } else if has(&["permission", "unauthorized", "forbidden"]) {
        ErrorKind::PermissionDenied
    } else if has(&["validation", "invalid file", "file type"]) {
        ErrorKind::ValidationFailed
    } else {
        ErrorKind::Unknown
    }
}
