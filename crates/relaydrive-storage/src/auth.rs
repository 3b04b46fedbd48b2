//! Access tokens for the storage backend
//!
//! Credentials are owned by the caller; the backend only asks for a bearer
//! token before each request.

use async_trait::async_trait;
use relaydrive_core::{UploadError, UploadResult};

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> UploadResult<String>;
}

/// A token obtained elsewhere and handed over as-is
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> UploadResult<String> {
        if self.token.trim().is_empty() {
            return Err(UploadError::PermissionDenied(
                "Failed to get access token: token is empty".to_string(),
            ));
        }
        Ok(self.token.clone())
    }
}
