//! Google-Drive-compatible storage backend
//!
//! Talks to the Drive v3 REST endpoints directly: multipart create for small
//! files, resumable sessions (single or chunked PUT) for larger ones, and a
//! plain single-request upload as fallback.

mod multipart;
mod resumable;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relaydrive_core::constants::{view_link_for, FILE_FIELDS};
use relaydrive_core::models::{StoredFile, UploadStrategy, UploadedFile};
use relaydrive_core::{DriveConfig, UploadConfig, UploadError};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::TokenProvider;
use crate::strategy::{MULTIPART_RETRY_BASE, SIMPLE_UPLOAD_TIMEOUT, SESSION_INIT_TIMEOUT};
use crate::{Storage, StorageBackend, StorageError, StorageResult, UploadRequest};

pub use resumable::{PutOutcome, SessionState, UploadSession};

const LIST_FIELDS: &str = "files(id,name,mimeType,webViewLink,createdTime,size)";
const GET_FIELDS: &str = "id,name,mimeType,webViewLink,createdTime,size";

/// Chunking behaviour of the resumable path and the multipart backoff base
#[derive(Debug, Clone)]
pub struct ChunkSettings {
    pub chunk_size: u64,
    pub retry_delay: Duration,
    pub max_retries: u32,
    pub multipart_retry_base: Duration,
}

impl From<&UploadConfig> for ChunkSettings {
    fn from(config: &UploadConfig) -> Self {
        Self {
            chunk_size: config.chunk_size_bytes,
            retry_delay: config.chunk_retry_delay,
            max_retries: config.chunk_max_retries,
            multipart_retry_base: MULTIPART_RETRY_BASE,
        }
    }
}

#[derive(Clone)]
pub struct DriveStorage {
    client: Client,
    tokens: Arc<dyn TokenProvider>,
    api_url: String,
    upload_url: String,
    chunks: ChunkSettings,
}

impl DriveStorage {
    pub fn new(
        config: &DriveConfig,
        tokens: Arc<dyn TokenProvider>,
        chunks: ChunkSettings,
    ) -> Result<Self, StorageError> {
        // A 308 is a resumable-protocol answer here, never a redirect to follow.
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| StorageError::BackendError(format!("Failed to build HTTP client: {e}")))?;

        tracing::info!(
            api_url = %config.api_url,
            upload_url = %config.upload_url,
            chunk_size = chunks.chunk_size,
            "Drive storage initialized"
        );

        Ok(Self {
            client,
            tokens,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            upload_url: config.upload_url.trim_end_matches('/').to_string(),
            chunks,
        })
    }

    fn files_upload_url(&self) -> String {
        format!("{}/files", self.upload_url)
    }

    async fn authorized(&self, builder: RequestBuilder) -> StorageResult<RequestBuilder> {
        let token = self.tokens.access_token().await?;
        Ok(builder.bearer_auth(token))
    }

    /// Send with a per-request timeout, mapping transport failures to the
    /// error taxonomy.
    async fn send(
        &self,
        builder: RequestBuilder,
        operation: &str,
        timeout: Duration,
    ) -> StorageResult<Response> {
        builder
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, operation, timeout))
    }
}

#[async_trait]
impl Storage for DriveStorage {
    async fn upload(
        &self,
        strategy: UploadStrategy,
        request: &UploadRequest,
    ) -> StorageResult<UploadedFile> {
        let start = Instant::now();
        tracing::info!(
            file_name = %request.file_name,
            size_bytes = request.size(),
            strategy = %strategy,
            mime_type = %request.mime_type,
            "Drive upload started"
        );

        let result = match strategy {
            UploadStrategy::Multipart => self.upload_multipart(request).await,
            UploadStrategy::Resumable => {
                let mut session = self.start_session(request).await?;
                session.put_all(self, &request.data).await
            }
            UploadStrategy::ChunkedResumable => {
                let mut session = self.start_session(request).await?;
                session.put_chunks(self, &request.data, &self.chunks).await
            }
        };

        match &result {
            Ok(file) => tracing::info!(
                file_name = %request.file_name,
                file_id = %file.id,
                size_bytes = request.size(),
                strategy = %strategy,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Drive upload successful"
            ),
            Err(e) => tracing::warn!(
                error = %e,
                file_name = %request.file_name,
                size_bytes = request.size(),
                strategy = %strategy,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Drive upload failed"
            ),
        }

        result
    }

    async fn upload_simple(&self, request: &UploadRequest) -> StorageResult<UploadedFile> {
        let start = Instant::now();
        let result = self
            .send_multipart(request, SIMPLE_UPLOAD_TIMEOUT, "Simple upload")
            .await;

        match &result {
            Ok(file) => tracing::info!(
                file_name = %request.file_name,
                file_id = %file.id,
                size_bytes = request.size(),
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Drive simple upload successful"
            ),
            Err(e) => tracing::error!(
                error = %e,
                file_name = %request.file_name,
                size_bytes = request.size(),
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Drive simple upload failed"
            ),
        }

        result
    }

    async fn list_files(&self, destination: &str, limit: usize) -> StorageResult<Vec<StoredFile>> {
        let query = format!(
            "'{}' in parents and trashed = false",
            destination.replace('\'', "\\'")
        );
        let page_size = limit.clamp(1, 1000).to_string();
        let builder = self
            .client
            .get(format!("{}/files", self.api_url))
            .query(&[
                ("q", query.as_str()),
                ("fields", LIST_FIELDS),
                ("orderBy", "createdTime desc"),
                ("pageSize", page_size.as_str()),
            ]);
        let response = self
            .send(
                self.authorized(builder).await?,
                "List files",
                SESSION_INIT_TIMEOUT,
            )
            .await?;
        let response = ensure_success(response).await?;

        let list: DriveFileList = response
            .json()
            .await
            .map_err(|e| UploadError::Unknown(format!("Invalid file list response: {e}")))?;

        tracing::debug!(destination = %destination, count = list.files.len(), "Listed files");
        Ok(list
            .files
            .into_iter()
            .take(limit)
            .map(DriveFile::into_stored)
            .collect())
    }

    async fn get_file(&self, file_id: &str) -> StorageResult<StoredFile> {
        let builder = self
            .client
            .get(format!(
                "{}/files/{}",
                self.api_url,
                urlencoding::encode(file_id)
            ))
            .query(&[("fields", GET_FIELDS)]);
        let response = self
            .send(
                self.authorized(builder).await?,
                "Get file",
                SESSION_INIT_TIMEOUT,
            )
            .await?;
        let response = ensure_success(response).await?;

        let file: DriveFile = response
            .json()
            .await
            .map_err(|e| UploadError::Unknown(format!("Invalid file response: {e}")))?;
        Ok(file.into_stored())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Drive
    }
}

/// File resource as returned by the Drive API. `size` arrives as a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    id: String,
    name: Option<String>,
    mime_type: Option<String>,
    web_view_link: Option<String>,
    created_time: Option<DateTime<Utc>>,
    size: Option<String>,
}

impl DriveFile {
    fn view_link(&self) -> String {
        self.web_view_link
            .clone()
            .unwrap_or_else(|| view_link_for(&self.id))
    }

    /// Fill gaps in the response from what was sent.
    pub(crate) fn into_uploaded(self, request: &UploadRequest) -> UploadedFile {
        UploadedFile {
            view_link: self.view_link(),
            name: self.name.unwrap_or_else(|| request.file_name.clone()),
            mime_type: self.mime_type.unwrap_or_else(|| request.mime_type.clone()),
            size: self
                .size
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(|| request.size()),
            id: self.id,
        }
    }

    fn into_stored(self) -> StoredFile {
        StoredFile {
            view_link: self.view_link(),
            name: self.name.unwrap_or_default(),
            mime_type: self.mime_type.unwrap_or_default(),
            created_time: self.created_time,
            size: self.size.and_then(|s| s.parse().ok()),
            id: self.id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

/// Parse a created-file body.
pub(crate) async fn read_file(response: Response) -> StorageResult<DriveFile> {
    response
        .json::<DriveFile>()
        .await
        .map_err(|e| UploadError::Unknown(format!("Invalid upload response: {e}")))
}

/// Turn a non-success response into a typed error, keeping the body as cause.
pub(crate) async fn ensure_success(response: Response) -> StorageResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_for_status(status, &body))
}

/// HTTP status to error kind.
pub(crate) fn error_for_status(status: StatusCode, body: &str) -> UploadError {
    let cause = if body.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), truncate(body, 300))
    };

    match status.as_u16() {
        401 => UploadError::PermissionDenied(cause),
        403 if body.contains("storageQuotaExceeded")
            || body.contains("quotaExceeded")
            || body.to_lowercase().contains("quota") =>
        {
            UploadError::QuotaExceeded(cause)
        }
        403 => UploadError::PermissionDenied(cause),
        408 => UploadError::Timeout {
            operation: cause,
            after: Duration::ZERO,
        },
        429 | 500 | 502 | 503 | 504 => UploadError::Network(cause),
        _ => UploadError::Unknown(cause),
    }
}

pub(crate) fn map_reqwest_error(
    err: reqwest::Error,
    operation: &str,
    timeout: Duration,
) -> UploadError {
    if err.is_timeout() {
        UploadError::Timeout {
            operation: operation.to_string(),
            after: timeout,
        }
    } else if err.is_connect() || err.is_request() || err.is_body() {
        UploadError::Network(format!("{operation}: {err}"))
    } else {
        UploadError::Unknown(format!("{operation}: {err}"))
    }
}

/// Transient failures are retried at chunk level.
pub(crate) fn is_transient(err: &UploadError) -> bool {
    matches!(err, UploadError::Network(_) | UploadError::Timeout { .. })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub(crate) fn fields_query() -> [(&'static str, &'static str); 1] {
    [("fields", FILE_FIELDS)]
}
