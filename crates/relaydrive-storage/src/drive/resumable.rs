//! Resumable upload sessions
//!
//! `Initiated -> Continue* -> Complete | Failed`. A session is never resumed
//! after it fails; the caller restarts the whole transfer.

use bytes::Bytes;
use relaydrive_core::models::UploadedFile;
use relaydrive_core::UploadError;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::{Response, StatusCode};
use serde_json::json;

use super::{
    error_for_status, fields_query, is_transient, read_file, ChunkSettings, DriveFile,
    DriveStorage,
};
use crate::strategy::{put_timeout, SESSION_INIT_TIMEOUT};
use crate::{StorageResult, UploadRequest};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Initiated,
    /// Server holds a prefix of the file and expects more
    Continue { acknowledged: u64 },
    Complete(UploadedFile),
    Failed(UploadError),
}

/// How the server answered one PUT
#[derive(Debug)]
pub enum PutOutcome {
    /// `308`: bytes `0..acknowledged` are stored
    Continue { acknowledged: u64 },
    Complete(DriveFile),
}

#[derive(Debug)]
pub struct UploadSession {
    pub session_uri: String,
    pub mime_type: String,
    pub total_bytes: u64,
    pub bytes_sent: u64,
    pub state: SessionState,
    request: UploadRequest,
}

impl DriveStorage {
    /// POST the metadata and obtain a session URI from `Location`.
    pub(super) async fn start_session(&self, request: &UploadRequest) -> StorageResult<UploadSession> {
        let builder = self
            .client
            .post(self.files_upload_url())
            .query(&[("uploadType", "resumable")])
            .query(&fields_query())
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .header("X-Upload-Content-Type", request.mime_type.as_str())
            .header("X-Upload-Content-Length", request.size().to_string())
            .body(
                json!({
                    "name": request.file_name,
                    "parents": [request.destination],
                })
                .to_string(),
            );

        let response = self
            .send(
                self.authorized(builder).await?,
                "Resumable session init",
                SESSION_INIT_TIMEOUT,
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match error_for_status(status, &body) {
                UploadError::Unknown(cause) => UploadError::SessionInitFailed(cause),
                other => other,
            });
        }

        let session_uri = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                UploadError::SessionInitFailed(format!(
                    "no Location header in HTTP {} response",
                    status.as_u16()
                ))
            })?;

        tracing::debug!(file_name = %request.file_name, "Resumable session initiated");

        Ok(UploadSession {
            session_uri,
            mime_type: request.mime_type.clone(),
            total_bytes: request.size(),
            bytes_sent: 0,
            state: SessionState::Initiated,
            request: request.clone(),
        })
    }
}

impl UploadSession {
    /// Send the whole buffer in one PUT. A `308` here is not resumed.
    pub async fn put_all(&mut self, drive: &DriveStorage, data: &Bytes) -> StorageResult<UploadedFile> {
        let builder = drive
            .client
            .put(&self.session_uri)
            .header(CONTENT_TYPE, self.mime_type.as_str())
            .body(data.clone());

        let outcome = match drive
            .send(builder, "Resumable upload", put_timeout(self.total_bytes))
            .await
        {
            Ok(response) => interpret(response).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(PutOutcome::Complete(file)) => Ok(self.complete(file)),
            Ok(PutOutcome::Continue { acknowledged }) => {
                let err = UploadError::IncompleteUpload {
                    acknowledged,
                    total: self.total_bytes,
                };
                Err(self.fail(err))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Send fixed-size ranges, retrying a range on transient failure.
    pub async fn put_chunks(
        &mut self,
        drive: &DriveStorage,
        data: &Bytes,
        settings: &ChunkSettings,
    ) -> StorageResult<UploadedFile> {
        let chunk_size = settings.chunk_size.max(1);

        while self.bytes_sent < self.total_bytes {
            let start = self.bytes_sent;
            let end = (start + chunk_size).min(self.total_bytes);

            let outcome = match self.put_range_with_retry(drive, data, start, end, settings).await {
                Ok(outcome) => outcome,
                Err(e) => return Err(self.fail(e)),
            };

            match outcome {
                PutOutcome::Complete(file) => {
                    self.bytes_sent = self.total_bytes;
                    return Ok(self.complete(file));
                }
                PutOutcome::Continue { acknowledged } => {
                    if acknowledged <= start {
                        return Err(self.fail(UploadError::IncompleteUpload {
                            acknowledged,
                            total: self.total_bytes,
                        }));
                    }
                    // The server may keep less than was sent; continue from what it holds.
                    self.bytes_sent = acknowledged.min(self.total_bytes);
                    self.state = SessionState::Continue {
                        acknowledged: self.bytes_sent,
                    };
                    tracing::debug!(
                        file_name = %self.request.file_name,
                        acknowledged = self.bytes_sent,
                        total = self.total_bytes,
                        "Chunk acknowledged"
                    );
                }
            }
        }

        // Every byte acknowledged but no file body yet: ask for the final state.
        match self.query_status(drive).await {
            Ok(file) => Ok(self.complete(file)),
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn put_range_with_retry(
        &self,
        drive: &DriveStorage,
        data: &Bytes,
        start: u64,
        end: u64,
        settings: &ChunkSettings,
    ) -> StorageResult<PutOutcome> {
        let mut retries = 0;
        loop {
            match self.put_range(drive, data, start, end).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if is_transient(&e) && retries < settings.max_retries => {
                    retries += 1;
                    tracing::warn!(
                        error = %e,
                        file_name = %self.request.file_name,
                        range_start = start,
                        range_end = end,
                        retry = retries,
                        "Chunk upload failed, retrying same range"
                    );
                    tokio::time::sleep(settings.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn put_range(
        &self,
        drive: &DriveStorage,
        data: &Bytes,
        start: u64,
        end: u64,
    ) -> StorageResult<PutOutcome> {
        let chunk = data.slice(start as usize..end as usize);
        let builder = drive
            .client
            .put(&self.session_uri)
            .header(CONTENT_RANGE, content_range(start, end, self.total_bytes))
            .body(chunk);

        let response = drive
            .send(builder, "Chunk upload", put_timeout(end - start))
            .await?;
        interpret(response).await
    }

    /// `Content-Range: bytes */total` asks where the session stands.
    async fn query_status(&self, drive: &DriveStorage) -> StorageResult<DriveFile> {
        let builder = drive
            .client
            .put(&self.session_uri)
            .header(CONTENT_LENGTH, "0")
            .header(CONTENT_RANGE, format!("bytes */{}", self.total_bytes));

        let response = drive
            .send(builder, "Upload status query", SESSION_INIT_TIMEOUT)
            .await?;
        match interpret(response).await? {
            PutOutcome::Complete(file) => Ok(file),
            PutOutcome::Continue { acknowledged } => Err(UploadError::IncompleteUpload {
                acknowledged,
                total: self.total_bytes,
            }),
        }
    }

    fn complete(&mut self, file: DriveFile) -> UploadedFile {
        let uploaded = file.into_uploaded(&self.request);
        self.bytes_sent = self.total_bytes;
        self.state = SessionState::Complete(uploaded.clone());
        uploaded
    }

    fn fail(&mut self, err: UploadError) -> UploadError {
        self.state = SessionState::Failed(err.clone());
        err
    }
}

/// `bytes start-(end-1)/total`
pub(super) fn content_range(start: u64, end: u64, total: u64) -> String {
    format!("bytes {}-{}/{}", start, end.saturating_sub(1), total)
}

/// `Range: bytes=0-N` means `N + 1` bytes are stored; no header means none.
pub(super) fn acknowledged_bytes(range: Option<&str>) -> u64 {
    range
        .and_then(|r| r.trim().strip_prefix("bytes="))
        .and_then(|r| r.split_once('-'))
        .and_then(|(_, last)| last.trim().parse::<u64>().ok())
        .map(|last| last + 1)
        .unwrap_or(0)
}

async fn interpret(response: Response) -> StorageResult<PutOutcome> {
    let status = response.status();
    if status == StatusCode::PERMANENT_REDIRECT {
        let range = response.headers().get(RANGE).and_then(|v| v.to_str().ok());
        return Ok(PutOutcome::Continue {
            acknowledged: acknowledged_bytes(range),
        });
    }
    if status.is_success() {
        return Ok(PutOutcome::Complete(read_file(response).await?));
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_for_status(status, &body))
}
