use bytes::{BufMut, Bytes, BytesMut};
use relaydrive_core::models::UploadedFile;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use super::{ensure_success, fields_query, is_transient, read_file, DriveStorage};
use crate::strategy::{multipart_retry_delay, multipart_timeout, MULTIPART_MAX_RETRIES};
use crate::{StorageResult, UploadRequest};

impl DriveStorage {
    /// Metadata and body in one request, retried on transient failures.
    pub(super) async fn upload_multipart(
        &self,
        request: &UploadRequest,
    ) -> StorageResult<UploadedFile> {
        let timeout = multipart_timeout(request.size());
        let mut retry = 0;

        loop {
            match self
                .send_multipart(request, timeout, "Multipart upload")
                .await
            {
                Ok(file) => return Ok(file),
                Err(e) if is_transient(&e) && retry < MULTIPART_MAX_RETRIES => {
                    let delay = multipart_retry_delay(self.chunks.multipart_retry_base, retry);
                    retry += 1;
                    tracing::warn!(
                        error = %e,
                        file_name = %request.file_name,
                        retry = retry,
                        delay_ms = delay.as_millis() as u64,
                        "Multipart upload failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub(super) async fn send_multipart(
        &self,
        request: &UploadRequest,
        timeout: Duration,
        operation: &str,
    ) -> StorageResult<UploadedFile> {
        let boundary = format!("relaydrive-{}", Uuid::new_v4().simple());
        let body = multipart_body(&boundary, request);

        let builder = self
            .client
            .post(self.files_upload_url())
            .query(&[("uploadType", "multipart")])
            .query(&fields_query())
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body);

        let response = self
            .send(self.authorized(builder).await?, operation, timeout)
            .await?;
        let response = ensure_success(response).await?;
        let file = read_file(response).await?;

        tracing::debug!(file_id = %file.id, file_name = %request.file_name, "Multipart upload accepted");
        Ok(file.into_uploaded(request))
    }
}

/// `multipart/related` body: JSON metadata part, then the media part.
pub(super) fn multipart_body(boundary: &str, request: &UploadRequest) -> Bytes {
    let metadata = json!({
        "name": request.file_name,
        "parents": [request.destination],
    });

    let mut body = BytesMut::with_capacity(request.data.len() + 512);
    body.put_slice(format!("--{boundary}\r\n").as_bytes());
    body.put_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.put_slice(metadata.to_string().as_bytes());
    body.put_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.put_slice(format!("Content-Type: {}\r\n\r\n", request.mime_type).as_bytes());
    body.put_slice(&request.data);
    body.put_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body.freeze()
}
