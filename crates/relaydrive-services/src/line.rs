//! LINE Messaging API client
//!
//! Push messages go to the bot API host, attachment content comes from the
//! data API host. Opening an attachment stream is retried with a longer
//! timeout on every attempt and a jittered backoff between attempts.

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use rand::Rng;
use relaydrive_core::{LineConfig, UploadError, UploadResult};
use relaydrive_infra::ByteStream;
use reqwest::{Client, Response, StatusCode};
use serde_json::json;
use std::time::Duration;

use crate::{AttachmentSource, Notifier};

const PUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry schedule for opening attachment content
#[derive(Debug, Clone)]
pub struct DownloadRetry {
    pub attempts: u32,
    pub base_timeout: Duration,
    /// Added to the timeout on every further attempt
    pub timeout_step: Duration,
    /// Backoff after the n-th failure is `n * backoff_step` plus jitter
    pub backoff_step: Duration,
    pub max_jitter: Duration,
}

impl Default for DownloadRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_timeout: Duration::from_secs(30),
            timeout_step: Duration::from_secs(15),
            backoff_step: Duration::from_secs(5),
            max_jitter: Duration::from_secs(2),
        }
    }
}

impl DownloadRetry {
    /// Timeout of attempt `attempt` (0-based): 30s, 45s, 60s by default.
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        self.base_timeout + self.timeout_step * attempt
    }

    fn backoff_after(&self, failures: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = Duration::from_millis(rand::rng().random_range(0..=jitter_ms));
        self.backoff_step * failures + jitter
    }
}

#[derive(Clone)]
pub struct LineClient {
    client: Client,
    access_token: String,
    api_url: String,
    data_api_url: String,
    retry: DownloadRetry,
}

impl LineClient {
    pub fn new(config: &LineConfig) -> anyhow::Result<Self> {
        let access_token = config
            .channel_access_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .context("LINE_CHANNEL_ACCESS_TOKEN is not set")?;

        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to create HTTP client for LINE")?;

        Ok(Self {
            client,
            access_token,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            data_api_url: config.data_api_url.trim_end_matches('/').to_string(),
            retry: DownloadRetry::default(),
        })
    }

    pub fn with_download_retry(mut self, retry: DownloadRetry) -> Self {
        self.retry = retry;
        self
    }

    #[tracing::instrument(skip(self, text))]
    pub async fn push_text(&self, to: &str, text: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .post(format!("{}/v2/bot/message/push", self.api_url))
            .bearer_auth(&self.access_token)
            .timeout(PUSH_TIMEOUT)
            .json(&json!({
                "to": to,
                "messages": [{ "type": "text", "text": text }],
            }))
            .send()
            .await
            .context("Failed to send LINE push message")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LINE push failed with HTTP {}: {}", status.as_u16(), body);
        }
        Ok(())
    }

    async fn open_content(&self, message_id: &str, timeout: Duration) -> UploadResult<Response> {
        let request = self
            .client
            .get(format!(
                "{}/v2/bot/message/{}/content",
                self.data_api_url, message_id
            ))
            .bearer_auth(&self.access_token)
            .send();

        let response = match tokio::time::timeout(timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(map_reqwest_error(e)),
            Err(_) => return Err(UploadError::timeout("Attachment download", timeout)),
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(error_for_status(status, &body))
    }
}

#[async_trait]
impl Notifier for LineClient {
    async fn notify(&self, recipient: &str, text: &str) -> anyhow::Result<()> {
        self.push_text(recipient, text).await
    }
}

#[async_trait]
impl AttachmentSource for LineClient {
    async fn fetch(&self, message_id: &str) -> UploadResult<ByteStream> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 0;

        loop {
            let timeout = self.retry.timeout_for(attempt);
            match self.open_content(message_id, timeout).await {
                Ok(response) => {
                    tracing::debug!(
                        message_id = %message_id,
                        attempt = attempt + 1,
                        content_length = ?response.content_length(),
                        "Attachment stream opened"
                    );
                    let stream = response
                        .bytes_stream()
                        .map(|chunk| chunk.map_err(map_reqwest_error));
                    return Ok(Box::pin(stream));
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= attempts {
                        tracing::error!(
                            message_id = %message_id,
                            error = %e,
                            attempts = attempt,
                            "Attachment download failed"
                        );
                        return Err(e);
                    }
                    let delay = self.retry.backoff_after(attempt);
                    tracing::warn!(
                        message_id = %message_id,
                        error = %e,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Attachment download failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> UploadError {
    if err.is_timeout() {
        UploadError::timeout("Attachment download", Duration::ZERO)
    } else if err.is_connect() || err.is_request() || err.is_body() || err.is_decode() {
        UploadError::network(err)
    } else {
        UploadError::Unknown(err.to_string())
    }
}

fn error_for_status(status: StatusCode, body: &str) -> UploadError {
    let cause = format!("HTTP {}: {}", status.as_u16(), body.trim());
    match status.as_u16() {
        401 | 403 => UploadError::PermissionDenied(cause),
        408 => UploadError::timeout(format!("Attachment download ({cause})"), Duration::ZERO),
        429 | 500 | 502 | 503 | 504 => UploadError::Network(cause),
        _ => UploadError::Unknown(cause),
    }
}
