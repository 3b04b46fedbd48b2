//! Stream buffering
//!
//! Drains an attachment stream into one contiguous buffer under an overall
//! deadline and a size ceiling. Silence longer than the stall threshold is
//! only logged; the deadline is what ends a stuck transfer.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use relaydrive_core::constants::MIB;
use relaydrive_core::{UploadConfig, UploadError, UploadResult};
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};

/// Boxed source of attachment bytes
pub type ByteStream = Pin<Box<dyn Stream<Item = UploadResult<Bytes>> + Send>>;

#[derive(Debug, Clone)]
pub struct BufferOptions {
    pub timeout: Duration,
    pub max_bytes: u64,
    pub stall_warning: Duration,
    /// Shown in log lines and the timeout message
    pub label: String,
}

impl BufferOptions {
    pub fn from_config(config: &UploadConfig, label: impl Into<String>) -> Self {
        Self {
            timeout: config.buffer_timeout,
            max_bytes: config.max_file_size_bytes,
            stall_warning: config.buffer_stall_warning,
            label: label.into(),
        }
    }
}

fn progress_step(received: u64) -> u64 {
    if received < 10 * MIB {
        MIB
    } else if received < 50 * MIB {
        5 * MIB
    } else {
        10 * MIB
    }
}

/// Collect `stream` into a single buffer.
///
/// Returning early drops the stream, which aborts the source.
pub async fn bufferize<S>(stream: S, options: &BufferOptions) -> UploadResult<Bytes>
where
    S: Stream<Item = UploadResult<Bytes>> + Send,
{
    let started = Instant::now();
    let deadline = sleep(options.timeout);
    let stall = sleep_until(started + options.stall_warning);
    tokio::pin!(stream, deadline, stall);

    let mut chunks: Vec<Bytes> = Vec::new();
    let mut received: u64 = 0;
    let mut next_progress = MIB;

    loop {
        tokio::select! {
            _ = &mut deadline => {
                tracing::error!(
                    label = %options.label,
                    received_bytes = received,
                    timeout_ms = options.timeout.as_millis() as u64,
                    "Stream buffering timed out"
                );
                return Err(UploadError::timeout(
                    format!("Buffering {}", options.label),
                    options.timeout,
                ));
            }
            _ = &mut stall => {
                tracing::warn!(
                    label = %options.label,
                    received_bytes = received,
                    silent_ms = options.stall_warning.as_millis() as u64,
                    "No data received from stream"
                );
                stall.as_mut().reset(Instant::now() + options.stall_warning);
            }
            item = stream.next() => match item {
                Some(Ok(chunk)) => {
                    let total = received + chunk.len() as u64;
                    if total > options.max_bytes {
                        tracing::warn!(
                            label = %options.label,
                            received_bytes = total,
                            limit_bytes = options.max_bytes,
                            "Stream exceeded size limit, aborting"
                        );
                        return Err(UploadError::SizeExceeded {
                            limit: options.max_bytes,
                            received: total,
                        });
                    }
                    received = total;
                    if !chunk.is_empty() {
                        chunks.push(chunk);
                    }
                    if received >= next_progress {
                        tracing::debug!(
                            label = %options.label,
                            received_mb = received as f64 / MIB as f64,
                            "Buffering progress"
                        );
                        let step = progress_step(received);
                        next_progress = (received / step + 1) * step;
                    }
                    stall.as_mut().reset(Instant::now() + options.stall_warning);
                }
                Some(Err(e)) => {
                    tracing::warn!(
                        label = %options.label,
                        error = %e,
                        received_bytes = received,
                        "Stream failed while buffering"
                    );
                    return Err(e);
                }
                None => break,
            }
        }
    }

    let buffer = match chunks.len() {
        0 => Bytes::new(),
        1 => chunks.pop().unwrap_or_default(),
        _ => {
            let mut buf = BytesMut::with_capacity(received as usize);
            for chunk in chunks.drain(..) {
                buf.extend_from_slice(&chunk);
            }
            buf.freeze()
        }
    };

    tracing::debug!(
        label = %options.label,
        size_bytes = buffer.len(),
        duration_ms = started.elapsed().as_secs_f64() * 1000.0,
        "Stream buffered"
    );
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use relaydrive_core::{ErrorKind, ErrorMetadata};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    fn options(max_bytes: u64) -> BufferOptions {
        BufferOptions {
            timeout: Duration::from_secs(60),
            max_bytes,
            stall_warning: Duration::from_secs(20),
            label: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_bufferize_concatenates_in_order() {
        let parts = vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::new()),
            Ok(Bytes::from_static(b"wide ")),
            Ok(Bytes::from_static(b"world")),
        ];
        let buffer = bufferize(stream::iter(parts), &options(1024)).await.unwrap();
        assert_eq!(&buffer[..], b"hello wide world");
    }

    #[tokio::test]
    async fn test_bufferize_empty_stream() {
        let buffer = bufferize(stream::iter(Vec::<UploadResult<Bytes>>::new()), &options(10))
            .await
            .unwrap();
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_bufferize_stops_reading_past_limit() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let source = stream::iter((0..10).map(|_| Ok(Bytes::from(vec![0u8; 4])))).inspect(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        let err = bufferize(source, &options(10)).await.unwrap_err();

        assert_eq!(
            err,
            UploadError::SizeExceeded {
                limit: 10,
                received: 12
            }
        );
        assert_eq!(pulled.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_bufferize_passes_stream_error_through() {
        let parts = vec![
            Ok(Bytes::from(vec![1u8; MIB as usize])),
            Err(UploadError::Network("connection reset".to_string())),
        ];
        let err = assert_err!(bufferize(stream::iter(parts), &options(50 * MIB)).await);
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bufferize_times_out_on_silent_stream() {
        let err = bufferize(stream::pending::<UploadResult<Bytes>>(), &options(10))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("60000ms"), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_bufferize_survives_stall_below_deadline() {
        let slow = stream::once(async {
            tokio::time::sleep(Duration::from_secs(45)).await;
            Ok(Bytes::from_static(b"late"))
        });
        let buffer = assert_ok!(bufferize(slow, &options(10)).await);
        assert_eq!(&buffer[..], b"late");
    }
}
