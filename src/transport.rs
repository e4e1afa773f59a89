use std::time::Duration;

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use parking_lot::Mutex;

use crate::error::ProxyError;

/// Overall ceiling per upstream call, sized for long streams.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(600);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const POOL_MAX_IDLE_PER_HOST: usize = 100;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Retries after the initial attempt.
pub(crate) const MAX_RETRIES: u32 = 3;

#[inline]
pub(crate) fn should_retry_status(status: http::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

/// Backoff after failed attempt `i` (zero-based): `2^i` seconds.
#[inline]
pub(crate) fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(6))
}

// ---------------------------------------------------------------------------
// Buffer pool
// ---------------------------------------------------------------------------

const POOL_MAX_BUFFERS: usize = 32;
const POOL_MAX_RETAINED_CAPACITY: usize = 256 * 1024;

/// Process-wide pool of scratch buffers for marshaling outbound bodies.
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
        }
    }

    /// Borrow a cleared buffer; it returns to the pool when the guard
    /// drops, on every exit path.
    #[must_use]
    pub fn acquire(&self) -> PooledBuf<'_> {
        let buf = self.buffers.lock().pop().unwrap_or_default();
        PooledBuf { pool: self, buf }
    }

    fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() > POOL_MAX_RETAINED_CAPACITY {
            return;
        }
        buf.clear();
        let mut buffers = self.buffers.lock();
        if buffers.len() < POOL_MAX_BUFFERS {
            buffers.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard over a pooled buffer.
pub struct PooledBuf<'a> {
    pool: &'a BufferPool,
    buf: Vec<u8>,
}

impl PooledBuf<'_> {
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

impl std::io::Write for PooledBuf<'_> {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for PooledBuf<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}

// ---------------------------------------------------------------------------
// HTTP transport
// ---------------------------------------------------------------------------

/// Shared upstream HTTP client with connection pooling and the outbound
/// body buffer pool.
pub struct HttpTransport {
    client: reqwest::Client,
    buffers: BufferPool,
}

impl HttpTransport {
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .tcp_nodelay(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .unwrap_or_else(|err| {
                tracing::error!(error = %err, "failed to build configured HTTP client, falling back to default client");
                reqwest::Client::new()
            });

        Self {
            client,
            buffers: BufferPool::new(),
        }
    }

    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Marshal `value` through a pooled scratch buffer into the bytes
    /// reused across retry attempts.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Internal`] when serialization fails.
    pub fn marshal_body<T: serde::Serialize>(&self, value: &T) -> Result<Bytes, ProxyError> {
        let mut buf = self.buffers.acquire();
        serde_json::to_writer(&mut buf, value)
            .map_err(|e| ProxyError::Internal(format!("request marshal error: {e}")))?;
        Ok(Bytes::copy_from_slice(buf.as_slice()))
    }

    /// POST `body` to `url` with retries.
    ///
    /// An attempt is retried when the transport fails or the status is
    /// 429/5xx, waiting `2^i` seconds after failed attempt `i`, up to
    /// [`MAX_RETRIES`] retries. Any other status returns the response
    /// as-is; the caller decides how to surface non-200s. Dropping the
    /// returned future aborts the in-flight upstream request.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::UpstreamTransport`] when every attempt
    /// failed at the transport level.
    pub async fn post_json(
        &self,
        url: &str,
        auth: &str,
        body: Bytes,
    ) -> Result<reqwest::Response, ProxyError> {
        let mut attempt: u32 = 0;
        loop {
            let result = self
                .client
                .post(url)
                .header(AUTHORIZATION, auth)
                .header(CONTENT_TYPE, "application/json")
                .body(reqwest::Body::from(body.clone()))
                .send()
                .await;

            match result {
                Ok(response) => {
                    if attempt < MAX_RETRIES && should_retry_status(response.status()) {
                        let delay = retry_backoff(attempt);
                        tracing::debug!(
                            status = response.status().as_u16(),
                            retry_attempt = attempt + 1,
                            delay_secs = delay.as_secs(),
                            "retrying upstream request after retriable status"
                        );
                        drop(response);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if attempt >= MAX_RETRIES {
                        return Err(ProxyError::UpstreamTransport(err.to_string()));
                    }
                    let delay = retry_backoff(attempt);
                    tracing::debug!(
                        retry_attempt = attempt + 1,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "retrying upstream request after transport error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry_status() {
        assert!(should_retry_status(http::StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry_status(http::StatusCode::INTERNAL_SERVER_ERROR));
        assert!(should_retry_status(http::StatusCode::SERVICE_UNAVAILABLE));
        assert!(!should_retry_status(http::StatusCode::BAD_REQUEST));
        assert!(!should_retry_status(http::StatusCode::UNAUTHORIZED));
        assert!(!should_retry_status(http::StatusCode::OK));
    }

    #[test]
    fn test_retry_backoff_doubles() {
        assert_eq!(retry_backoff(0), Duration::from_secs(1));
        assert_eq!(retry_backoff(1), Duration::from_secs(2));
        assert_eq!(retry_backoff(2), Duration::from_secs(4));
    }

    #[test]
    fn test_buffer_pool_reuses_allocations() {
        let pool = BufferPool::new();
        {
            let mut buf = pool.acquire();
            std::io::Write::write_all(&mut buf, b"hello world").unwrap();
        }
        let reused = pool.acquire();
        assert!(reused.as_slice().is_empty());
        assert!(reused.buf.capacity() >= 11);
    }

    #[test]
    fn test_buffer_pool_drops_oversized_buffers() {
        let pool = BufferPool::new();
        {
            let mut buf = pool.acquire();
            buf.buf.reserve(POOL_MAX_RETAINED_CAPACITY + 1);
        }
        assert!(pool.buffers.lock().is_empty());
    }

    #[test]
    fn test_marshal_body_round_trips() {
        let transport = HttpTransport::new();
        let body = transport
            .marshal_body(&serde_json::json!({"model": "m", "stream": true}))
            .unwrap();
        let back: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(back["model"], "m");
        assert_eq!(back["stream"], true);
    }
}
