//! Response-body filter that routes HTML through the host for script injection.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::Result;
use crate::transport::ResponseHandler;

pub mod content_type;
pub mod stream;

pub use stream::{FilterState, ScriptInjectionFilterStream};

/// Bytes the host sends ahead of the filtered body so the response headers
/// arrive before filtering starts.
pub const FILTER_PREAMBLE: &[u8] = &[0xFF];

/// Runtime filter parameters derived from [`crate::config::FilterConfig`].
#[derive(Debug, Clone)]
pub struct FilterParams {
    pub timeout_limit: u32,
    pub injection_timeout: Duration,
    pub sniff_bytes: usize,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            timeout_limit: 2,
            injection_timeout: Duration::from_millis(1000),
            sniff_bytes: 512,
        }
    }
}

/// What the filter needs to know about the response it replaces.
pub trait FilterContext: Send + Sync {
    /// App-relative request path, if the request has one.
    fn request_path(&self) -> Option<String>;

    /// Content-Type the application set on the response.
    fn response_content_type(&self) -> Option<String>;

    /// The real response body.
    fn response_body(&self) -> Arc<dyn ResponseBody>;
}

/// Write side of a response body, shared between the filter and the host
/// response handler.
#[async_trait]
pub trait ResponseBody: Send + Sync {
    async fn write(&self, data: &[u8]) -> Result<()>;
    async fn flush(&self) -> Result<()>;
}

/// [`ResponseBody`] over any async writer.
pub struct WriterBody<W> {
    inner: Mutex<W>,
}

impl<W> WriterBody<W> {
    pub fn new(writer: W) -> Self {
        Self { inner: Mutex::new(writer) }
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }

    pub async fn with_inner<R>(&self, f: impl FnOnce(&W) -> R) -> R {
        f(&*self.inner.lock().await)
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ResponseBody for WriterBody<W> {
    async fn write(&self, data: &[u8]) -> Result<()> {
        self.inner.lock().await.write_all(data).await?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.inner.lock().await.flush().await?;
        Ok(())
    }
}

/// Relays the host's filtered body to the real response, dropping the preamble.
pub struct PreambleSkippingHandler {
    body: Arc<dyn ResponseBody>,
    skipped: AtomicBool,
}

impl PreambleSkippingHandler {
    pub fn new(body: Arc<dyn ResponseBody>) -> Self {
        Self { body, skipped: AtomicBool::new(false) }
    }
}

#[async_trait]
impl ResponseHandler for PreambleSkippingHandler {
    async fn on_data(&self, data: &[u8]) -> Result<()> {
        let data = if self.skipped.swap(true, Ordering::SeqCst) {
            data
        } else {
            &data[FILTER_PREAMBLE.len().min(data.len())..]
        };
        if data.is_empty() {
            return Ok(());
        }
        self.body.write(data).await
    }
}

/// Consecutive script-injection timeouts.
///
/// Updates are plain atomic increments and resets, so concurrent requests may
/// trip the breaker one request early or late. It only gates a fallback.
#[derive(Debug, Default)]
pub struct TimeoutBreaker {
    timeouts: AtomicU32,
}

impl TimeoutBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared by every middleware instance in the process.
    pub fn process_wide() -> Arc<TimeoutBreaker> {
        static BREAKER: OnceLock<Arc<TimeoutBreaker>> = OnceLock::new();
        BREAKER.get_or_init(|| Arc::new(TimeoutBreaker::new())).clone()
    }

    pub fn is_tripped(&self, limit: u32) -> bool {
        self.timeouts.load(Ordering::Relaxed) >= limit
    }

    pub fn count(&self) -> u32 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn record(&self, timed_out: bool, limit: u32) {
        if timed_out {
            let count = self.timeouts.fetch_add(1, Ordering::Relaxed) + 1;
            if count == limit {
                warn!(timeouts = count, "host unresponsive, script injection disabled");
            }
        } else if self.timeouts.swap(0, Ordering::Relaxed) >= limit {
            info!("script injection re-enabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_preamble_skipped_once() {
        let body = Arc::new(WriterBody::new(Vec::new()));
        let handler = PreambleSkippingHandler::new(body.clone());

        handler.on_data(b"\xFFFiltered").await.unwrap();
        handler.on_data(b" content").await.unwrap();

        assert_eq!(body.with_inner(|v| v.clone()).await, b"Filtered content");
    }

    #[tokio::test]
    async fn test_preamble_skipped_regardless_of_value() {
        let body = Arc::new(WriterBody::new(Vec::new()));
        let handler = PreambleSkippingHandler::new(body.clone());

        handler.on_data(b"X").await.unwrap();
        handler.on_data(b"Y").await.unwrap();

        assert_eq!(body.with_inner(|v| v.clone()).await, b"Y");
    }

    #[test]
    fn test_breaker_trips_and_resets() {
        let breaker = TimeoutBreaker::new();
        breaker.record(true, 2);
        assert!(!breaker.is_tripped(2));
        breaker.record(true, 2);
        assert!(breaker.is_tripped(2));
        assert_eq!(breaker.count(), 2);

        breaker.record(false, 2);
        assert_eq!(breaker.count(), 0);
        assert!(!breaker.is_tripped(2));
    }

    #[test]
    fn test_breaker_success_resets_partial_count() {
        let breaker = TimeoutBreaker::new();
        breaker.record(true, 2);
        breaker.record(false, 2);
        breaker.record(true, 2);
        assert!(!breaker.is_tripped(2));
    }

    #[test]
    fn test_process_wide_breaker_is_shared() {
        assert!(Arc::ptr_eq(&TimeoutBreaker::process_wide(), &TimeoutBreaker::process_wide()));
    }
}
