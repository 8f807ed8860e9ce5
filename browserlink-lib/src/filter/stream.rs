use std::sync::Arc;

use tracing::{debug, warn};

use super::content_type::{is_html, is_supported_content_type};
use super::{FilterContext, FilterParams, PreambleSkippingHandler, ResponseBody};
use crate::error::Result;
use crate::protocol::HttpSocket;

const STATUS_OK: u16 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    NothingSentToFilter,
    ContentSentToFilter,
    Passthrough,
}

enum FirstResponse {
    Ok,
    Status(u16),
    TimedOut,
    Failed(crate::error::BrowserLinkError),
}

/// Response-body replacement that sends HTML to the host for script
/// injection and passes everything else straight through.
///
/// The first write decides. Non-HTML content, a failed send, a non-200
/// status or no status within the injection timeout all switch the stream to
/// passthrough and replay that write to the real body. Once content has been
/// committed to the host, later failures are returned to the caller.
pub struct ScriptInjectionFilterStream {
    socket: Option<Arc<dyn HttpSocket>>,
    context: Arc<dyn FilterContext>,
    output: Arc<dyn ResponseBody>,
    state: FilterState,
    timed_out: bool,
    params: FilterParams,
}

impl ScriptInjectionFilterStream {
    pub fn new(socket: Arc<dyn HttpSocket>, context: Arc<dyn FilterContext>, params: FilterParams) -> Self {
        let output = context.response_body();
        socket.set_response_handler(Arc::new(PreambleSkippingHandler::new(output.clone())));

        Self {
            socket: Some(socket),
            context,
            output,
            state: FilterState::NothingSentToFilter,
            timed_out: false,
            params,
        }
    }

    pub fn state(&self) -> FilterState {
        self.state
    }

    pub fn is_passthrough(&self) -> bool {
        self.state == FilterState::Passthrough
    }

    /// Content reached the host; falling back would lose it.
    pub fn sent_content_to_filter(&self) -> bool {
        self.state == FilterState::ContentSentToFilter
    }

    /// The host did not answer the first write in time.
    pub fn script_injection_timed_out(&self) -> bool {
        self.timed_out
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let first_write = self.state == FilterState::NothingSentToFilter;

        if first_write {
            self.decide_passthrough(data);
            self.forward_response_headers();
        }

        let socket = match (&self.socket, self.state) {
            (Some(socket), FilterState::NothingSentToFilter | FilterState::ContentSentToFilter) => socket.clone(),
            _ => return self.output.write(data).await,
        };

        self.state = FilterState::ContentSentToFilter;

        if first_write {
            self.first_write(socket, data).await
        } else {
            socket.write_to_request(data).await
        }
    }

    async fn first_write(&mut self, socket: Arc<dyn HttpSocket>, data: &[u8]) -> Result<()> {
        let response = match socket.write_to_request(data).await {
            Err(e) => FirstResponse::Failed(e),
            Ok(()) => match tokio::time::timeout(self.params.injection_timeout, socket.response_status_code()).await {
                Err(_) => FirstResponse::TimedOut,
                Ok(Ok(STATUS_OK)) => FirstResponse::Ok,
                Ok(Ok(status)) => FirstResponse::Status(status),
                Ok(Err(e)) => FirstResponse::Failed(e),
            },
        };

        match response {
            FirstResponse::Ok => return Ok(()),
            FirstResponse::TimedOut => {
                self.timed_out = true;
                warn!(
                    timeout_ms = self.params.injection_timeout.as_millis() as u64,
                    "host did not answer script injection in time"
                );
            }
            FirstResponse::Status(status) => warn!(status, "host refused script injection"),
            FirstResponse::Failed(e) => warn!(error = %e, "script injection request failed"),
        }

        self.become_passthrough();
        self.output.write(data).await
    }

    fn decide_passthrough(&mut self, data: &[u8]) {
        let content_type = self.context.response_content_type();
        if !is_supported_content_type(content_type.as_deref()) {
            debug!(content_type = ?content_type, "not an HTML content type, passing through");
            self.become_passthrough();
            return;
        }

        let path = self.context.request_path();
        if !is_html(path.as_deref(), data, self.params.sniff_bytes) {
            debug!(path = ?path, "body does not look like HTML, passing through");
            self.become_passthrough();
        }
    }

    fn forward_response_headers(&self) {
        if self.is_passthrough() {
            return;
        }
        if let Some(socket) = &self.socket {
            let content_type = self.context.response_content_type().unwrap_or_default();
            socket.add_request_header("Content-Type", &content_type);
        }
    }

    /// Tell the host the body is complete and wait for the filtered body to
    /// reach the real response. The stream is in passthrough afterwards.
    pub async fn wait_for_filter_complete(&mut self) -> Result<()> {
        let result = match (&self.socket, self.state) {
            (Some(socket), FilterState::ContentSentToFilter) => {
                let socket = socket.clone();
                match socket.complete_request().await {
                    Ok(()) => socket.wait_for_response_complete().await,
                    Err(e) => Err(e),
                }
            }
            _ => Ok(()),
        };

        self.become_passthrough();
        result
    }

    /// Complete filtering, then flush the real body. Writes after a flush are
    /// never filtered.
    pub async fn flush(&mut self) -> Result<()> {
        self.wait_for_filter_complete().await?;
        self.output.flush().await
    }

    /// Abandon the host connection without waiting for it.
    pub fn close(&mut self) {
        self.become_passthrough();
    }

    fn become_passthrough(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.close();
        }
        self.state = FilterState::Passthrough;
    }
}

impl Drop for ScriptInjectionFilterStream {
    fn drop(&mut self) {
        self.become_passthrough();
    }
}
