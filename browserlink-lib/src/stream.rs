use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::engine::RevolvingBuffers;
use crate::error::{BrowserLinkError, Result};
use crate::protocol::HttpSocket;

/// Default starting size of request stream buffers.
pub const DEFAULT_REQUEST_BUFFER: usize = 1024;

/// Write-only sink that streams into a host request body.
///
/// Writes are buffered and never block. A background task forwards each
/// buffer as one request chunk, then completes the request and closes the
/// socket once the stream is closed.
pub struct HostRequestStream {
    buffers: Option<Arc<RevolvingBuffers>>,
    pump: Option<JoinHandle<Result<()>>>,
}

impl HostRequestStream {
    pub fn new(socket: Arc<dyn HttpSocket>) -> Self {
        Self::with_buffer_size(socket, DEFAULT_REQUEST_BUFFER)
    }

    pub fn with_buffer_size(socket: Arc<dyn HttpSocket>, buffer_size: usize) -> Self {
        let buffers = Arc::new(RevolvingBuffers::new(buffer_size));
        let pump = tokio::spawn(pump(buffers.clone(), socket));
        Self { buffers: Some(buffers), pump: Some(pump) }
    }

    /// Dropped silently once the stream is closed.
    pub fn write(&self, data: &[u8]) {
        if let Some(buffers) = &self.buffers {
            buffers.write(data);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.buffers.is_none()
    }

    /// Wait for buffered data to be sent, then end the request.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(buffers) = self.buffers.take() {
            buffers.wait_until_empty().await;
            buffers.dispose();
        }

        match self.pump.take() {
            Some(pump) => pump
                .await
                .map_err(|e| BrowserLinkError::ResponseFailed(e.to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for HostRequestStream {
    fn drop(&mut self) {
        let Some(buffers) = self.buffers.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    buffers.wait_until_empty().await;
                    buffers.dispose();
                });
            }
            Err(_) => buffers.dispose(),
        }
    }
}

async fn pump(buffers: Arc<RevolvingBuffers>, socket: Arc<dyn HttpSocket>) -> Result<()> {
    let result = forward(&buffers, socket.as_ref()).await;
    if let Err(e) = &result {
        debug!(error = %e, "host request stream failed");
        buffers.dispose();
    }
    socket.close();
    result
}

async fn forward(buffers: &RevolvingBuffers, socket: &dyn HttpSocket) -> Result<()> {
    while let Some(segment) = buffers.read_async().await {
        socket.write_to_request(&segment).await?;
    }
    socket.complete_request().await
}
