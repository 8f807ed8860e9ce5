use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::transport::ResponseHandler;

pub mod delay;
pub mod h1;
pub mod response;

pub use delay::{DelayConnectingSocket, HostConnection};
pub use h1::Http1Session;
pub use response::{BodyFraming, ResponseHeaders};

/// One chunked HTTP request/response exchange with the host.
///
/// The request side and the response side progress independently. Request
/// headers can be added until the first body write flushes them. Response
/// accessors start reading the response on first use.
#[async_trait]
pub trait HttpSocket: Send + Sync {
    /// Ignored once the request headers have been sent.
    fn add_request_header(&self, name: &str, value: &str);

    /// Register the sink for the response body. Body decoding waits until a
    /// handler is registered.
    fn set_response_handler(&self, handler: Arc<dyn ResponseHandler>);

    /// Send `data` as one chunk, preceded by the request headers if they have
    /// not been sent yet. An empty write only flushes pending headers.
    async fn write_to_request(&self, data: &[u8]) -> Result<()>;

    /// Send the terminating zero-length chunk.
    async fn complete_request(&self) -> Result<()>;

    /// Status code of the response; 500 if the status line is malformed.
    async fn response_status_code(&self) -> Result<u16>;

    /// Value of a response header, `None` if absent.
    async fn response_header(&self, name: &str) -> Result<Option<String>>;

    /// Resolves once the whole body has been delivered to the handler.
    async fn wait_for_response_complete(&self) -> Result<()>;

    /// Cancel any outstanding response read and close the connection.
    fn close(&self);
}
