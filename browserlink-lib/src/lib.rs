//! Browser Link passthrough filter pipeline.
//!
//! Finds a running host for an application through its published index,
//! talks to it with a minimal chunked HTTP/1.1 client, and streams HTML
//! response bodies through it for script injection, falling back to plain
//! passthrough whenever the host is missing, slow or failing.

pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod host;
pub mod mapping;
pub mod middleware;
pub mod protocol;
pub mod stream;
pub mod transport;

pub use error::{BrowserLinkError, Result};
pub use filter::{FilterContext, FilterParams, ResponseBody, ScriptInjectionFilterStream, TimeoutBreaker, WriterBody};
pub use host::{DirectoryParams, HostConnectionData, HostDirectory};
pub use mapping::MappingDataWriter;
pub use middleware::{BrowserLinkMiddleware, BrowserLinkRequest};
pub use protocol::{DelayConnectingSocket, Http1Session, HttpSocket};
pub use stream::HostRequestStream;
pub use transport::TransportParams;
