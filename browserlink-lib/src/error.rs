use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by the host transport and the host HTTP session.
///
/// Discovery never produces these: a missing index file or named event is a
/// normal "not found" outcome and is reported as `None`.
#[derive(Debug, Clone, Error)]
pub enum BrowserLinkError {
    #[error("I/O error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("a send operation is already in progress")]
    SendInProgress,

    #[error("a receive operation is already in progress")]
    ReceiveInProgress,

    #[error("connection closed")]
    Closed,

    #[error("invalid host uri: {0}")]
    InvalidUri(String),

    #[error("invalid chunk length: {0:?}")]
    ChunkLength(String),

    #[error("response failed: {0}")]
    ResponseFailed(String),
}

impl From<std::io::Error> for BrowserLinkError {
    fn from(e: std::io::Error) -> Self {
        BrowserLinkError::Io(Arc::new(e))
    }
}

impl BrowserLinkError {
    /// True for an error produced because the socket was deliberately closed
    /// while an operation was in flight.
    pub fn is_aborted(&self) -> bool {
        match self {
            BrowserLinkError::Closed => true,
            BrowserLinkError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionAborted | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BrowserLinkError>;
