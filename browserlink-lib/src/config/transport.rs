use serde::{Deserialize, Serialize};
use crate::transport::params::TransportParams;

/// Host connection socket and buffer options.
/// Nests under top-level `transport` in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Disable Nagle's algorithm (TCP_NODELAY). Default: true.
    pub nodelay: bool,
    /// SO_RCVBUF in bytes. `null` = OS default.
    pub recv_buf_size: Option<u32>,
    /// SO_SNDBUF in bytes. `null` = OS default.
    pub send_buf_size: Option<u32>,
    /// Response reader buffer (bytes). Default: 10240.
    pub receive_buffer: usize,
    /// Initial buffer size of request streams (bytes). Default: 1024.
    pub request_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            recv_buf_size: None,
            send_buf_size: None,
            receive_buffer: 10240,
            request_buffer: 1024,
        }
    }
}

impl From<&TransportConfig> for TransportParams {
    fn from(c: &TransportConfig) -> Self {
        TransportParams {
            nodelay: c.nodelay,
            recv_buf_size: c.recv_buf_size,
            send_buf_size: c.send_buf_size,
            receive_buffer: c.receive_buffer,
            request_buffer: c.request_buffer,
        }
    }
}
