use std::io;

use tokio::net::TcpStream;

/// Tunable parameters for connections to the Browser Link host.
///
/// Socket options map directly to kernel socket options; the buffer sizes
/// size the response reader and request streams built on top of a connection.
#[derive(Debug, Clone)]
pub struct TransportParams {
    /// Disable Nagle's algorithm (TCP_NODELAY). Request chunks are small and
    /// latency-sensitive. Default: true.
    pub nodelay: bool,

    /// Socket-level receive buffer size in bytes (SO_RCVBUF).
    /// `None` means leave the kernel default unchanged.
    pub recv_buf_size: Option<u32>,

    /// Socket-level send buffer size in bytes (SO_SNDBUF).
    /// `None` means leave the kernel default unchanged.
    pub send_buf_size: Option<u32>,

    /// Size of the response reader's receive buffer. Default: 10240 bytes.
    pub receive_buffer: usize,

    /// Initial buffer size for request streams. Default: 1024 bytes.
    pub request_buffer: usize,
}

impl Default for TransportParams {
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

impl TransportParams {
    /// Apply the socket options to a freshly connected host stream.
    pub fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = stream.as_raw_fd();
            for (opt, size) in [(libc::SO_RCVBUF, self.recv_buf_size), (libc::SO_SNDBUF, self.send_buf_size)] {
                if let Some(size) = size {
                    set_buffer_size(fd, opt, size)?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(unix)]
fn set_buffer_size(fd: std::os::unix::io::RawFd, opt: libc::c_int, size: u32) -> io::Result<()> {
    let size = size as libc::c_int;
    // SAFETY: `fd` is a live socket and `size` outlives the call.
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            opt,
            &size as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_apply_sets_nodelay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();

        TransportParams::default().apply(&stream).unwrap();
        assert!(stream.nodelay().unwrap());

        let params = TransportParams { nodelay: false, ..Default::default() };
        params.apply(&stream).unwrap();
        assert!(!stream.nodelay().unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_apply_buffer_sizes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();

        let params = TransportParams {
            recv_buf_size: Some(64 * 1024),
            send_buf_size: Some(64 * 1024),
            ..Default::default()
        };
        params.apply(&stream).unwrap();
    }
}
