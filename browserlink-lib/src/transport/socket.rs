use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{BrowserLinkError, Result};
use crate::transport::params::TransportParams;

/// Byte transport to the host.
///
/// At most one send and one receive may be in flight at a time. A second
/// concurrent call of the same kind fails immediately with
/// [`BrowserLinkError::SendInProgress`] / [`BrowserLinkError::ReceiveInProgress`].
/// After [`close`](SocketAdapter::close), in-flight operations complete with
/// zero bytes and later operations are not attempted.
#[async_trait]
pub trait SocketAdapter: Send + Sync {
    /// Send every range in order as one logical operation.
    async fn send(&self, buffers: &[&[u8]]) -> Result<()>;

    /// Receive into `buf`, returning the number of bytes read (0 at end of stream).
    async fn receive(&self, buf: &mut [u8]) -> Result<usize>;

    fn close(&self);
}

/// [`SocketAdapter`] over a tokio `TcpStream`.
pub struct TcpSocket {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    closed: CancellationToken,
}

impl TcpSocket {
    pub async fn connect(host: &str, port: u16, params: &TransportParams) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        params.apply(&stream)?;
        debug!(host = %host, port = port, "connected to host");
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: CancellationToken::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl SocketAdapter for TcpSocket {
    async fn send(&self, buffers: &[&[u8]]) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        let mut writer = self.writer.try_lock().map_err(|_| BrowserLinkError::SendInProgress)?;

        let write_all = async {
            for buf in buffers {
                writer.write_all(buf).await?;
            }
            writer.flush().await
        };

        tokio::select! {
            _ = self.closed.cancelled() => Ok(()),
            res = write_all => match res {
                Ok(()) => Ok(()),
                Err(_) if self.closed.is_cancelled() => Ok(()),
                Err(e) => Err(e.into()),
            },
        }
    }

    async fn receive(&self, buf: &mut [u8]) -> Result<usize> {
        if self.closed.is_cancelled() {
            return Ok(0);
        }
        let mut reader = self.reader.try_lock().map_err(|_| BrowserLinkError::ReceiveInProgress)?;

        tokio::select! {
            _ = self.closed.cancelled() => Ok(0),
            res = reader.read(buf) => match res {
                Ok(n) => Ok(n),
                Err(_) if self.closed.is_cancelled() => Ok(0),
                Err(e) => Err(e.into()),
            },
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }
}
