use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{BrowserLinkError, Result};
use crate::transport::socket::SocketAdapter;

pub const DEFAULT_RECEIVE_BUFFER: usize = 10240;

/// Sink for raw response body bytes.
///
/// `data` borrows the reader's receive buffer and is only valid for the
/// duration of the call.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    async fn on_data(&self, data: &[u8]) -> Result<()>;
}

/// Character encoding used by [`SocketReader::read_char`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    /// 7-bit ASCII; bytes above 0x7F decode as `?`.
    #[default]
    Ascii,
    Latin1,
    Utf8,
}

impl TextEncoding {
    /// Decode one character from the front of `bytes`.
    ///
    /// Returns `None` when `bytes` holds only the start of a multi-byte
    /// sequence, in which case nothing should be consumed yet.
    fn decode(self, bytes: &[u8]) -> Option<(char, usize)> {
        let first = *bytes.first()?;
        match self {
            TextEncoding::Ascii => {
                let c = if first < 0x80 { first as char } else { '?' };
                Some((c, 1))
            }
            TextEncoding::Latin1 => Some((first as char, 1)),
            TextEncoding::Utf8 => {
                let width = match first {
                    0x00..=0x7F => 1,
                    0xC2..=0xDF => 2,
                    0xE0..=0xEF => 3,
                    0xF0..=0xF4 => 4,
                    _ => return Some((char::REPLACEMENT_CHARACTER, 1)),
                };
                if bytes.len() < width {
                    return None;
                }
                match std::str::from_utf8(&bytes[..width]) {
                    Ok(s) => s.chars().next().map(|c| (c, width)),
                    Err(_) => Some((char::REPLACEMENT_CHARACTER, 1)),
                }
            }
        }
    }
}

/// Character, line and raw byte reader over a [`SocketAdapter`].
///
/// Every read takes a cancellation token. When the token is already cancelled
/// character and line reads return `'\0'` / `""` without consuming anything;
/// cancellation during a receive stops the read once that receive returns.
pub struct SocketReader {
    socket: Arc<dyn SocketAdapter>,
    buffer: Box<[u8]>,
    pos: usize,
    end: usize,
    encoding: TextEncoding,
}

impl SocketReader {
    pub fn new(socket: Arc<dyn SocketAdapter>) -> Self {
        Self::with_capacity(socket, DEFAULT_RECEIVE_BUFFER)
    }

    pub fn with_capacity(socket: Arc<dyn SocketAdapter>, capacity: usize) -> Self {
        Self {
            socket,
            buffer: vec![0u8; capacity.max(4)].into_boxed_slice(),
            pos: 0,
            end: 0,
            encoding: TextEncoding::default(),
        }
    }

    pub fn set_encoding(&mut self, encoding: TextEncoding) {
        self.encoding = encoding;
    }

    pub async fn read_char(&mut self, cancel: &CancellationToken) -> Result<char> {
        loop {
            if cancel.is_cancelled() {
                return Ok('\0');
            }

            if let Some((c, used)) = self.encoding.decode(&self.buffer[self.pos..self.end]) {
                self.pos += used;
                return Ok(c);
            }

            if self.receive_more(cancel).await? == 0 {
                if cancel.is_cancelled() {
                    return Ok('\0');
                }
                return Err(BrowserLinkError::Closed);
            }
        }
    }

    /// Read up to the next CRLF, which is not included in the result.
    ///
    /// A CR not followed by LF is kept, a lone LF is ordinary content. Of two
    /// consecutive CRs only the second is kept.
    pub async fn read_line(&mut self, cancel: &CancellationToken) -> Result<String> {
        let mut line = String::new();
        let mut found_cr = false;

        loop {
            let c = self.read_char(cancel).await?;
            if cancel.is_cancelled() {
                break;
            }

            if c == '\r' {
                if !found_cr {
                    found_cr = true;
                    continue;
                }
            } else if found_cr {
                if c == '\n' {
                    break;
                }
                found_cr = false;
                line.push('\r');
            }

            line.push(c);
        }

        Ok(line)
    }

    /// Deliver exactly `total` raw bytes to `handler`, refilling from the
    /// socket as needed. Returns the number of bytes delivered, which is less
    /// than `total` only when cancelled.
    pub async fn read_bytes_into_handler(
        &mut self,
        total: u64,
        handler: &dyn ResponseHandler,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut remaining = total;
        let mut delivered = 0u64;

        while remaining > 0 {
            if cancel.is_cancelled() {
                break;
            }

            if self.pos == self.end && self.receive_more(cancel).await? == 0 {
                if cancel.is_cancelled() {
                    break;
                }
                return Err(BrowserLinkError::Closed);
            }

            let available = (self.end - self.pos) as u64;
            let take = remaining.min(available) as usize;

            handler.on_data(&self.buffer[self.pos..self.pos + take]).await?;

            self.pos += take;
            delivered += take as u64;
            remaining -= take as u64;
        }

        Ok(delivered)
    }

    /// Move unread bytes to the front of the buffer and receive after them.
    async fn receive_more(&mut self, cancel: &CancellationToken) -> Result<usize> {
        let leftover = self.end - self.pos;
        if leftover > 0 && self.pos > 0 {
            self.buffer.copy_within(self.pos..self.end, 0);
        }
        self.pos = 0;
        self.end = leftover;

        if leftover == self.buffer.len() {
            return Ok(0);
        }

        let received = tokio::select! {
            _ = cancel.cancelled() => 0,
            res = self.socket.receive(&mut self.buffer[leftover..]) => res?,
        };
        self.end += received;
        Ok(received)
    }
}
