//! In-memory [`SocketAdapter`] for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{BrowserLinkError, Result};
use crate::transport::reader::ResponseHandler;
use crate::transport::socket::SocketAdapter;

#[derive(Default)]
pub(crate) struct MockSocket {
    sent: Mutex<Vec<u8>>,
    incoming: Mutex<Incoming>,
    notify: Notify,
    receiving: AtomicBool,
    fail_next_send: AtomicBool,
    closed: AtomicBool,
    /// Largest number of bytes returned by a single receive; 0 = unlimited.
    max_receive: usize,
}

#[derive(Default)]
struct Incoming {
    data: VecDeque<u8>,
    eof: bool,
    error: Option<std::io::ErrorKind>,
}

impl MockSocket {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Hand out received data at most `n` bytes at a time.
    pub(crate) fn fragmented(n: usize) -> Self {
        Self { max_receive: n, ..Self::default() }
    }

    pub(crate) fn push(&self, data: &[u8]) {
        self.incoming.lock().data.extend(data);
        self.notify.notify_one();
    }

    pub(crate) fn push_str(&self, data: &str) {
        self.push(data.as_bytes());
    }

    pub(crate) fn finish(&self) {
        self.incoming.lock().eof = true;
        self.notify.notify_one();
    }

    pub(crate) fn fail_receive(&self, kind: std::io::ErrorKind) {
        self.incoming.lock().error = Some(kind);
        self.notify.notify_one();
    }

    /// Make the next send fail with an I/O error.
    pub(crate) fn fail_next_send(&self) {
        self.fail_next_send.store(true, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<u8> {
        self.sent.lock().clone()
    }

    pub(crate) fn sent_string(&self) -> String {
        String::from_utf8_lossy(&self.sent.lock()).into_owned()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SocketAdapter for MockSocket {
    async fn send(&self, buffers: &[&[u8]]) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        if self.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "mock send failure").into());
        }
        let mut sent = self.sent.lock();
        for buf in buffers {
            sent.extend_from_slice(buf);
        }
        Ok(())
    }

    async fn receive(&self, buf: &mut [u8]) -> Result<usize> {
        if self.receiving.swap(true, Ordering::SeqCst) {
            return Err(BrowserLinkError::ReceiveInProgress);
        }
        let res = self.receive_inner(buf).await;
        self.receiving.store(false, Ordering::SeqCst);
        res
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

impl MockSocket {
    async fn receive_inner(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            {
                let mut incoming = self.incoming.lock();
                if !incoming.data.is_empty() {
                    let mut n = buf.len().min(incoming.data.len());
                    if self.max_receive > 0 {
                        n = n.min(self.max_receive);
                    }
                    for (slot, byte) in buf.iter_mut().zip(incoming.data.drain(..n)) {
                        *slot = byte;
                    }
                    return Ok(n);
                }
                if let Some(kind) = incoming.error.take() {
                    return Err(std::io::Error::new(kind, "mock receive failure").into());
                }
                if incoming.eof || self.is_closed() {
                    return Ok(0);
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Response handler that records everything delivered to it.
#[derive(Default)]
pub(crate) struct CollectingHandler {
    data: Mutex<Vec<u8>>,
    calls: Mutex<usize>,
}

impl CollectingHandler {
    pub(crate) fn data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub(crate) fn text(&self) -> String {
        String::from_utf8_lossy(&self.data.lock()).into_owned()
    }

    pub(crate) fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl ResponseHandler for CollectingHandler {
    async fn on_data(&self, data: &[u8]) -> Result<()> {
        self.data.lock().extend_from_slice(data);
        *self.calls.lock() += 1;
        Ok(())
    }
}
