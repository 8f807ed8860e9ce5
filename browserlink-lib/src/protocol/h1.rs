use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::response::{parse_chunk_size, parse_header_line, parse_status_line, BodyFraming, ResponseHeaders};
use super::HttpSocket;
use crate::error::{BrowserLinkError, Result};
use crate::transport::{HostAddr, ResponseHandler, SocketAdapter, SocketReader, TcpSocket, TransportParams};

const CRLF: &[u8] = b"\r\n";
const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

type Slot<T> = watch::Sender<Option<Result<T>>>;

/// Hand-rolled HTTP/1.1 client session: one chunked request, one response.
pub struct Http1Session {
    socket: Arc<dyn SocketAdapter>,
    /// Request line and headers until the first write sends them.
    header_section: Mutex<Option<String>>,
    response: OnceLock<ResponseReader>,
    receive_buffer: usize,
}

impl Http1Session {
    /// Connect to the host named by `url` and prepare a `method` request for it.
    pub async fn open(method: &str, url: &Url, params: &TransportParams) -> Result<Self> {
        let addr = HostAddr::from_url(url)?;
        let socket = TcpSocket::connect(&addr.host, addr.port, params).await?;
        debug!(method = %method, url = %url, "opened host session");
        Ok(Self::with_socket(method, &addr, Arc::new(socket), params.receive_buffer))
    }

    pub fn with_socket(method: &str, addr: &HostAddr, socket: Arc<dyn SocketAdapter>, receive_buffer: usize) -> Self {
        let mut head = format!("{} {} HTTP/1.1\r\n", method, addr.path_and_query);
        push_header(&mut head, "Host", &addr.authority);
        push_header(&mut head, "Transfer-Encoding", "chunked");
        push_header(&mut head, "Connection", "keep-alive");

        Self {
            socket,
            header_section: Mutex::new(Some(head)),
            response: OnceLock::new(),
            receive_buffer,
        }
    }

    fn take_header_section(&self) -> Option<String> {
        self.header_section.lock().take().map(|mut head| {
            head.push_str("\r\n");
            head
        })
    }

    fn response(&self) -> &ResponseReader {
        self.response.get_or_init(|| {
            let reader = SocketReader::with_capacity(self.socket.clone(), self.receive_buffer);
            ResponseReader::start(reader)
        })
    }
}

fn push_header(head: &mut String, name: &str, value: &str) {
    head.push_str(name);
    head.push_str(": ");
    head.push_str(value);
    head.push_str("\r\n");
}

#[async_trait]
impl HttpSocket for Http1Session {
    fn add_request_header(&self, name: &str, value: &str) {
        if let Some(head) = self.header_section.lock().as_mut() {
            push_header(head, name, value);
        }
    }

    fn set_response_handler(&self, handler: Arc<dyn ResponseHandler>) {
        self.response().handler.send_replace(Some(handler));
    }

    async fn write_to_request(&self, data: &[u8]) -> Result<()> {
        let head = self.take_header_section();
        let size_line = format!("{:X}\r\n", data.len());

        let mut parts: Vec<&[u8]> = Vec::with_capacity(4);
        if let Some(head) = &head {
            parts.push(head.as_bytes());
        }
        if !data.is_empty() {
            parts.push(size_line.as_bytes());
            parts.push(data);
            parts.push(CRLF);
        }

        self.socket.send(&parts).await
    }

    async fn complete_request(&self) -> Result<()> {
        let head = self.take_header_section();

        let mut parts: Vec<&[u8]> = Vec::with_capacity(2);
        if let Some(head) = &head {
            parts.push(head.as_bytes());
        }
        parts.push(LAST_CHUNK);

        self.socket.send(&parts).await
    }

    async fn response_status_code(&self) -> Result<u16> {
        wait_slot(&self.response().status).await
    }

    async fn response_header(&self, name: &str) -> Result<Option<String>> {
        let headers = wait_slot(&self.response().headers).await?;
        Ok(headers.get(name).map(str::to_string))
    }

    async fn wait_for_response_complete(&self) -> Result<()> {
        wait_slot(&self.response().complete).await
    }

    fn close(&self) {
        if let Some(response) = self.response.get() {
            response.cancel.cancel();
        }
        self.socket.close();
    }
}

impl Drop for Http1Session {
    fn drop(&mut self) {
        self.close();
    }
}

async fn wait_slot<T: Clone>(slot: &Slot<T>) -> Result<T> {
    let mut rx = slot.subscribe();
    let value = {
        let current = rx
            .wait_for(|v| v.is_some())
            .await
            .map_err(|_| BrowserLinkError::Closed)?;
        current.clone()
    };
    value.unwrap_or(Err(BrowserLinkError::Closed))
}

/// Background reader for the response side of a session.
struct ResponseReader {
    status: Arc<Slot<u16>>,
    headers: Arc<Slot<Arc<ResponseHeaders>>>,
    complete: Arc<Slot<()>>,
    handler: Arc<watch::Sender<Option<Arc<dyn ResponseHandler>>>>,
    cancel: CancellationToken,
}

impl ResponseReader {
    fn start(reader: SocketReader) -> Self {
        let this = Self {
            status: Arc::new(watch::channel(None).0),
            headers: Arc::new(watch::channel(None).0),
            complete: Arc::new(watch::channel(None).0),
            handler: Arc::new(watch::channel(None).0),
            cancel: CancellationToken::new(),
        };

        let task = ReadTask {
            reader,
            status: this.status.clone(),
            headers: this.headers.clone(),
            handler: this.handler.subscribe(),
            cancel: this.cancel.clone(),
        };
        let complete = this.complete.clone();
        tokio::spawn(async move {
            let result = task.run().await;
            if let Err(e) = &result {
                debug!(error = %e, "host response read ended");
            }
            complete.send_replace(Some(result));
        });

        this
    }
}

struct ReadTask {
    reader: SocketReader,
    status: Arc<Slot<u16>>,
    headers: Arc<Slot<Arc<ResponseHeaders>>>,
    handler: watch::Receiver<Option<Arc<dyn ResponseHandler>>>,
    cancel: CancellationToken,
}

impl ReadTask {
    async fn run(mut self) -> Result<()> {
        let result = self.read_response().await;
        if let Err(e) = &result {
            fail_if_unset(&self.status, e);
            fail_if_unset(&self.headers, e);
        }
        result
    }

    async fn read_response(&mut self) -> Result<()> {
        let status_line = self.read_line().await?;
        self.status.send_replace(Some(Ok(parse_status_line(&status_line))));

        let headers = Arc::new(self.read_headers().await?);
        self.headers.send_replace(Some(Ok(headers.clone())));

        match BodyFraming::from_headers(&headers) {
            BodyFraming::Chunked => self.read_chunked_body().await,
            BodyFraming::Length(len) => self.read_body(len).await,
            BodyFraming::None => Ok(()),
        }
    }

    async fn read_headers(&mut self) -> Result<ResponseHeaders> {
        let mut headers = ResponseHeaders::new();
        loop {
            let line = self.read_line().await?;
            if line.is_empty() {
                return Ok(headers);
            }
            if let Some((name, value)) = parse_header_line(&line) {
                headers.insert(name, value);
            }
        }
    }

    async fn read_chunked_body(&mut self) -> Result<()> {
        loop {
            let size_line = self.read_line().await?;
            let size = parse_chunk_size(&size_line).ok_or(BrowserLinkError::ChunkLength(size_line))?;
            if size == 0 {
                return Ok(());
            }
            self.read_body(size).await?;
            self.read_line().await?;
        }
    }

    async fn read_body(&mut self, len: u64) -> Result<()> {
        let handler = self.wait_for_handler().await?;
        self.reader
            .read_bytes_into_handler(len, handler.as_ref(), &self.cancel)
            .await?;
        self.check_cancelled()
    }

    async fn read_line(&mut self) -> Result<String> {
        let line = self.reader.read_line(&self.cancel).await?;
        self.check_cancelled()?;
        Ok(line)
    }

    async fn wait_for_handler(&mut self) -> Result<Arc<dyn ResponseHandler>> {
        let handler = tokio::select! {
            _ = self.cancel.cancelled() => None,
            res = self.handler.wait_for(|h| h.is_some()) => match res {
                Ok(h) => h.clone(),
                Err(_) => None,
            },
        };
        handler.ok_or(BrowserLinkError::Closed)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(BrowserLinkError::Closed);
        }
        Ok(())
    }
}

fn fail_if_unset<T>(slot: &Slot<T>, error: &BrowserLinkError) {
    slot.send_if_modified(|value| {
        if value.is_none() {
            *value = Some(Err(error.clone()));
            true
        } else {
            false
        }
    });
}
