use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::debug;

use super::response::MALFORMED_STATUS;
use super::HttpSocket;
use crate::error::Result;
use crate::transport::ResponseHandler;

pub type ConnectFuture = Pin<Box<dyn Future<Output = Option<Arc<dyn HttpSocket>>> + Send>>;
type ConnectFn = Box<dyn FnOnce() -> ConnectFuture + Send>;

/// A host session that may not exist.
///
/// `Unavailable` answers every call with an inert result: writes succeed and
/// go nowhere, the status is 500, headers are absent and completion is
/// immediate.
#[derive(Clone)]
pub enum HostConnection {
    Connected(Arc<dyn HttpSocket>),
    Unavailable,
}

#[async_trait]
impl HttpSocket for HostConnection {
    fn add_request_header(&self, name: &str, value: &str) {
        if let HostConnection::Connected(socket) = self {
            socket.add_request_header(name, value);
        }
    }

    fn set_response_handler(&self, handler: Arc<dyn ResponseHandler>) {
        if let HostConnection::Connected(socket) = self {
            socket.set_response_handler(handler);
        }
    }

    async fn write_to_request(&self, data: &[u8]) -> Result<()> {
        match self {
            HostConnection::Connected(socket) => socket.write_to_request(data).await,
            HostConnection::Unavailable => Ok(()),
        }
    }

    async fn complete_request(&self) -> Result<()> {
        match self {
            HostConnection::Connected(socket) => socket.complete_request().await,
            HostConnection::Unavailable => Ok(()),
        }
    }

    async fn response_status_code(&self) -> Result<u16> {
        match self {
            HostConnection::Connected(socket) => socket.response_status_code().await,
            HostConnection::Unavailable => Ok(MALFORMED_STATUS),
        }
    }

    async fn response_header(&self, name: &str) -> Result<Option<String>> {
        match self {
            HostConnection::Connected(socket) => socket.response_header(name).await,
            HostConnection::Unavailable => Ok(None),
        }
    }

    async fn wait_for_response_complete(&self) -> Result<()> {
        match self {
            HostConnection::Connected(socket) => socket.wait_for_response_complete().await,
            HostConnection::Unavailable => Ok(()),
        }
    }

    fn close(&self) {
        if let HostConnection::Connected(socket) = self {
            socket.close();
        }
    }
}

enum State {
    /// Calls made before the connection exists, replayed once it does.
    Pending {
        headers: Vec<(String, String)>,
        handler: Option<Arc<dyn ResponseHandler>>,
    },
    Ready(HostConnection),
}

/// Opens the host session only when something actually needs it.
///
/// Headers and the response handler are held until the first write or
/// response access creates the connection; the factory runs at most once and
/// every caller shares its result. A factory yielding `None` leaves the
/// wrapper permanently [`HostConnection::Unavailable`].
pub struct DelayConnectingSocket {
    factory: Mutex<Option<ConnectFn>>,
    connect: OnceCell<()>,
    state: Mutex<State>,
    closed: AtomicBool,
}

impl DelayConnectingSocket {
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Option<Arc<dyn HttpSocket>>> + Send + 'static,
    {
        let factory: ConnectFn = Box::new(move || Box::pin(factory()));
        Self {
            factory: Mutex::new(Some(factory)),
            connect: OnceCell::new(),
            state: Mutex::new(State::Pending { headers: Vec::new(), handler: None }),
            closed: AtomicBool::new(false),
        }
    }

    /// True once the factory has run, whatever it produced.
    pub fn is_connected(&self) -> bool {
        self.connect.initialized()
    }

    async fn connection(&self) -> HostConnection {
        self.connect
            .get_or_init(|| async {
                let factory = self.factory.lock().take();
                let socket = match factory {
                    Some(factory) if !self.closed.load(Ordering::SeqCst) => factory().await,
                    _ => None,
                };

                let connection = match socket {
                    Some(socket) if self.closed.load(Ordering::SeqCst) => {
                        socket.close();
                        HostConnection::Unavailable
                    }
                    Some(socket) => HostConnection::Connected(socket),
                    None => {
                        debug!("host connection unavailable");
                        HostConnection::Unavailable
                    }
                };

                let mut state = self.state.lock();
                if let State::Pending { headers, handler } =
                    std::mem::replace(&mut *state, State::Ready(connection.clone()))
                {
                    if let Some(handler) = handler {
                        connection.set_response_handler(handler);
                    }
                    for (name, value) in headers {
                        connection.add_request_header(&name, &value);
                    }
                }
            })
            .await;

        match &*self.state.lock() {
            State::Ready(connection) => connection.clone(),
            State::Pending { .. } => HostConnection::Unavailable,
        }
    }
}

#[async_trait]
impl HttpSocket for DelayConnectingSocket {
    fn add_request_header(&self, name: &str, value: &str) {
        match &mut *self.state.lock() {
            State::Pending { headers, .. } => headers.push((name.to_string(), value.to_string())),
            State::Ready(connection) => connection.add_request_header(name, value),
        }
    }

    fn set_response_handler(&self, handler: Arc<dyn ResponseHandler>) {
        match &mut *self.state.lock() {
            State::Pending { handler: pending, .. } => *pending = Some(handler),
            State::Ready(connection) => connection.set_response_handler(handler),
        }
    }

    async fn write_to_request(&self, data: &[u8]) -> Result<()> {
        self.connection().await.write_to_request(data).await
    }

    async fn complete_request(&self) -> Result<()> {
        let needed = match &*self.state.lock() {
            State::Pending { handler, .. } => handler.is_some(),
            State::Ready(_) => true,
        };
        if !needed {
            return Ok(());
        }
        self.connection().await.complete_request().await
    }

    async fn response_status_code(&self) -> Result<u16> {
        self.connection().await.response_status_code().await
    }

    async fn response_header(&self, name: &str) -> Result<Option<String>> {
        self.connection().await.response_header(name).await
    }

    async fn wait_for_response_complete(&self) -> Result<()> {
        self.connection().await.wait_for_response_complete().await
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let State::Ready(connection) = &*self.state.lock() {
            connection.close();
        }
    }
}
