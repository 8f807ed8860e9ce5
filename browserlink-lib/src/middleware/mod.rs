//! Per-application request handling, independent of any web framework.
//!
//! The embedding server calls [`BrowserLinkMiddleware::begin_request`] before
//! running the application, routes the response body through the returned
//! filter, and calls [`BrowserLinkMiddleware::finish_request`] afterwards.

use std::sync::Arc;

use http::header::{CONTENT_LENGTH, IF_NONE_MATCH};
use http::HeaderMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::filter::{FilterContext, FilterParams, ScriptInjectionFilterStream, TimeoutBreaker};
use crate::host::{HostConnectionData, HostDirectory};
use crate::mapping::MappingDataWriter;
use crate::protocol::{DelayConnectingSocket, Http1Session, HttpSocket};
use crate::stream::HostRequestStream;
use crate::transport::TransportParams;

pub mod etag;

pub const REQUEST_ID_HEADER: &str = "BrowserLink-RequestID";
pub const SCHEME_HEADER: &str = "Scheme";
pub const INJECT_SCRIPT_VERB: &str = "injectScriptLink";
pub const MAPPING_DATA_VERB: &str = "sendMappingData";

/// Fresh opaque identifier shared by all host requests for one page request.
pub fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Browser Link handling for one application root.
pub struct BrowserLinkMiddleware {
    app_path: String,
    directory: HostDirectory,
    transport: TransportParams,
    filter: FilterParams,
    breaker: Arc<TimeoutBreaker>,
}

/// State carried from [`BrowserLinkMiddleware::begin_request`] to
/// [`BrowserLinkMiddleware::finish_request`].
pub struct BrowserLinkRequest {
    pub request_id: String,
    pub filter: ScriptInjectionFilterStream,
    current_port: Option<u16>,
}

impl BrowserLinkRequest {
    /// Adjust response headers before they are sent: the filtered length is
    /// unknown and the ETag is tagged with the host's port.
    pub fn prepare_response_headers(&self, headers: &mut HeaderMap) {
        headers.remove(CONTENT_LENGTH);
        if let Some(port) = self.current_port {
            etag::add_to_etag(headers, port);
        }
    }

    pub fn current_port(&self) -> Option<u16> {
        self.current_port
    }
}

impl BrowserLinkMiddleware {
    pub fn new(app_path: impl Into<String>, directory: HostDirectory, transport: TransportParams, filter: FilterParams) -> Self {
        Self {
            app_path: app_path.into(),
            directory,
            transport,
            filter,
            breaker: TimeoutBreaker::process_wide(),
        }
    }

    /// Use a private breaker instead of the process-wide one.
    pub fn with_breaker(mut self, breaker: Arc<TimeoutBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn breaker(&self) -> &Arc<TimeoutBreaker> {
        &self.breaker
    }

    /// Deferred connection to `verb` on the host serving this application.
    ///
    /// `None` when the breaker has tripped or no host serves the application.
    /// The host is woken without waiting; the connection itself is only
    /// opened when first used.
    pub fn open_host_socket(&self, request_id: &str, verb: &str, is_https: bool) -> Option<Arc<DelayConnectingSocket>> {
        if self.breaker.is_tripped(self.filter.timeout_limit) {
            debug!(timeouts = self.breaker.count(), "script injection disabled");
            return None;
        }

        let connection = self.directory.find_host_connection(&self.app_path)?;
        if !self.directory.signal_host_for_startup(&connection, false) {
            return None;
        }

        let directory = self.directory.clone();
        let app_path = self.app_path.clone();
        let transport = self.transport.clone();
        let request_id = request_id.to_string();
        let verb = verb.to_string();

        Some(Arc::new(DelayConnectingSocket::new(move || async move {
            let connection = tokio::task::spawn_blocking(move || started_host_connection(&directory, &app_path))
                .await
                .ok()
                .flatten()?;
            let url = connection.connection_url()?.join(&verb).ok()?;

            match Http1Session::open("GET", &url, &transport).await {
                Ok(session) => {
                    session.add_request_header(REQUEST_ID_HEADER, &request_id);
                    session.add_request_header(SCHEME_HEADER, if is_https { "https" } else { "http" });
                    let session: Arc<dyn HttpSocket> = Arc::new(session);
                    Some(session)
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "failed to connect to host");
                    None
                }
            }
        })))
    }

    /// Set up script injection for one request, or `None` to run the request
    /// untouched. Conditional request headers are reconciled with the host.
    pub async fn begin_request(
        &self,
        request_headers: &mut HeaderMap,
        is_https: bool,
        context: Arc<dyn FilterContext>,
    ) -> Option<BrowserLinkRequest> {
        let request_id = new_request_id();

        let Some(socket) = self.open_host_socket(&request_id, INJECT_SCRIPT_VERB, is_https) else {
            if !etag::request_ports(request_headers).is_empty() {
                etag::remove_etag_and_timestamp(request_headers);
            }
            return None;
        };

        let current_port = self.reconcile_request_headers(request_headers).await;
        if current_port.is_none() {
            etag::remove_etag_and_timestamp(request_headers);
        }

        let filter = ScriptInjectionFilterStream::new(socket, context, self.filter.clone());
        Some(BrowserLinkRequest { request_id, filter, current_port })
    }

    /// Wait for the filtered body and record whether the host timed out.
    pub async fn finish_request(&self, request: &mut BrowserLinkRequest) -> crate::error::Result<()> {
        request.filter.wait_for_filter_complete().await?;
        self.breaker
            .record(request.filter.script_injection_timed_out(), self.filter.timeout_limit);
        Ok(())
    }

    /// Writer for page-mapping data belonging to `request_id`.
    pub fn open_mapping_writer(&self, request_id: &str, is_https: bool) -> Option<MappingDataWriter> {
        let socket = self.open_host_socket(request_id, MAPPING_DATA_VERB, is_https)?;
        let stream = HostRequestStream::with_buffer_size(socket, self.transport.request_buffer);
        Some(MappingDataWriter::new(stream))
    }

    async fn reconcile_request_headers(&self, headers: &mut HeaderMap) -> Option<u16> {
        if !headers.contains_key(IF_NONE_MATCH) {
            return None;
        }

        let directory = self.directory.clone();
        let app_path = self.app_path.clone();
        let connection = tokio::task::spawn_blocking(move || started_host_connection(&directory, &app_path))
            .await
            .ok()
            .flatten()?;

        etag::filter_request_header(headers, &connection.connection_string)
    }
}

/// Connection data for `app_path`, starting the host first if its index entry
/// has no connection string yet. Blocks for up to the startup timeout.
fn started_host_connection(directory: &HostDirectory, app_path: &str) -> Option<HostConnectionData> {
    let connection = directory.find_host_connection(app_path)?;
    if !connection.connection_string.is_empty() {
        return Some(connection);
    }

    if !directory.signal_host_for_startup(&connection, true) {
        return None;
    }
    let connection = directory.find_host_connection(app_path)?;
    if connection.connection_string.is_empty() {
        warn!(app_path, "host started without a connection string");
        return None;
    }
    Some(connection)
}
