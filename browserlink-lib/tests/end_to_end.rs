//! Middleware against a loopback host discovered through index files.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use browserlink_lib::host::DirectoryParams;
use browserlink_lib::{
    BrowserLinkMiddleware, FilterContext, FilterParams, HostDirectory, ResponseBody, TimeoutBreaker,
    TransportParams, WriterBody,
};
use http::HeaderMap;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

const APP_PATH: &str = "/srv/sites/web1";
const SCRIPT: &[u8] = b"<script src=\"/bl.js\"></script>";

#[derive(Clone, Copy)]
enum Behavior {
    /// Preamble first, then the body with the script appended.
    Inject,
    /// Accept and read, never answer.
    Silent,
    /// Reply with a non-200 status.
    Refuse,
    /// Read the whole body, then reply with an empty 200.
    Drain,
}

struct Received {
    head: String,
    body: Vec<u8>,
}

struct Page {
    content_type: &'static str,
    body: Arc<WriterBody<Vec<u8>>>,
}

impl FilterContext for Page {
    fn request_path(&self) -> Option<String> {
        Some("/".to_string())
    }

    fn response_content_type(&self) -> Option<String> {
        Some(self.content_type.to_string())
    }

    fn response_body(&self) -> Arc<dyn ResponseBody> {
        self.body.clone()
    }
}

fn page(content_type: &'static str) -> (Arc<Page>, Arc<WriterBody<Vec<u8>>>) {
    let body = Arc::new(WriterBody::new(Vec::new()));
    (Arc::new(Page { content_type, body: body.clone() }), body)
}

fn write_index(dir: &Path, port: u16) {
    std::fs::write(dir.join("PageInspector.Artery"), "BrowserLink.7\r\n").unwrap();
    std::fs::write(
        dir.join("BrowserLink.7.v2"),
        format!(
            "host-name:127.0.0.1\r\nhttp-port:{}\r\nverb-fetch-script:browserLink\r\nproject:{};KEY\r\n",
            port, APP_PATH
        ),
    )
    .unwrap();
    std::fs::write(dir.join("BrowserLink.7.RequestSignal"), "").unwrap();
    std::fs::write(dir.join("BrowserLink.7.ReadySignal"), "").unwrap();
}

fn middleware(dir: &Path, injection_timeout: Duration) -> BrowserLinkMiddleware {
    let filter = FilterParams { injection_timeout, ..FilterParams::default() };
    BrowserLinkMiddleware::new(
        APP_PATH,
        HostDirectory::in_directory(dir, DirectoryParams::default()),
        TransportParams::default(),
        filter,
    )
    .with_breaker(Arc::new(TimeoutBreaker::new()))
}

/// Serve every accepted connection with `behavior` and report what arrived.
async fn spawn_host(behavior: Behavior) -> (u16, mpsc::UnboundedReceiver<Received>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let (read, mut write) = stream.into_split();
                let mut reader = BufReader::new(read);

                let mut head = String::new();
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    head.push_str(&line);
                    if line == "\r\n" {
                        break;
                    }
                }

                match behavior {
                    Behavior::Inject => {
                        write
                            .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n1\r\n\xFF\r\n")
                            .await
                            .unwrap();
                    }
                    Behavior::Refuse => {
                        write
                            .write_all(b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n")
                            .await
                            .unwrap();
                    }
                    Behavior::Silent | Behavior::Drain => {}
                }

                let mut body = Vec::new();
                loop {
                    let mut size_line = String::new();
                    if reader.read_line(&mut size_line).await.unwrap_or(0) == 0 {
                        break;
                    }
                    let size = usize::from_str_radix(size_line.trim(), 16).unwrap();
                    let mut chunk = vec![0u8; size + 2];
                    if reader.read_exact(&mut chunk).await.is_err() {
                        break;
                    }
                    if size == 0 {
                        break;
                    }
                    body.extend_from_slice(&chunk[..size]);
                }

                match behavior {
                    Behavior::Inject => {
                        let mut reply = body.clone();
                        reply.extend_from_slice(SCRIPT);
                        let _ = write.write_all(format!("{:X}\r\n", reply.len()).as_bytes()).await;
                        let _ = write.write_all(&reply).await;
                        let _ = write.write_all(b"\r\n0\r\n\r\n").await;
                    }
                    Behavior::Drain => {
                        let _ = write.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
                    }
                    Behavior::Silent | Behavior::Refuse => {}
                }

                let _ = tx.send(Received { head, body });
            });
        }
    });

    (port, rx)
}

#[tokio::test]
async fn test_html_page_is_injected() {
    let dir = tempfile::tempdir().unwrap();
    let (port, mut received) = spawn_host(Behavior::Inject).await;
    write_index(dir.path(), port);
    let mw = middleware(dir.path(), Duration::from_secs(5));

    let (page, body) = page("text/html; charset=utf-8");
    let mut request = mw.begin_request(&mut HeaderMap::new(), false, page).await.unwrap();
    request.filter.write(b"<html><body>").await.unwrap();
    request.filter.write(b"hi</body></html>").await.unwrap();
    mw.finish_request(&mut request).await.unwrap();

    let mut expected = b"<html><body>hi</body></html>".to_vec();
    expected.extend_from_slice(SCRIPT);
    assert_eq!(body.with_inner(|v| v.clone()).await, expected);
    assert!(request.filter.is_passthrough());
    assert!(!request.filter.script_injection_timed_out());

    let host_saw = received.recv().await.unwrap();
    assert!(host_saw.head.starts_with("GET /KEY/injectScriptLink HTTP/1.1\r\n"));
    assert!(host_saw.head.contains("Content-Type: text/html; charset=utf-8\r\n"));
    assert!(host_saw.head.contains("Scheme: http\r\n"));
    assert_eq!(host_saw.body, b"<html><body>hi</body></html>");
}

#[tokio::test]
async fn test_non_html_content_never_reaches_host() {
    let dir = tempfile::tempdir().unwrap();
    let (port, mut received) = spawn_host(Behavior::Inject).await;
    write_index(dir.path(), port);
    let mw = middleware(dir.path(), Duration::from_secs(5));

    let (page, body) = page("application/json");
    let mut request = mw.begin_request(&mut HeaderMap::new(), false, page).await.unwrap();
    request.filter.write(b"{\"a\":1}").await.unwrap();
    mw.finish_request(&mut request).await.unwrap();
    drop(request);

    assert_eq!(body.with_inner(|v| v.clone()).await, b"{\"a\":1}");
    let nothing = tokio::time::timeout(Duration::from_millis(200), received.recv()).await;
    assert!(nothing.is_err(), "host must not be contacted");
}

#[tokio::test]
async fn test_refusing_host_falls_back_to_passthrough() {
    let dir = tempfile::tempdir().unwrap();
    let (port, _received) = spawn_host(Behavior::Refuse).await;
    write_index(dir.path(), port);
    let mw = middleware(dir.path(), Duration::from_secs(5));

    let (page, body) = page("text/html");
    let mut request = mw.begin_request(&mut HeaderMap::new(), false, page).await.unwrap();
    request.filter.write(b"<html>a").await.unwrap();
    request.filter.write(b"b</html>").await.unwrap();
    mw.finish_request(&mut request).await.unwrap();

    assert_eq!(body.with_inner(|v| v.clone()).await, b"<html>ab</html>");
    assert!(!request.filter.script_injection_timed_out());
    assert_eq!(mw.breaker().count(), 0);
}

#[tokio::test]
async fn test_silent_host_trips_breaker() {
    let dir = tempfile::tempdir().unwrap();
    let (port, _received) = spawn_host(Behavior::Silent).await;
    write_index(dir.path(), port);
    let mw = middleware(dir.path(), Duration::from_millis(100));

    for attempt in 1..=2 {
        let (page, body) = page("text/html");
        let mut request = mw.begin_request(&mut HeaderMap::new(), false, page).await.unwrap();
        request.filter.write(b"<html></html>").await.unwrap();
        mw.finish_request(&mut request).await.unwrap();

        assert!(request.filter.script_injection_timed_out());
        assert_eq!(body.with_inner(|v| v.clone()).await, b"<html></html>");
        assert_eq!(mw.breaker().count(), attempt);
    }

    let (page, _body) = page("text/html");
    assert!(mw.begin_request(&mut HeaderMap::new(), false, page).await.is_none());
}

#[tokio::test]
async fn test_missing_host_means_plain_request() {
    let dir = tempfile::tempdir().unwrap();
    let mw = middleware(dir.path(), Duration::from_secs(1));

    let (page, _body) = page("text/html");
    assert!(mw.begin_request(&mut HeaderMap::new(), false, page).await.is_none());
    assert!(mw.open_mapping_writer("id", false).is_none());
}

#[tokio::test]
async fn test_mapping_data_reaches_host() {
    let dir = tempfile::tempdir().unwrap();
    let (port, mut received) = spawn_host(Behavior::Drain).await;
    write_index(dir.path(), port);
    let mw = middleware(dir.path(), Duration::from_secs(1));

    let mut writer = mw.open_mapping_writer("0123456789abcdef", true).unwrap();
    writer.write_end_context(1, 2);
    writer.write_end_of_data();
    writer.close().await.unwrap();

    let host_saw = received.recv().await.unwrap();
    assert!(host_saw.head.starts_with("GET /KEY/sendMappingData HTTP/1.1\r\n"));
    assert!(host_saw.head.contains("BrowserLink-RequestID: 0123456789abcdef\r\n"));
    assert!(host_saw.head.contains("Scheme: https\r\n"));

    let mut expected: Vec<u8> = [2i32, 5, 1, 1, 4, 1, 2, -1].iter().flat_map(|v| v.to_le_bytes()).collect();
    expected.extend([5i32, -1].iter().flat_map(|v| v.to_le_bytes()));
    assert_eq!(host_saw.body, expected);
}
