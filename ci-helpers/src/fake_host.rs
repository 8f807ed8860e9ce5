/// Stand-in Browser Link host for CI and manual runs.
///
/// Publishes a V2 index entry and marker-file signals in a directory, then
/// serves the host verbs on 127.0.0.1:
///   injectScriptLink  replies 200 chunked, sends the 0xFF preamble at once,
///                     then returns the request body with a script tag
///                     inserted before </body>
///   sendMappingData   reads the body and replies 200 with no content
///
/// Usage:
///   fake-host --dir <index-dir> --project <app-path> [--project ...] [--port N]
///
/// Runs until Ctrl-C, then removes the files it published.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use browserlink_lib::host::connection::{
    FETCH_SCRIPT_VERB_KEY, HOST_NAME_KEY, HTTP_PORT_KEY, PROJECT_DATA_KEY, READY_SIGNAL_SUFFIX,
    REQUEST_SIGNAL_SUFFIX, VERSION2_SUFFIX,
};
use browserlink_lib::host::{DirectoryIndex, DirectorySignals, SignalSource, LOCAL_INDEX_NAME};
use browserlink_lib::middleware::{INJECT_SCRIPT_VERB, MAPPING_DATA_VERB, REQUEST_ID_HEADER};

const SCRIPT_TAG: &str = "<script src=\"/browserLink\"></script>";
const MAX_HEADERS: usize = 32;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding index and signal files.
    #[arg(short, long)]
    dir: PathBuf,
    /// Project root served by this host; repeatable.
    #[arg(short, long = "project", required = true)]
    projects: Vec<String>,
    /// Listen port, 0 for any.
    #[arg(long, default_value_t = 0)]
    port: u16,
    /// Instance name published in the index.
    #[arg(long, default_value = "BrowserLink.FakeHost")]
    instance: String,
}

// ─── main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();
    let args = Args::parse();

    std::fs::create_dir_all(&args.dir)?;
    let listener = TcpListener::bind(("127.0.0.1", args.port)).await?;
    let port = listener.local_addr()?.port();

    let published = publish(&args, port)?;
    info!(port, dir = %args.dir.display(), instance = %args.instance, "fake host listening");

    let signals = DirectorySignals::new(&args.dir);
    let request_signal = format!("{}{}", args.instance, REQUEST_SIGNAL_SUFFIX);
    let ready_signal = format!("{}{}", args.instance, READY_SIGNAL_SUFFIX);

    let mut poll = tokio::time::interval(Duration::from_millis(20));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = poll.tick() => {
                if signals.is_set(&request_signal) {
                    signals.create(&request_signal)?;
                    signals.set(&ready_signal);
                    info!("startup requested, reporting ready");
                }
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                tokio::spawn(async move {
                    if let Err(e) = serve(stream).await {
                        debug!(peer = %peer, error = %e, "connection ended");
                    }
                });
            }
        }
    }

    for path in published {
        let _ = std::fs::remove_file(path);
    }
    info!("fake host stopped");
    Ok(())
}

// ─── index ───────────────────────────────────────────────────────────────────

/// Write the index, the instance file and both signals. Returns every file
/// created.
fn publish(args: &Args, port: u16) -> Result<Vec<PathBuf>> {
    let index = DirectoryIndex::new(&args.dir);
    let signals = DirectorySignals::new(&args.dir);

    let index_path = index.path_for(LOCAL_INDEX_NAME);
    std::fs::write(&index_path, format!("{}\r\n", args.instance))?;

    let instance_path = index.path_for(&format!("{}{}", args.instance, VERSION2_SUFFIX));
    std::fs::write(&instance_path, instance_file(port, &args.projects))?;

    let request_signal = format!("{}{}", args.instance, REQUEST_SIGNAL_SUFFIX);
    let ready_signal = format!("{}{}", args.instance, READY_SIGNAL_SUFFIX);
    signals.create(&request_signal)?;
    signals.create(&ready_signal)?;

    Ok(vec![
        index_path,
        instance_path,
        signals.path_for(&request_signal),
        signals.path_for(&ready_signal),
    ])
}

fn instance_file(port: u16, projects: &[String]) -> String {
    let mut text = format!(
        "{}:127.0.0.1\r\n{}:{}\r\n{}:browserLink\r\n",
        HOST_NAME_KEY, HTTP_PORT_KEY, port, FETCH_SCRIPT_VERB_KEY
    );
    for (i, project) in projects.iter().enumerate() {
        text.push_str(&format!("{}:{};project{}\r\n", PROJECT_DATA_KEY, project, i));
    }
    text
}

// ─── http ────────────────────────────────────────────────────────────────────

async fn serve(stream: TcpStream) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let head = read_head(&mut reader).await?;
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);
    if request.parse(&head)?.is_partial() {
        return Err(anyhow::anyhow!("incomplete request head"));
    }

    let path = request.path.unwrap_or("/").to_string();
    let request_id = header(&request, REQUEST_ID_HEADER).unwrap_or_default();
    let chunked = header(&request, "Transfer-Encoding").is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
    let verb = path.rsplit('/').next().unwrap_or_default().to_string();
    info!(path = %path, request_id = %request_id, "host request");

    if verb == INJECT_SCRIPT_VERB {
        write
            .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n")
            .await?;
        write_chunk(&mut write, &[0xFF]).await?;
        write.flush().await?;

        let body = if chunked { read_chunked_body(&mut reader).await? } else { Vec::new() };
        let filtered = inject_script(&body);
        debug!(received = body.len(), sent = filtered.len(), "script injected");

        write_chunk(&mut write, &filtered).await?;
        write.write_all(b"0\r\n\r\n").await?;
    } else if verb == MAPPING_DATA_VERB {
        let body = if chunked { read_chunked_body(&mut reader).await? } else { Vec::new() };
        info!(bytes = body.len(), "mapping data received");
        write.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await?;
    } else {
        warn!(verb = %verb, "unknown verb");
        write.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n").await?;
    }

    write.flush().await?;
    Ok(())
}

fn header(request: &httparse::Request, name: &str) -> Option<String> {
    request
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .and_then(|h| std::str::from_utf8(h.value).ok())
        .map(str::to_string)
}

async fn read_head<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut head = Vec::new();
    loop {
        let before = head.len();
        reader.read_until(b'\n', &mut head).await?;
        if head.len() == before {
            return Err(anyhow::anyhow!("connection closed before request head"));
        }
        if head.ends_with(b"\r\n\r\n") || head == b"\r\n" {
            return Ok(head);
        }
    }
}

async fn read_chunked_body<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(anyhow::anyhow!("connection closed inside chunked body"));
        }
        let size_text = line.trim().split(';').next().unwrap_or_default();
        let size = usize::from_str_radix(size_text, 16)?;

        if size == 0 {
            let mut trailer = String::new();
            reader.read_line(&mut trailer).await?;
            return Ok(body);
        }

        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).await?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
    }
}

async fn write_chunk<W: AsyncWriteExt + Unpin>(write: &mut W, data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    write.write_all(format!("{:X}\r\n", data.len()).as_bytes()).await?;
    write.write_all(data).await?;
    write.write_all(b"\r\n").await?;
    Ok(())
}

/// Insert the script tag before the last `</body>`, or append it.
fn inject_script(body: &[u8]) -> Vec<u8> {
    let lower = body.to_ascii_lowercase();
    let at = lower
        .windows(7)
        .rposition(|w| w == b"</body>")
        .unwrap_or(body.len());

    let mut out = Vec::with_capacity(body.len() + SCRIPT_TAG.len());
    out.extend_from_slice(&body[..at]);
    out.extend_from_slice(SCRIPT_TAG.as_bytes());
    out.extend_from_slice(&body[at..]);
    out
}
