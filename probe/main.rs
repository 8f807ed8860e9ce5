use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use http::HeaderMap;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use browserlink_lib::middleware::new_request_id;
use browserlink_lib::{
    BrowserLinkMiddleware, DirectoryParams, FilterContext, FilterParams, HostDirectory, ResponseBody,
    TransportParams, WriterBody,
};

mod config;

use config::ProbeConfigFile;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/probe.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the host serving an application root.
    Find { app_path: Option<String> },
    /// Ask the host for an application root to start.
    Signal {
        app_path: Option<String>,
        /// Wait for the host's ready signal.
        #[arg(long)]
        block: bool,
    },
    /// Run a file through script injection and write the result to stdout.
    Filter {
        app_path: String,
        file: PathBuf,
        /// Response Content-Type reported to the filter.
        #[arg(long, default_value = "text/html")]
        content_type: String,
    },
    /// Send a sample page mapping to the host.
    Mapping { app_path: Option<String> },
}

/// Response facts for a file served from disk.
struct FileResponse {
    request_path: String,
    content_type: String,
    body: Arc<WriterBody<tokio::io::Stdout>>,
}

impl FilterContext for FileResponse {
    fn request_path(&self) -> Option<String> {
        Some(self.request_path.clone())
    }

    fn response_content_type(&self) -> Option<String> {
        Some(self.content_type.clone())
    }

    fn response_body(&self) -> Arc<dyn ResponseBody> {
        self.body.clone()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ProbeConfigFile::load(&args.config)?;

    let log_level = config.log_level.as_deref().unwrap_or("info");
    let filter = match log_level {
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };
    // stdout carries filtered bodies
    let subscriber = tracing_subscriber::fmt().with_max_level(filter).with_writer(std::io::stderr);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    debug!(config = ?config, "Loaded config");

    let directory = HostDirectory::system(DirectoryParams::from(&config.host));

    match args.command {
        Command::Find { app_path } => find(&directory, &config.app_path(app_path)?),
        Command::Signal { app_path, block } => {
            let app_path = config.app_path(app_path)?;
            let signaled =
                tokio::task::spawn_blocking(move || directory.signal_host_for_path(&app_path, block)).await?;
            if !signaled {
                return Err(anyhow::anyhow!("host could not be signaled"));
            }
            info!(block, "host signaled");
            Ok(())
        }
        Command::Filter { app_path, file, content_type } => {
            filter_file(middleware(&config, &app_path, directory), &file, content_type).await
        }
        Command::Mapping { app_path } => {
            let app_path = config.app_path(app_path)?;
            send_sample_mapping(middleware(&config, &app_path, directory)).await
        }
    }
}

fn middleware(config: &ProbeConfigFile, app_path: &str, directory: HostDirectory) -> BrowserLinkMiddleware {
    BrowserLinkMiddleware::new(
        app_path,
        directory,
        TransportParams::from(&config.transport),
        FilterParams::from(&config.filter),
    )
}

fn find(directory: &HostDirectory, app_path: &str) -> Result<()> {
    let Some(host) = directory.find_host_connection(app_path) else {
        return Err(anyhow::anyhow!("no host serves {}", app_path));
    };

    println!("connection:      {}", display_or_dash(&host.connection_string));
    println!("ssl connection:  {}", display_or_dash(&host.ssl_connection_string));
    println!("request signal:  {}", host.request_signal_name);
    println!("ready signal:    {}", host.ready_signal_name);
    println!("inject script:   {}", host.inject_script_verb.as_deref().unwrap_or("-"));
    println!("mapping data:    {}", host.mapping_data_verb.as_deref().unwrap_or("-"));
    println!("server data:     {}", host.server_data_verb.as_deref().unwrap_or("-"));
    for project in &host.project_paths {
        println!("project:         {}", project);
    }
    Ok(())
}

fn display_or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

async fn filter_file(mw: BrowserLinkMiddleware, file: &Path, content_type: String) -> Result<()> {
    let content = tokio::fs::read(file).await?;
    let body = Arc::new(WriterBody::new(tokio::io::stdout()));
    let context = Arc::new(FileResponse {
        request_path: format!("/{}", file.file_name().and_then(|n| n.to_str()).unwrap_or_default()),
        content_type,
        body: body.clone(),
    });

    let mut headers = HeaderMap::new();
    let Some(mut request) = mw.begin_request(&mut headers, false, context).await else {
        warn!("no host available, writing the file unchanged");
        let mut stdout = tokio::io::stdout();
        stdout.write_all(&content).await?;
        stdout.flush().await?;
        return Ok(());
    };

    info!(request_id = %request.request_id, bytes = content.len(), "filtering file");
    for chunk in content.chunks(4096) {
        request.filter.write(chunk).await?;
    }
    let filtered = request.filter.sent_content_to_filter();
    mw.finish_request(&mut request).await?;
    body.flush().await?;

    info!(
        filtered,
        timed_out = request.filter.script_injection_timed_out(),
        "filter complete"
    );
    Ok(())
}

async fn send_sample_mapping(mw: BrowserLinkMiddleware) -> Result<()> {
    let request_id = new_request_id();
    let Some(mut writer) = mw.open_mapping_writer(&request_id, false) else {
        return Err(anyhow::anyhow!("no host available for mapping data"));
    };

    let page = "<html><body><p>Hello</p></body></html>";
    writer.write_output_definition(0, page);
    writer.write_begin_context(0, page.len() as i32, true, "Index.cshtml", 0, 0);
    writer.write_end_context(0, page.len() as i32);
    writer.write_end_of_data();
    writer.close().await?;

    info!(request_id = %request_id, "mapping data sent");
    Ok(())
}
