use anyhow::Result;

pub mod filter;
pub mod host;
pub mod transport;

pub use filter::FilterConfig;
pub use host::HostConfig;
pub use transport::TransportConfig;

/// Resolve a config file path with a `../` fallback for running from a workspace subdirectory.
pub fn resolve_config_path(path: &str) -> Result<String> {
    if std::path::Path::new(path).exists() {
        return Ok(path.to_string());
    }
    let alt = format!("../{}", path);
    if std::path::Path::new(&alt).exists() {
        return Ok(alt);
    }
    Err(anyhow::anyhow!("Config file not found: {} (checked ./ and ../)", path))
}
