use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use crate::host::DirectoryParams;

/// Host discovery settings.
/// Nests under top-level `host` in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Upper bound on waiting for the host's ready signal (ms). Default: 1500.
    pub startup_timeout_ms: u64,
    /// Index names scanned in order. Default: the global name, then the per-user name.
    pub index_names: Vec<String>,
    /// Directory holding index and signal files on platforms without named
    /// kernel objects. `null` = the system temp directory.
    pub index_dir: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        let defaults = DirectoryParams::default();
        Self {
            startup_timeout_ms: defaults.startup_timeout.as_millis() as u64,
            index_names: defaults.index_names,
            index_dir: None,
        }
    }
}

impl From<&HostConfig> for DirectoryParams {
    fn from(c: &HostConfig) -> Self {
        DirectoryParams {
            startup_timeout: std::time::Duration::from_millis(c.startup_timeout_ms),
            index_names: c.index_names.clone(),
            index_dir: c.index_dir.clone(),
        }
    }
}
