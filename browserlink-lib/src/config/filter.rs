use serde::{Deserialize, Serialize};
use crate::filter::FilterParams;

/// Script-injection thresholds.
/// Nests under top-level `filter` in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Consecutive injection timeouts after which the host is no longer contacted. Default: 2.
    pub timeout_limit: u32,
    /// How long the first body write waits for the host's status line (ms). Default: 1000.
    pub injection_timeout_ms: u64,
    /// Bytes of the first body write inspected by the HTML sniffer. Default: 512.
    pub sniff_bytes: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self { timeout_limit: 2, injection_timeout_ms: 1000, sniff_bytes: 512 }
    }
}

impl From<&FilterConfig> for FilterParams {
    fn from(c: &FilterConfig) -> Self {
        FilterParams {
            timeout_limit: c.timeout_limit,
            injection_timeout: std::time::Duration::from_millis(c.injection_timeout_ms),
            sniff_bytes: c.sniff_bytes,
        }
    }
}
