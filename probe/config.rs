use anyhow::Result;
use serde::Deserialize;

use browserlink_lib::config::{resolve_config_path, FilterConfig, HostConfig, TransportConfig};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProbeConfigFile {
    pub log_level: Option<String>,
    /// Emit JSON log lines instead of plain text.
    pub log_json: bool,
    /// Application root used when a subcommand is given none.
    pub app_path: Option<String>,
    pub filter: FilterConfig,
    pub host: HostConfig,
    pub transport: TransportConfig,
}

impl ProbeConfigFile {
    /// Load from `path`, or defaults when the file exists in neither `./` nor `../`.
    pub fn load(path: &str) -> Result<Self> {
        let Ok(path) = resolve_config_path(path) else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(&path)?;
        let config: ProbeConfigFile = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn app_path(&self, arg: Option<String>) -> Result<String> {
        arg.or_else(|| self.app_path.clone())
            .ok_or_else(|| anyhow::anyhow!("no application path given (argument or `app_path` in config)"))
    }
}
