use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,

    // Credentials
    pub api_keys: Option<Vec<String>>,
    pub jwt_secret: Option<String>,

    // Result cache
    pub cache_ttl_secs: Option<u64>,
    pub cache_sweep_interval_secs: Option<u64>,
    pub durable_cache_path: Option<String>,

    // Admission control
    pub rate_limit_capacity: Option<u32>,
    pub rate_limit_period_secs: Option<u64>,

    // GitHub tools
    pub github_api_url: Option<String>,
    pub github_token: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
