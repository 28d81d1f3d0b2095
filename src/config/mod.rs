mod file_config;

pub use file_config::FileConfig;

use crate::server::{RequestsLoggingLevel, ServerConfig};
use crate::tools::github::DEFAULT_API_URL;
use crate::tools::RateLimitConfig;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub port: u16,
    pub metrics_port: Option<u16>,
    pub logging_level: RequestsLoggingLevel,
    pub api_keys: Vec<String>,
    pub jwt_secret: Option<String>,
    pub cache_ttl_secs: u64,
    pub cache_sweep_interval_secs: u64,
    pub durable_cache_path: Option<PathBuf>,
    pub rate_limit_capacity: u32,
    pub rate_limit_period_secs: u64,
    pub github_api_url: Option<String>,
    pub github_token: Option<String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            metrics_port: None,
            logging_level: RequestsLoggingLevel::default(),
            api_keys: Vec::new(),
            jwt_secret: None,
            cache_ttl_secs: 300,
            cache_sweep_interval_secs: 60,
            durable_cache_path: None,
            rate_limit_capacity: 30,
            rate_limit_period_secs: 60,
            github_api_url: None,
            github_token: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub metrics_port: Option<u16>,
    pub logging_level: RequestsLoggingLevel,

    pub api_keys: Vec<String>,
    pub jwt_secret: Option<String>,

    pub cache_ttl_secs: u64,
    pub cache_sweep_interval_secs: u64,
    pub durable_cache_path: Option<PathBuf>,

    pub rate_limit_capacity: u32,
    pub rate_limit_period_secs: u64,

    pub github_api_url: String,
    pub github_token: Option<String>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let api_keys: Vec<String> = file
            .api_keys
            .unwrap_or_else(|| cli.api_keys.clone())
            .into_iter()
            .filter(|k| !k.trim().is_empty())
            .collect();
        let jwt_secret = file
            .jwt_secret
            .or_else(|| cli.jwt_secret.clone())
            .filter(|s| !s.is_empty());

        if api_keys.is_empty() && jwt_secret.is_none() {
            bail!("No credentials configured: set api_keys and/or jwt_secret");
        }

        let cache_ttl_secs = file.cache_ttl_secs.unwrap_or(cli.cache_ttl_secs);
        let cache_sweep_interval_secs = file
            .cache_sweep_interval_secs
            .unwrap_or(cli.cache_sweep_interval_secs);
        if cache_sweep_interval_secs == 0 {
            bail!("cache_sweep_interval_secs must be greater than zero");
        }
        let durable_cache_path = file
            .durable_cache_path
            .map(PathBuf::from)
            .or_else(|| cli.durable_cache_path.clone());

        let rate_limit_capacity = file.rate_limit_capacity.unwrap_or(cli.rate_limit_capacity);
        if rate_limit_capacity == 0 {
            bail!("rate_limit_capacity must be greater than zero");
        }
        let rate_limit_period_secs = file
            .rate_limit_period_secs
            .unwrap_or(cli.rate_limit_period_secs);
        if rate_limit_period_secs == 0 {
            bail!("rate_limit_period_secs must be greater than zero");
        }

        let github_api_url = file
            .github_api_url
            .or_else(|| cli.github_api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let github_token = file.github_token.or_else(|| cli.github_token.clone());

        Ok(Self {
            port,
            metrics_port,
            logging_level,
            api_keys,
            jwt_secret,
            cache_ttl_secs,
            cache_sweep_interval_secs,
            durable_cache_path,
            rate_limit_capacity,
            rate_limit_period_secs,
            github_api_url,
            github_token,
        })
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs)
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            capacity: self.rate_limit_capacity,
            period: Duration::from_secs(self.rate_limit_period_secs),
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            requests_logging_level: self.logging_level.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            ..ServerConfig::default()
        }
    }
}

fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
