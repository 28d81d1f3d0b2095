use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tool_relay::cache::{ResultCache, SqliteDurableStore};
use tool_relay::config::{AppConfig, CliConfig, FileConfig};
use tool_relay::server::auth::{AnyValidator, CredentialValidator, JwtValidator, StaticKeyValidator};
use tool_relay::server::{metrics, run_server, RequestsLoggingLevel};
use tool_relay::tools::github::{register_github_tools, GitHubClient};
use tool_relay::tools::{Dispatcher, TokenBucket, ToolRegistry};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(version, about)]
struct CliArgs {
    /// Path to a TOML config file. Values found there override the flags below.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping). Disabled when unset.
    #[clap(long)]
    pub metrics_port: Option<u16>,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// A static API key accepted as bearer credential. Can be repeated.
    #[clap(long = "api-key")]
    pub api_keys: Vec<String>,

    /// HMAC secret used to verify JWT bearer credentials.
    #[clap(long)]
    pub jwt_secret: Option<String>,

    /// Default lifetime of cached tool results, in seconds.
    #[clap(long, default_value_t = 300)]
    pub cache_ttl_secs: u64,

    /// How often expired cache entries are swept, in seconds.
    #[clap(long, default_value_t = 60)]
    pub cache_sweep_interval_secs: u64,

    /// Path to the SQLite file backing the durable cache tier.
    #[clap(long, value_parser = parse_path)]
    pub durable_cache_path: Option<PathBuf>,

    /// Number of tool invocations allowed per rate limit period.
    #[clap(long, default_value_t = 30)]
    pub rate_limit_capacity: u32,

    #[clap(long, default_value_t = 60)]
    pub rate_limit_period_secs: u64,

    /// Base URL of the GitHub REST API.
    #[clap(long)]
    pub github_api_url: Option<String>,

    /// GitHub token. Falls back to the GITHUB_TOKEN environment variable.
    #[clap(long)]
    pub github_token: Option<String>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            port: self.port,
            metrics_port: self.metrics_port,
            logging_level: self.logging_level.clone(),
            api_keys: self.api_keys.clone(),
            jwt_secret: self.jwt_secret.clone(),
            cache_ttl_secs: self.cache_ttl_secs,
            cache_sweep_interval_secs: self.cache_sweep_interval_secs,
            durable_cache_path: self.durable_cache_path.clone(),
            rate_limit_capacity: self.rate_limit_capacity,
            rate_limit_period_secs: self.rate_limit_period_secs,
            github_api_url: self.github_api_url.clone(),
            github_token: self
                .github_token
                .clone()
                .or_else(|| std::env::var("GITHUB_TOKEN").ok()),
        }
    }
}

fn build_validator(config: &AppConfig) -> Arc<dyn CredentialValidator> {
    let mut validators: Vec<Arc<dyn CredentialValidator>> = Vec::new();
    if !config.api_keys.is_empty() {
        info!("Accepting {} static API key(s)", config.api_keys.len());
        validators.push(Arc::new(StaticKeyValidator::new(config.api_keys.iter())));
    }
    if let Some(secret) = &config.jwt_secret {
        info!("Accepting JWT bearer tokens");
        validators.push(Arc::new(JwtValidator::new(secret)));
    }
    Arc::new(AnyValidator::new(validators))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}...", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    let mut cache = ResultCache::new(config.cache_ttl());
    match &config.durable_cache_path {
        Some(path) => {
            info!("Opening durable cache at {:?}...", path);
            let store = SqliteDurableStore::new(path)
                .with_context(|| format!("Failed to open durable cache at {:?}", path))?;
            cache = cache.with_durable(Arc::new(store));
        }
        None => warn!("No durable cache configured, results are kept in memory only"),
    }
    let cache = Arc::new(cache);
    cache.spawn_sweeper(config.cache_sweep_interval());

    if config.github_token.is_none() {
        warn!("No GitHub token configured, requests are unauthenticated");
    }
    let github = Arc::new(GitHubClient::new(
        config.github_api_url.clone(),
        config.github_token.clone(),
    )?);
    let mut registry = ToolRegistry::new();
    register_github_tools(&mut registry, github)?;
    info!("Registered {} tool(s)", registry.tool_count());

    let limiter = Arc::new(TokenBucket::new(config.rate_limit()));
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry), cache, limiter));

    run_server(config.server_config(), dispatcher, build_validator(&config)).await
}
