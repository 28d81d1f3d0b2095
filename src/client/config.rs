use std::collections::HashSet;
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Persistent endpoint, e.g. `ws://localhost:3001/v1/ws`
    pub ws_url: String,
    /// Base of the stateless endpoints, e.g. `http://localhost:3001`
    pub http_base_url: String,
    pub token: Option<String>,
    pub request_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    /// Tools that may be invoked over HTTP while disconnected
    pub fallback_tools: HashSet<String>,
}

impl ClientConfig {
    pub fn new(ws_url: impl Into<String>, http_base_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            http_base_url: http_base_url.into().trim_end_matches('/').to_string(),
            token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            fallback_tools: HashSet::new(),
        }
    }

    /// Derives both endpoints from a server base url such as
    /// `http://localhost:3001`.
    pub fn for_server(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base_url.to_string()
        };
        Self::new(format!("{}/v1/ws", ws_base), base_url)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_fallback_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_tools = tools.into_iter().map(Into::into).collect();
        self
    }
}
