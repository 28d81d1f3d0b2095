//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own registry, cache and
//! rate limiter, bound to a random port.

use super::constants::*;
use super::fixtures::{create_test_registry, ToolCounters};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tool_relay::cache::ResultCache;
use tool_relay::client::ClientConfig;
use tool_relay::server::auth::StaticKeyValidator;
use tool_relay::server::{make_app, RequestsLoggingLevel, ServerConfig, ServerState};
use tool_relay::tools::{Dispatcher, RateLimitConfig, TokenBucket};

/// Test server instance
///
/// When dropped, the server gracefully shuts down.
pub struct TestServer {
    /// Base URL for HTTP requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// URL of the persistent endpoint
    pub ws_url: String,

    #[allow(dead_code)]
    pub port: u16,

    /// Handler execution counters of the test tools
    #[allow(dead_code)]
    pub counters: ToolCounters,

    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a server whose rate limit never gets in the way.
    pub async fn spawn() -> Self {
        Self::spawn_with_rate_limit(RateLimitConfig {
            capacity: 1000,
            period: Duration::from_secs(1),
        })
        .await
    }

    pub async fn spawn_with_rate_limit(rate_limit: RateLimitConfig) -> Self {
        let (registry, counters) = create_test_registry();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(registry),
            Arc::new(ResultCache::new(Duration::from_secs(60))),
            Arc::new(TokenBucket::new(rate_limit)),
        ));
        let validator = Arc::new(StaticKeyValidator::new([TEST_API_KEY]));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            ..ServerConfig::default()
        };
        let app = make_app(ServerState::new(config, dispatcher, validator));

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url: format!("http://127.0.0.1:{}", port),
            ws_url: format!("ws://127.0.0.1:{}/v1/ws", port),
            port,
            counters,
            _shutdown_tx: Some(shutdown_tx),
        };
        server.wait_for_ready().await;
        server
    }

    /// Client configuration pointing at this server with a valid key.
    #[allow(dead_code)]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::for_server(&self.base_url).with_token(TEST_API_KEY)
    }

    /// Waits for the server to become ready by polling the home route
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
