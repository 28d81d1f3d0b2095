use anyhow::{Context, Result};
use std::time::Duration;

use axum::{
    extract::State,
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::{error, info};

use super::metrics::metrics_handler;
use super::state::{GuardedDispatcher, GuardedValidator, ServerState};
use super::tool_routes::make_tool_routes;
use super::websocket::ws_handler;
use super::{log_requests, ServerConfig};

#[derive(Serialize)]
struct ServerStats {
    pub name: &'static str,
    pub version: String,
    pub uptime: String,
    pub hash: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    Json(ServerStats {
        name: env!("CARGO_PKG_NAME"),
        version: state.config.server_version.clone(),
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    })
}

pub fn make_app(state: ServerState) -> Router {
    let ws_routes: Router = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state.clone());
    let v1_routes = make_tool_routes(state.clone()).merge(ws_routes);

    Router::new()
        .route("/", get(home))
        .with_state(state.clone())
        .nest("/v1", v1_routes)
        .layer(middleware::from_fn_with_state(state, log_requests))
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

async fn run_metrics_server(port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", port))?;
    Ok(axum::serve(listener, make_metrics_app()).await?)
}

pub async fn run_server(
    config: ServerConfig,
    dispatcher: GuardedDispatcher,
    validator: GuardedValidator,
) -> Result<()> {
    let port = config.port;
    if let Some(metrics_port) = config.metrics_port {
        info!("Metrics available at port {}", metrics_port);
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(metrics_port).await {
                error!("Metrics server stopped: {:#}", e);
            }
        });
    }

    let state = ServerState::new(config, dispatcher, validator);
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;

    info!("Ready to serve at port {}", port);
    Ok(axum::serve(listener, app).await?)
}
