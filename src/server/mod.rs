pub mod auth;
pub mod config;
mod http_layers;
pub mod metrics;
pub mod server;
pub mod state;
mod tool_routes;
pub mod websocket;

pub use auth::{AnyValidator, CredentialValidator, Identity, JwtValidator, StaticKeyValidator};
pub use config::ServerConfig;
pub use http_layers::*;
pub use server::{make_app, run_server};
pub use state::ServerState;
