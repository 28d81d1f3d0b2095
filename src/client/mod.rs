//! Client runtime: correlated requests over the persistent connection, with
//! bounded reconnects and an HTTP fallback for designated tools.

mod client;
mod config;
mod fallback;

pub use client::{ClientState, ToolClient};
pub use config::{
    ClientConfig, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY, DEFAULT_REQUEST_TIMEOUT,
};
pub use fallback::HttpFallback;
