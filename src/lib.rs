//! Tool Relay Library
//!
//! Request/response tool invocation over WebSocket and HTTP, with a shared
//! rate limiter, a two-tier result cache and a reconnecting client.

pub mod cache;
pub mod client;
pub mod config;
pub mod protocol;
pub mod server;
pub mod sqlite_persistence;
pub mod tools;

// Re-export commonly used types for convenience
pub use cache::{ResultCache, SqliteDurableStore};
pub use client::{ClientConfig, ClientState, ToolClient};
pub use protocol::{Frame, ToolError};
pub use server::{run_server, RequestsLoggingLevel, ServerState};
pub use tools::{Dispatcher, TokenBucket, ToolBuilder, ToolRegistry};
