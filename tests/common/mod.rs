//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestServer, TEST_API_KEY};
//!
//! #[tokio::test]
//! async fn test_list_tools() {
//!     let server = TestServer::spawn().await;
//!     let response = reqwest::Client::new()
//!         .get(format!("{}/v1/tools", server.base_url))
//!         .bearer_auth(TEST_API_KEY)
//!         .send()
//!         .await
//!         .unwrap();
//!     assert!(response.status().is_success());
//! }
//! ```

mod constants;
mod fixtures;
mod server;
mod ws;

// Public API - this is what tests import
pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::ToolCounters;
pub use server::TestServer;
#[allow(unused_imports)]
pub use ws::{connect_ws, send_frame, wait_for_frame, WsStream};
