//! Shared constants for end-to-end tests

/// API key accepted by every test server
pub const TEST_API_KEY: &str = "test-api-key";

/// Cached tool that counts handler executions
pub const COMMENTS_TOOL: &str = "get_pr_comments";

/// Uncached tool with a side effect
pub const RECORD_TOOL: &str = "record_event";

/// Tool whose upstream is always down
pub const FAILING_TOOL: &str = "flaky_upstream";

/// How long the comments handler takes, so concurrent calls overlap
pub const HANDLER_DELAY_MS: u64 = 100;

/// Maximum time to wait for server to be ready
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Polling interval when waiting for server
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

/// How long a test waits for an expected frame
pub const FRAME_TIMEOUT_MS: u64 = 2000;
