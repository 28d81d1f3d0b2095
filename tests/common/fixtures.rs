//! Test tool registry
//!
//! Handlers record how often they actually run, so tests can tell cache
//! hits and coalesced calls apart from real executions.

use super::constants::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tool_relay::protocol::ToolError;
use tool_relay::tools::{ToolBuilder, ToolRegistry};

#[derive(Clone, Default)]
pub struct ToolCounters {
    pub comments: Arc<AtomicUsize>,
    pub records: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl ToolCounters {
    pub fn comments(&self) -> usize {
        self.comments.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> usize {
        self.records.load(Ordering::SeqCst)
    }
}

pub fn create_test_registry() -> (ToolRegistry, ToolCounters) {
    let counters = ToolCounters::default();
    let mut registry = ToolRegistry::new();

    let comments = counters.comments.clone();
    registry
        .register(
            ToolBuilder::new(COMMENTS_TOOL)
                .description("List review comments on a pull request")
                .input_schema(json!({
                    "type": "object",
                    "required": ["owner", "repo", "pullNumber"]
                }))
                .build(move |params| {
                    let comments = comments.clone();
                    async move {
                        comments.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(HANDLER_DELAY_MS)).await;
                        Ok(json!({
                            "pullNumber": params["pullNumber"],
                            "comments": [{"id": 1, "author": "octocat", "body": "LGTM"}]
                        }))
                    }
                }),
        )
        .expect("Failed to register comments tool");

    let records = counters.records.clone();
    registry
        .register(
            ToolBuilder::new(RECORD_TOOL)
                .description("Records an event")
                .no_cache()
                .build(move |_| {
                    let records = records.clone();
                    async move {
                        let count = records.fetch_add(1, Ordering::SeqCst) + 1;
                        Ok(json!({ "recorded": count }))
                    }
                }),
        )
        .expect("Failed to register record tool");

    registry
        .register(
            ToolBuilder::new(FAILING_TOOL)
                .description("Always fails")
                .no_cache()
                .build(|_| async move {
                    Err(ToolError::ServiceUnavailable("upstream down".to_string()).into())
                }),
        )
        .expect("Failed to register failing tool");

    (registry, counters)
}
