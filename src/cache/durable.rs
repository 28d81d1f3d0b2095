use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Summary reported by a durable backend.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DurableInfo {
    pub backend: String,
    pub entries: u64,
    pub schema_version: i64,
}

/// Shared key-value store backing the second cache tier.
///
/// Implementations provide per-key atomicity. Errors are reported to the
/// cache, which absorbs them.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Removes every entry.
    async fn flush(&self) -> Result<()>;

    async fn info(&self) -> Result<DurableInfo>;
}
