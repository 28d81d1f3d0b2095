//! Tool registry.
//!
//! Populated once at startup, then frozen behind an `Arc` and shared by
//! every ingress path.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// Tool Types
// ============================================================================

/// Result type for tool execution
///
/// A handler may fail with a [`crate::protocol::ToolError`] wrapped in the
/// `anyhow::Error` to choose the reported kind; anything else is reported as
/// `Internal`.
pub type ToolResult = anyhow::Result<Value>;

/// Boxed future for async tool execution
pub type ToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

/// Tool handler function type
pub type ToolHandler = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

/// How results of a tool are cached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Cache with the cache's default ttl
    Default,
    Ttl(Duration),
    /// Never cached and never coalesced; for tools with side effects
    NoCache,
}

impl CachePolicy {
    pub fn ttl(&self, default_ttl: Duration) -> Option<Duration> {
        match self {
            CachePolicy::Default => Some(default_ttl),
            CachePolicy::Ttl(ttl) => Some(*ttl),
            CachePolicy::NoCache => None,
        }
    }
}

/// A registered tool with its contract and handler
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    pub cache_policy: CachePolicy,
    pub handler: ToolHandler,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("cache_policy", &self.cache_policy)
            .finish_non_exhaustive()
    }
}

/// Public view of a descriptor, as returned by tool listing
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    pub cacheable: bool,
}

impl From<&ToolDescriptor> for ToolInfo {
    fn from(tool: &ToolDescriptor) -> Self {
        ToolInfo {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.input_schema.clone(),
            output_schema: tool.output_schema.clone(),
            cacheable: tool.cache_policy != CachePolicy::NoCache,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: ToolDescriptor) -> Result<(), RegistryError> {
        if self.tools.contains_key(&tool.name) {
            return Err(RegistryError::DuplicateTool(tool.name));
        }
        self.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    /// Descriptors sorted by name
    pub fn list(&self) -> Vec<ToolInfo> {
        self.tools.values().map(ToolInfo::from).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for a [`ToolDescriptor`]
pub struct ToolBuilder {
    name: String,
    description: String,
    input_schema: Value,
    output_schema: Value,
    cache_policy: CachePolicy,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
            output_schema: serde_json::json!({}),
            cache_policy: CachePolicy::Default,
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_policy = CachePolicy::Ttl(ttl);
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.cache_policy = CachePolicy::NoCache;
        self
    }

    pub fn build<F, Fut>(self, handler: F) -> ToolDescriptor
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        ToolDescriptor {
            name: self.name,
            description: self.description,
            input_schema: self.input_schema,
            output_schema: self.output_schema,
            cache_policy: self.cache_policy,
            handler: Arc::new(move |params| Box::pin(handler(params))),
        }
    }
}
