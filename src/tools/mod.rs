//! Tool registry, admission control and dispatch.

mod dispatcher;
pub mod github;
mod rate_limit;
mod registry;

pub use dispatcher::{DispatchResult, Dispatcher};
pub use rate_limit::{RateLimitConfig, TokenBucket};
pub use registry::{
    CachePolicy, RegistryError, ToolBuilder, ToolDescriptor, ToolFuture, ToolHandler, ToolInfo,
    ToolRegistry, ToolResult,
};
