//! Wire protocol shared by the server and client runtimes.
//!
//! - Persistent transport: WebSocket at `/v1/ws`, one JSON [`Frame`] per text message
//! - Stateless transport: `POST /v1/tools/{name}` with [`InvokeBody`]
//! - Errors: [`ToolError`] kinds with stable numeric codes

mod errors;
mod frames;

pub use errors::{ErrorBody, ErrorKind, ToolError};
pub use frames::{frame_types, new_correlation_id, Frame, FrameParseError};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved request methods that are answered by the runtime itself.
pub mod methods {
    pub const LIST_TOOLS: &str = "tools/list";
}

/// Body of a stateless invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeBody {
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub params: Value,
}

/// Successful stateless invocation reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResult {
    pub correlation_id: String,
    pub result: Value,
}

/// Failed stateless invocation reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeError {
    pub correlation_id: String,
    pub error: ErrorBody,
}
