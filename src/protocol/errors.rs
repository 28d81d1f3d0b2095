//! Tool invocation error taxonomy.
//!
//! Every failure a caller can observe is one of these kinds, each with a
//! stable numeric code carried in `error` frames and HTTP error bodies.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error kinds exposed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    NotFound,
    Internal,
    Unauthorized,
    Timeout,
    NotConnected,
    ServiceUnavailable,
}

impl ErrorKind {
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::InvalidRequest => -32600,
            ErrorKind::NotFound => -32601,
            ErrorKind::Internal => -32603,
            ErrorKind::Unauthorized => -32001,
            ErrorKind::Timeout => -32008,
            ErrorKind::NotConnected => -32010,
            ErrorKind::ServiceUnavailable => -32011,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -32600 => Some(ErrorKind::InvalidRequest),
            -32601 => Some(ErrorKind::NotFound),
            -32603 => Some(ErrorKind::Internal),
            -32001 => Some(ErrorKind::Unauthorized),
            -32008 => Some(ErrorKind::Timeout),
            -32010 => Some(ErrorKind::NotConnected),
            -32011 => Some(ErrorKind::ServiceUnavailable),
            _ => None,
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::NotConnected | ErrorKind::ServiceUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

/// Error returned by every tool invocation path.
///
/// `Clone` because a single failed computation may be observed by several
/// callers sharing one in-progress dispatch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Tool not found: {0}")]
    NotFound(String),
    #[error("Tool execution failed: {0}")]
    Internal(String),
    #[error("Authentication required")]
    Unauthorized,
    #[error("Request timed out after {0} ms")]
    Timeout(u64),
    #[error("Not connected")]
    NotConnected,
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ToolError::NotFound(_) => ErrorKind::NotFound,
            ToolError::Internal(_) => ErrorKind::Internal,
            ToolError::Unauthorized => ErrorKind::Unauthorized,
            ToolError::Timeout(_) => ErrorKind::Timeout,
            ToolError::NotConnected => ErrorKind::NotConnected,
            ToolError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
        }
    }

    pub fn code(&self) -> i32 {
        self.kind().code()
    }

    /// Rebuilds an error received from the other side of the protocol.
    pub fn from_body(body: &ErrorBody) -> Self {
        let detail = |prefix: &str| {
            body.message
                .strip_prefix(prefix)
                .unwrap_or(&body.message)
                .to_string()
        };
        match ErrorKind::from_code(body.code) {
            Some(ErrorKind::InvalidRequest) => {
                ToolError::InvalidRequest(detail("Invalid request: "))
            }
            Some(ErrorKind::NotFound) => ToolError::NotFound(detail("Tool not found: ")),
            Some(ErrorKind::Unauthorized) => ToolError::Unauthorized,
            Some(ErrorKind::Timeout) => ToolError::Timeout(
                detail("Request timed out after ")
                    .trim_end_matches(" ms")
                    .parse()
                    .unwrap_or(0),
            ),
            Some(ErrorKind::NotConnected) => ToolError::NotConnected,
            Some(ErrorKind::ServiceUnavailable) => {
                ToolError::ServiceUnavailable(detail("Service unavailable: "))
            }
            Some(ErrorKind::Internal) => ToolError::Internal(detail("Tool execution failed: ")),
            None => ToolError::Internal(body.message.clone()),
        }
    }
}

/// `error` member of error frames and HTTP error bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
}

impl From<&ToolError> for ErrorBody {
    fn from(err: &ToolError) -> Self {
        ErrorBody {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<ToolError> for ErrorBody {
    fn from(err: ToolError) -> Self {
        ErrorBody::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ToolError::InvalidRequest("".to_string()).code(), -32600);
        assert_eq!(ToolError::NotFound("x".to_string()).code(), -32601);
        assert_eq!(ToolError::Internal("".to_string()).code(), -32603);
        assert_eq!(ToolError::Unauthorized.code(), -32001);
        assert_eq!(ToolError::Timeout(30_000).code(), -32008);
        assert_eq!(ToolError::NotConnected.code(), -32010);
        assert_eq!(ToolError::ServiceUnavailable("".to_string()).code(), -32011);
    }

    #[test]
    fn test_error_body_keeps_kind() {
        let body = ErrorBody::from(ToolError::NotFound("unregistered_tool".to_string()));
        assert_eq!(body.message, "Tool not found: unregistered_tool");

        let rebuilt = ToolError::from_body(&body);
        assert_eq!(rebuilt, ToolError::NotFound("unregistered_tool".to_string()));
    }

    #[test]
    fn test_timeout_keeps_its_deadline() {
        let body = ErrorBody::from(ToolError::Timeout(30_000));
        assert_eq!(ToolError::from_body(&body), ToolError::Timeout(30_000));

        let foreign = ErrorBody {
            code: -32008,
            message: "upstream gave up".to_string(),
        };
        assert_eq!(ToolError::from_body(&foreign), ToolError::Timeout(0));
    }

    #[test]
    fn test_unknown_code_becomes_internal() {
        let body = ErrorBody {
            code: 42,
            message: "boom".to_string(),
        };
        assert_eq!(ToolError::from_body(&body), ToolError::Internal("boom".to_string()));
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorKind::NotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::Unauthorized.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::Timeout.http_status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
