//! Protocol frames exchanged over the persistent connection.
//!
//! Every frame is a JSON object tagged by its `type` member. Request,
//! response and error frames carry the `correlationId` that pairs them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::errors::{ErrorBody, ToolError};

/// Frame type tags accepted on the wire.
pub mod frame_types {
    pub const REQUEST: &str = "request";
    pub const RESPONSE: &str = "response";
    pub const ERROR: &str = "error";
    pub const NOTIFICATION: &str = "notification";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const CONNECTED: &str = "connected";

    pub const ALL: &[&str] = &[REQUEST, RESPONSE, ERROR, NOTIFICATION, SUBSCRIBE, CONNECTED];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    #[serde(rename_all = "camelCase")]
    Request {
        correlation_id: String,
        method: String,
        #[serde(default)]
        params: Value,
        #[serde(default)]
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    Response {
        correlation_id: String,
        result: Value,
        #[serde(default)]
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
        error: ErrorBody,
        #[serde(default)]
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    Notification {
        method: String,
        #[serde(default)]
        params: Value,
        #[serde(default)]
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    Subscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subscriber_id: Option<String>,
        #[serde(default)]
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    Connected {
        connection_id: String,
        server_version: String,
        #[serde(default)]
        timestamp: i64,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum FrameParseError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unknown frame type: {0}")]
    UnknownType(String),
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generates a fresh correlation id.
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Frame {
    pub fn request(correlation_id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Frame::Request {
            correlation_id: correlation_id.into(),
            method: method.into(),
            params,
            timestamp: now_millis(),
        }
    }

    pub fn response(correlation_id: impl Into<String>, result: Value) -> Self {
        Frame::Response {
            correlation_id: correlation_id.into(),
            result,
            timestamp: now_millis(),
        }
    }

    pub fn error(correlation_id: Option<String>, error: &ToolError) -> Self {
        Frame::Error {
            correlation_id,
            error: error.into(),
            timestamp: now_millis(),
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Frame::Notification {
            method: method.into(),
            params,
            timestamp: now_millis(),
        }
    }

    pub fn subscribe(subscriber_id: Option<String>) -> Self {
        Frame::Subscribe {
            subscriber_id,
            timestamp: now_millis(),
        }
    }

    pub fn connected(connection_id: impl Into<String>, server_version: impl Into<String>) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            server_version: server_version.into(),
            timestamp: now_millis(),
        }
    }

    /// Parses one text frame.
    ///
    /// A well-formed object with an unrecognized `type` is reported as
    /// `UnknownType` so the receiver can log and skip it.
    pub fn parse(text: &str) -> Result<Self, FrameParseError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameParseError::Malformed(e.to_string()))?;

        let frame_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| FrameParseError::Malformed("missing type".to_string()))?;

        if !frame_types::ALL.contains(&frame_type) {
            return Err(FrameParseError::UnknownType(frame_type.to_string()));
        }

        serde_json::from_value(value).map_err(|e| FrameParseError::Malformed(e.to_string()))
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn frame_type(&self) -> &'static str {
        match self {
            Frame::Request { .. } => frame_types::REQUEST,
            Frame::Response { .. } => frame_types::RESPONSE,
            Frame::Error { .. } => frame_types::ERROR,
            Frame::Notification { .. } => frame_types::NOTIFICATION,
            Frame::Subscribe { .. } => frame_types::SUBSCRIBE,
            Frame::Connected { .. } => frame_types::CONNECTED,
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Frame::Request { correlation_id, .. } | Frame::Response { correlation_id, .. } => {
                Some(correlation_id)
            }
            Frame::Error { correlation_id, .. } => correlation_id.as_deref(),
            _ => None,
        }
    }
}
