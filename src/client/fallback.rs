//! Stateless invocation over HTTP, used while no persistent connection is up.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::protocol::{new_correlation_id, ErrorBody, InvokeBody, InvokeResult, ToolError};
use crate::tools::ToolInfo;

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ToolList {
    tools: Vec<ToolInfo>,
}

pub struct HttpFallback {
    http_client: Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpFallback {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.into(),
            token,
            timeout,
        }
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.timeout(self.timeout);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> ToolError {
        debug!("HTTP fallback transport error: {}", err);
        if err.is_timeout() {
            ToolError::Timeout(self.timeout.as_millis() as u64)
        } else {
            ToolError::NotConnected
        }
    }

    /// Turns a non-success reply into the error it describes.
    fn error_from_reply(status: StatusCode, body: &[u8]) -> ToolError {
        match serde_json::from_slice::<ErrorEnvelope>(body) {
            Ok(envelope) => ToolError::from_body(&envelope.error),
            Err(_) => match status {
                StatusCode::UNAUTHORIZED => ToolError::Unauthorized,
                StatusCode::NOT_FOUND => ToolError::NotFound(status.to_string()),
                _ => ToolError::ServiceUnavailable(format!("HTTP {}", status)),
            },
        }
    }

    pub async fn invoke(&self, tool: &str, params: Value) -> Result<Value, ToolError> {
        let url = format!("{}/v1/tools/{}", self.base_url, tool);
        let body = InvokeBody {
            correlation_id: Some(new_correlation_id()),
            params,
        };

        let response = self
            .request(self.http_client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(Self::error_from_reply(status, &bytes));
        }

        serde_json::from_slice::<InvokeResult>(&bytes)
            .map(|reply| reply.result)
            .map_err(|e| ToolError::Internal(format!("unexpected reply: {}", e)))
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, ToolError> {
        let url = format!("{}/v1/tools", self.base_url);
        let response = self
            .request(self.http_client.get(&url))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(Self::error_from_reply(status, &bytes));
        }

        serde_json::from_slice::<ToolList>(&bytes)
            .map(|list| list.tools)
            .map_err(|e| ToolError::Internal(format!("unexpected reply: {}", e)))
    }
}
