//! Stateless tool API routes

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::auth::Authenticated;
use super::state::{GuardedConnectionManager, GuardedDispatcher, ServerState};
use crate::protocol::{new_correlation_id, Frame, InvokeBody, InvokeError, InvokeResult, ToolError};
use crate::tools::ToolInfo;

#[derive(Serialize)]
struct ToolList {
    tools: Vec<ToolInfo>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct NotificationBody {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    /// Only connections subscribed under this id receive the notification
    pub subscriber_id: Option<String>,
}

fn invoke_error(correlation_id: String, err: &ToolError) -> Response {
    let body = InvokeError {
        correlation_id,
        error: err.into(),
    };
    (err.kind().http_status(), Json(body)).into_response()
}

/// GET /v1/tools
async fn list_tools(
    _auth: Authenticated,
    State(dispatcher): State<GuardedDispatcher>,
) -> impl IntoResponse {
    Json(ToolList {
        tools: dispatcher.list(),
    })
}

/// POST /v1/tools/{name}
///
/// An empty body invokes the tool with no parameters. The correlation id is
/// echoed back, or generated when the caller did not send one.
async fn invoke_tool(
    _auth: Authenticated,
    State(dispatcher): State<GuardedDispatcher>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    let body: InvokeBody = if body.is_empty() {
        InvokeBody {
            correlation_id: None,
            params: Value::Null,
        }
    } else {
        match serde_json::from_slice(&body) {
            Ok(body) => body,
            Err(e) => {
                debug!("Rejected invoke body for {}: {}", name, e);
                let err = ToolError::InvalidRequest(format!("invalid body: {}", e));
                return invoke_error(new_correlation_id(), &err);
            }
        }
    };

    let correlation_id = body.correlation_id.unwrap_or_else(new_correlation_id);

    match dispatcher.invoke(&name, body.params).await {
        Ok(result) => Json(InvokeResult {
            correlation_id,
            result,
        })
        .into_response(),
        Err(err) => invoke_error(correlation_id, &err),
    }
}

/// POST /v1/notifications
async fn post_notification(
    _auth: Authenticated,
    State(connection_manager): State<GuardedConnectionManager>,
    Json(body): Json<NotificationBody>,
) -> impl IntoResponse {
    let frame = Frame::notification(body.method.clone(), body.params);
    let report = match &body.subscriber_id {
        Some(subscriber_id) => connection_manager.publish(subscriber_id, frame).await,
        None => connection_manager.broadcast(frame).await,
    };

    info!(
        "Notification {} delivered to {} connection(s), {} failed",
        body.method, report.delivered, report.failed
    );
    Json(report)
}

/// GET /v1/cache/stats
async fn cache_stats(
    _auth: Authenticated,
    State(dispatcher): State<GuardedDispatcher>,
) -> impl IntoResponse {
    Json(dispatcher.cache().stats().await)
}

/// DELETE /v1/cache
async fn clear_cache(
    _auth: Authenticated,
    State(dispatcher): State<GuardedDispatcher>,
) -> impl IntoResponse {
    dispatcher.cache().clear().await;
    info!("Result cache cleared");
    StatusCode::NO_CONTENT
}

pub fn make_tool_routes(state: ServerState) -> Router {
    Router::new()
        .route("/tools", get(list_tools))
        .route("/tools/{name}", post(invoke_tool))
        .route("/notifications", post(post_notification))
        .route("/cache/stats", get(cache_stats))
        .route("/cache", delete(clear_cache))
        .with_state(state)
}
