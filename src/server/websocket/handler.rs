//! WebSocket route handler.
//!
//! Handles upgrade, authentication outcome, the frame loop and cleanup.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::protocol::{methods, Frame, FrameParseError, ToolError};
use crate::server::auth::{Authenticated, Identity};
use crate::server::state::ServerState;

/// WebSocket upgrade handler for `GET /v1/ws`.
///
/// The upgrade always succeeds; a connection without a valid credential is
/// closed right away with a policy violation.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    auth: Option<Authenticated>,
    State(state): State<ServerState>,
) -> Response {
    match auth {
        Some(Authenticated { identity }) => {
            debug!("WebSocket upgrade for {:?}", identity.subject);
            ws.on_upgrade(move |socket| handle_socket(socket, identity, state))
        }
        None => {
            warn!("WebSocket connection attempt without a valid credential");
            ws.on_upgrade(reject_socket)
        }
    }
}

async fn reject_socket(mut socket: WebSocket) {
    let close = Message::Close(Some(CloseFrame {
        code: close_code::POLICY,
        reason: Utf8Bytes::from_static("Authentication required"),
    }));
    if let Err(e) = socket.send(close).await {
        debug!("Failed to send close frame: {}", e);
    }
}

/// Handle an established, authenticated WebSocket connection.
async fn handle_socket(socket: WebSocket, identity: Identity, state: ServerState) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    debug!("WebSocket connected: {}", connection_id);

    let (reply_tx, outgoing_rx) = state
        .ws_connection_manager
        .register(&connection_id, identity)
        .await;

    let (ws_sink, ws_stream) = socket.split();

    let connected = Frame::connected(
        connection_id.clone(),
        format!("{}-{}", state.config.server_version, state.hash),
    );
    let outgoing_handle = tokio::spawn(forward_outgoing(ws_sink, outgoing_rx, connected));

    process_incoming(ws_stream, &connection_id, reply_tx, &state).await;

    debug!("WebSocket disconnected: {}", connection_id);
    outgoing_handle.abort();
    state.ws_connection_manager.unregister(&connection_id).await;
}

/// Forward frames from the outgoing channel to the WebSocket.
async fn forward_outgoing(
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outgoing_rx: mpsc::Receiver<Frame>,
    initial: Frame,
) {
    let mut next = Some(initial);
    while let Some(frame) = next {
        match frame.to_text() {
            Ok(text) => {
                if ws_sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                error!("Failed to serialize {} frame: {}", frame.frame_type(), e);
            }
        }
        next = outgoing_rx.recv().await;
    }
}

/// Process incoming frames until the peer goes away.
async fn process_incoming(
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    connection_id: &str,
    reply_tx: mpsc::Sender<Frame>,
    state: &ServerState,
) {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => match Frame::parse(&text) {
                Ok(frame) => handle_frame(connection_id, frame, &reply_tx, state).await,
                Err(FrameParseError::UnknownType(frame_type)) => {
                    debug!("Ignoring frame of unknown type {:?}", frame_type);
                }
                Err(e) => {
                    debug!("Failed to parse frame: {}", e);
                    let error = ToolError::InvalidRequest(e.to_string());
                    let _ = reply_tx.send(Frame::error(None, &error)).await;
                }
            },
            Ok(Message::Binary(_)) => {
                debug!("Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                // Axum answers pings
                debug!("Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!("Received pong");
            }
            Ok(Message::Close(_)) => {
                debug!("Received close frame");
                break;
            }
            Err(e) => {
                debug!("WebSocket error: {}", e);
                break;
            }
        }
    }
}

async fn handle_frame(
    connection_id: &str,
    frame: Frame,
    reply_tx: &mpsc::Sender<Frame>,
    state: &ServerState,
) {
    match frame {
        Frame::Request {
            correlation_id,
            method,
            params,
            ..
        } => {
            // Each request runs on its own task so a slow tool never holds up
            // the frames behind it.
            let dispatcher = state.dispatcher.clone();
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                let reply = if method == methods::LIST_TOOLS {
                    Frame::response(correlation_id, json!({ "tools": dispatcher.list() }))
                } else {
                    match dispatcher.invoke(&method, params).await {
                        Ok(result) => Frame::response(correlation_id, result),
                        Err(e) => Frame::error(Some(correlation_id), &e),
                    }
                };
                if reply_tx.send(reply).await.is_err() {
                    debug!("Connection closed before reply to {} was sent", method);
                }
            });
        }
        Frame::Subscribe { subscriber_id, .. } => {
            if !state
                .ws_connection_manager
                .subscribe(connection_id, subscriber_id)
                .await
            {
                warn!("Subscribe from unregistered connection {}", connection_id);
            }
        }
        other => {
            debug!(
                "Ignoring {} frame from connection {}",
                other.frame_type(),
                connection_id
            );
        }
    }
}
