//! Raw WebSocket helpers for driving the persistent endpoint frame by frame.

use super::constants::FRAME_TIMEOUT_MS;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens a connection presenting `token` as query parameter.
pub async fn connect_ws(ws_url: &str, token: &str) -> WsStream {
    let (ws_stream, _) = connect_async(format!("{}?token={}", ws_url, token))
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

pub async fn send_frame(ws: &mut WsStream, frame: Value) {
    ws.send(Message::text(frame.to_string()))
        .await
        .expect("Failed to send frame");
}

/// Waits for the next frame of `expected_type`, skipping any other frame.
pub async fn wait_for_frame(ws: &mut WsStream, expected_type: &str) -> Option<Value> {
    let result = timeout(Duration::from_millis(FRAME_TIMEOUT_MS), async {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                if let Ok(json) = serde_json::from_str::<Value>(text.as_str()) {
                    if json.get("type").and_then(|t| t.as_str()) == Some(expected_type) {
                        return Some(json);
                    }
                }
            }
        }
        None
    })
    .await;

    result.ok().flatten()
}
