//! Client runtime for the persistent protocol.
//!
//! Requests are correlated with their replies by id and bounded by a local
//! timeout. A dropped transport is retried a bounded number of times; while
//! no transport is up, designated tools go over the stateless HTTP path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::config::ClientConfig;
use super::fallback::HttpFallback;
use crate::protocol::{new_correlation_id, Frame, ToolError};
use crate::tools::ToolInfo;

const NOTIFICATION_BUFFER: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Reply = Result<Value, ToolError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
}

/// The live transport, plus what must be sent once one comes up.
#[derive(Default)]
struct Link {
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    reader: Option<JoinHandle<()>>,
    queued: Vec<Frame>,
    /// Re-sent on every new transport; the server forgets it on disconnect.
    subscription: Option<Option<String>>,
    connection_id: Option<String>,
}

struct Inner {
    config: ClientConfig,
    fallback: HttpFallback,
    pending: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
    link: Mutex<Link>,
    state_tx: watch::Sender<ClientState>,
    notifications: broadcast::Sender<Frame>,
    /// Bumped by explicit connect and disconnect; stale reconnect loops stop.
    session: AtomicU64,
    /// Bumped per transport; a reader only reacts to the closure of its own.
    transport: AtomicU64,
    reconnect_attempts: AtomicU32,
}

struct OpenedTransport {
    outgoing: mpsc::UnboundedSender<Message>,
    read: SplitStream<WsStream>,
    connection_id: String,
}

impl Inner {
    fn lock_link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Reply>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state(&self) -> ClientState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ClientState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Client state {:?} -> {:?}", previous, state);
        }
    }

    fn timeout_error(&self) -> ToolError {
        ToolError::Timeout(self.config.request_timeout.as_millis() as u64)
    }

    fn resolve(&self, correlation_id: &str, reply: Reply) {
        match self.lock_pending().remove(correlation_id) {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => debug!("No pending request {}, dropping reply", correlation_id),
        }
    }

    fn handle_text(&self, text: &str) {
        match Frame::parse(text) {
            Ok(Frame::Response {
                correlation_id,
                result,
                ..
            }) => self.resolve(&correlation_id, Ok(result)),
            Ok(Frame::Error {
                correlation_id: Some(correlation_id),
                error,
                ..
            }) => self.resolve(&correlation_id, Err(ToolError::from_body(&error))),
            Ok(Frame::Error { error, .. }) => {
                warn!("Server reported an error: {}", error.message);
            }
            Ok(frame @ Frame::Notification { .. }) => {
                if self.notifications.send(frame).is_err() {
                    debug!("No listeners for notification");
                }
            }
            Ok(other) => debug!("Ignoring {} frame", other.frame_type()),
            Err(e) => debug!("Failed to parse frame: {}", e),
        }
    }
}

fn send_frame(outgoing: &mpsc::UnboundedSender<Message>, frame: &Frame) {
    match frame.to_text() {
        Ok(text) => {
            if outgoing.send(Message::text(text)).is_err() {
                debug!("Transport writer is gone, {} frame lost", frame.frame_type());
            }
        }
        Err(e) => error!("Failed to serialize {} frame: {}", frame.frame_type(), e),
    }
}

fn build_request(config: &ClientConfig) -> Result<Request, ToolError> {
    let mut request = config
        .ws_url
        .as_str()
        .into_client_request()
        .map_err(|e| ToolError::InvalidRequest(format!("invalid endpoint: {}", e)))?;

    if let Some(token) = &config.token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| ToolError::InvalidRequest(format!("invalid token: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(request)
}

/// Opens a transport and waits for the server's `connected` frame.
async fn open_transport(config: &ClientConfig) -> Result<OpenedTransport, ToolError> {
    let request = build_request(config)?;

    let (ws_stream, _) = connect_async(request).await.map_err(|e| match e {
        tungstenite::Error::Http(response) if response.status() == StatusCode::UNAUTHORIZED => {
            ToolError::Unauthorized
        }
        other => {
            debug!("Connection to {} failed: {}", config.ws_url, other);
            ToolError::NotConnected
        }
    })?;

    let (mut write, mut read) = ws_stream.split();

    let first = tokio::time::timeout(config.request_timeout, read.next())
        .await
        .map_err(|_| ToolError::Timeout(config.request_timeout.as_millis() as u64))?;

    let connection_id = match first {
        Some(Ok(Message::Text(text))) => match Frame::parse(&text) {
            Ok(Frame::Connected { connection_id, .. }) => connection_id,
            Ok(other) => {
                return Err(ToolError::Internal(format!(
                    "expected connected frame, got {}",
                    other.frame_type()
                )))
            }
            Err(e) => return Err(ToolError::Internal(e.to_string())),
        },
        Some(Ok(Message::Close(Some(frame)))) if frame.code == CloseCode::Policy => {
            return Err(ToolError::Unauthorized)
        }
        Some(Ok(_)) | None => return Err(ToolError::NotConnected),
        Some(Err(e)) => {
            debug!("Handshake read failed: {}", e);
            return Err(ToolError::NotConnected);
        }
    };

    let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
    tokio::spawn(async move {
        while let Some(message) = outgoing_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if write.send(message).await.is_err() || closing {
                break;
            }
        }
        let _ = write.close().await;
    });

    Ok(OpenedTransport {
        outgoing,
        read,
        connection_id,
    })
}

async fn establish(inner: &Arc<Inner>, session: u64) -> Result<(), ToolError> {
    inner.set_state(ClientState::Connecting);

    let opened = match open_transport(&inner.config).await {
        Ok(opened) => opened,
        Err(e) => {
            let mut link = inner.lock_link();
            if inner.session.load(Ordering::SeqCst) == session {
                link.queued.clear();
                inner.set_state(ClientState::Disconnected);
            }
            return Err(e);
        }
    };

    let transport = {
        let mut link = inner.lock_link();
        if inner.session.load(Ordering::SeqCst) != session {
            let _ = opened.outgoing.send(Message::Close(None));
            return Err(ToolError::NotConnected);
        }

        let transport = inner.transport.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(subscriber_id) = &link.subscription {
            send_frame(&opened.outgoing, &Frame::subscribe(subscriber_id.clone()));
        }
        for frame in link.queued.drain(..) {
            send_frame(&opened.outgoing, &frame);
        }
        link.outgoing = Some(opened.outgoing);
        link.connection_id = Some(opened.connection_id.clone());
        inner.reconnect_attempts.store(0, Ordering::SeqCst);
        inner.set_state(ClientState::Connected);
        transport
    };

    let reader = tokio::spawn(read_loop(inner.clone(), opened.read, transport));
    {
        let mut link = inner.lock_link();
        if inner.transport.load(Ordering::SeqCst) == transport {
            link.reader = Some(reader);
        } else {
            reader.abort();
        }
    }

    info!(
        "Connected to {} as {}",
        inner.config.ws_url, opened.connection_id
    );
    Ok(())
}

async fn read_loop(inner: Arc<Inner>, mut read: SplitStream<WsStream>, transport: u64) {
    let mut rejected = false;
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => inner.handle_text(&text),
            Ok(Message::Ping(data)) => {
                let outgoing = inner.lock_link().outgoing.clone();
                if let Some(outgoing) = outgoing {
                    let _ = outgoing.send(Message::Pong(data));
                }
            }
            Ok(Message::Close(frame)) => {
                rejected = matches!(&frame, Some(f) if f.code == CloseCode::Policy);
                debug!("Transport closed by server: {:?}", frame);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Transport error: {}", e);
                break;
            }
        }
    }
    on_transport_closed(&inner, transport, rejected);
}

fn on_transport_closed(inner: &Arc<Inner>, transport: u64, rejected: bool) {
    {
        let mut link = inner.lock_link();
        if inner.transport.load(Ordering::SeqCst) != transport {
            // Superseded or closed on purpose.
            return;
        }
        link.outgoing = None;
        link.reader = None;
        link.connection_id = None;
        inner.set_state(ClientState::Disconnected);
    }

    if rejected {
        warn!("Credential rejected by server, not reconnecting");
        return;
    }

    // In-flight requests stay pending; they may still be answered after a
    // quick reconnect, or they time out on their own.
    warn!("Connection lost, scheduling reconnect");
    let session = inner.session.load(Ordering::SeqCst);
    tokio::spawn(reconnect_loop(inner.clone(), session));
}

fn reconnect_loop(inner: Arc<Inner>, session: u64) -> BoxFuture<'static, ()> {
    async move {
        let max_attempts = inner.config.max_reconnect_attempts;
        loop {
            let attempt = inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > max_attempts {
                warn!("Giving up after {} reconnect attempts", max_attempts);
                return;
            }

            tokio::time::sleep(inner.config.reconnect_delay).await;
            if inner.session.load(Ordering::SeqCst) != session {
                return;
            }

            info!("Reconnect attempt {}/{}", attempt, max_attempts);
            match establish(&inner, session).await {
                Ok(()) => return,
                Err(e) => warn!("Reconnect attempt {} failed: {}", attempt, e),
            }
        }
    }
    .boxed()
}

/// Handle to a client runtime. Clones share the same connection.
#[derive(Clone)]
pub struct ToolClient {
    inner: Arc<Inner>,
}

impl ToolClient {
    pub fn new(config: ClientConfig) -> Self {
        let fallback = HttpFallback::new(
            config.http_base_url.clone(),
            config.token.clone(),
            config.request_timeout,
        );
        let (state_tx, _) = watch::channel(ClientState::Disconnected);
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);

        Self {
            inner: Arc::new(Inner {
                config,
                fallback,
                pending: Mutex::new(HashMap::new()),
                link: Mutex::new(Link::default()),
                state_tx,
                notifications,
                session: AtomicU64::new(0),
                transport: AtomicU64::new(0),
                reconnect_attempts: AtomicU32::new(0),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ClientState {
        self.inner.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<ClientState> {
        self.inner.state_tx.subscribe()
    }

    /// Notification frames pushed by the server.
    pub fn notifications(&self) -> broadcast::Receiver<Frame> {
        self.inner.notifications.subscribe()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock_pending().len()
    }

    /// Id the server assigned to the current connection.
    pub fn connection_id(&self) -> Option<String> {
        self.inner.lock_link().connection_id.clone()
    }

    /// Opens the persistent connection. Also the way out of the terminal
    /// disconnected state once reconnect attempts are exhausted.
    pub async fn connect(&self) -> Result<(), ToolError> {
        if self.state() == ClientState::Connected {
            return Ok(());
        }
        let session = self.inner.session.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);
        establish(&self.inner, session).await
    }

    /// Closes the connection. In-flight requests are dropped unresolved and
    /// their callers see a timeout at their own deadline.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        inner.session.fetch_add(1, Ordering::SeqCst);

        let reader = {
            let mut link = inner.lock_link();
            inner.transport.fetch_add(1, Ordering::SeqCst);
            if let Some(outgoing) = link.outgoing.take() {
                let _ = outgoing.send(Message::Close(None));
            }
            link.queued.clear();
            link.subscription = None;
            link.connection_id = None;
            inner.set_state(ClientState::Disconnected);
            link.reader.take()
        };
        if let Some(reader) = reader {
            reader.abort();
        }

        let dropped = {
            let mut pending = inner.lock_pending();
            let count = pending.len();
            pending.clear();
            count
        };
        inner.reconnect_attempts.store(0, Ordering::SeqCst);

        if dropped > 0 {
            debug!("Disconnected with {} request(s) in flight", dropped);
        }
    }

    /// Invokes `tool` and waits for its result.
    pub async fn send_request(&self, tool: &str, params: Value) -> Reply {
        let correlation_id = new_correlation_id();
        let (tx, rx) = oneshot::channel();

        let not_sent = {
            let mut link = self.inner.lock_link();
            match self.inner.state() {
                ClientState::Disconnected => Some(params),
                ClientState::Connecting | ClientState::Connected => {
                    self.inner.lock_pending().insert(correlation_id.clone(), tx);
                    let frame = Frame::request(correlation_id.clone(), tool, params);
                    match &link.outgoing {
                        Some(outgoing) => send_frame(outgoing, &frame),
                        None => link.queued.push(frame),
                    }
                    None
                }
            }
        };

        if let Some(params) = not_sent {
            if self.inner.config.fallback_tools.contains(tool) {
                debug!("Not connected, invoking {} over HTTP", tool);
                return self.inner.fallback.invoke(tool, params).await;
            }
            return Err(ToolError::NotConnected);
        }

        let deadline = Instant::now() + self.inner.config.request_timeout;
        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                // Entry dropped by disconnect; the caller still waits out its deadline.
                tokio::time::sleep_until(deadline).await;
                Err(self.inner.timeout_error())
            }
            Err(_) => {
                self.inner.lock_pending().remove(&correlation_id);
                debug!("Request {} for {} timed out", correlation_id, tool);
                Err(self.inner.timeout_error())
            }
        }
    }

    /// Registers for broadcast notifications, optionally under an id used for
    /// targeted delivery.
    pub fn subscribe(&self, subscriber_id: Option<String>) -> Result<(), ToolError> {
        let mut link = self.inner.lock_link();
        match self.inner.state() {
            ClientState::Disconnected => Err(ToolError::NotConnected),
            ClientState::Connecting | ClientState::Connected => {
                if let Some(outgoing) = &link.outgoing {
                    send_frame(outgoing, &Frame::subscribe(subscriber_id.clone()));
                }
                link.subscription = Some(subscriber_id);
                Ok(())
            }
        }
    }

    /// Lists the server's tools over HTTP.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, ToolError> {
        self.inner.fallback.list_tools().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    /// Scripted server: frames received are forwarded to `incoming`, messages
    /// pushed on `outgoing` are written to the current connection.
    struct FakeServer {
        url: String,
        incoming: mpsc::UnboundedReceiver<Frame>,
        outgoing: mpsc::UnboundedSender<Message>,
    }

    impl FakeServer {
        async fn spawn() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("ws://{}/v1/ws", listener.local_addr().unwrap());
            let (incoming_tx, incoming) = mpsc::unbounded_channel();
            let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let Ok(ws) = accept_async(stream).await else {
                        continue;
                    };
                    let (mut sink, mut stream) = ws.split();
                    loop {
                        tokio::select! {
                            message = outgoing_rx.recv() => match message {
                                Some(message) => {
                                    let closing = matches!(message, Message::Close(_));
                                    if sink.send(message).await.is_err() || closing {
                                        break;
                                    }
                                }
                                None => return,
                            },
                            message = stream.next() => match message {
                                Some(Ok(Message::Text(text))) => {
                                    if let Ok(frame) = Frame::parse(&text) {
                                        let _ = incoming_tx.send(frame);
                                    }
                                }
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                Some(Ok(_)) => {}
                            },
                        }
                    }
                }
            });

            Self {
                url,
                incoming,
                outgoing,
            }
        }

        fn push(&self, frame: Frame) {
            self.outgoing
                .send(Message::text(frame.to_text().unwrap()))
                .unwrap();
        }

        async fn next_frame(&mut self) -> Frame {
            tokio::time::timeout(Duration::from_secs(5), self.incoming.recv())
                .await
                .expect("no frame received")
                .expect("server gone")
        }

        fn config(&self) -> ClientConfig {
            let mut config = ClientConfig::new(self.url.clone(), "http://127.0.0.1:9");
            config.request_timeout = Duration::from_secs(5);
            config.reconnect_delay = Duration::from_millis(20);
            config
        }
    }

    async fn connected_client(server: &FakeServer, config: ClientConfig) -> ToolClient {
        server.push(Frame::connected("conn-1", "test"));
        let client = ToolClient::new(config);
        client.connect().await.unwrap();
        client
    }

    fn request_id(frame: &Frame) -> String {
        match frame {
            Frame::Request { correlation_id, .. } => correlation_id.clone(),
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_records_connection_id() {
        let server = FakeServer::spawn().await;
        let client = connected_client(&server, server.config()).await;

        assert_eq!(client.state(), ClientState::Connected);
        assert_eq!(client.connection_id().as_deref(), Some("conn-1"));
    }

    #[tokio::test]
    async fn test_responses_resolve_only_their_request() {
        let mut server = FakeServer::spawn().await;
        let client = connected_client(&server, server.config()).await;

        let a = tokio::spawn({
            let client = client.clone();
            async move { client.send_request("tool_a", json!({})).await }
        });
        let first = server.next_frame().await;
        let b = tokio::spawn({
            let client = client.clone();
            async move { client.send_request("tool_b", json!({})).await }
        });
        let second = server.next_frame().await;

        let (id_a, id_b) = match &first {
            Frame::Request { method, .. } if method == "tool_a" => {
                (request_id(&first), request_id(&second))
            }
            _ => (request_id(&second), request_id(&first)),
        };

        server.push(Frame::response(id_a, json!({"from": "a"})));
        assert_eq!(a.await.unwrap().unwrap(), json!({"from": "a"}));
        assert_eq!(client.pending_count(), 1);
        assert!(!b.is_finished());

        server.push(Frame::error(Some(id_b), &ToolError::NotFound("tool_b".to_string())));
        assert_eq!(
            b.await.unwrap().unwrap_err(),
            ToolError::NotFound("tool_b".to_string())
        );
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_removes_entry_and_ignores_late_reply() {
        let mut server = FakeServer::spawn().await;
        let mut config = server.config();
        config.request_timeout = Duration::from_millis(100);
        let client = connected_client(&server, config).await;

        let result = client.send_request("slow", json!({})).await;
        assert_eq!(result.unwrap_err(), ToolError::Timeout(100));
        assert_eq!(client.pending_count(), 0);

        let late = server.next_frame().await;
        server.push(Frame::response(request_id(&late), json!("late")));

        let next = tokio::spawn({
            let client = client.clone();
            async move { client.send_request("fast", json!({})).await }
        });
        let frame = server.next_frame().await;
        server.push(Frame::response(request_id(&frame), json!("on time")));
        assert_eq!(next.await.unwrap().unwrap(), json!("on time"));
    }

    #[tokio::test]
    async fn test_requests_queue_while_connecting() {
        let mut server = FakeServer::spawn().await;
        let client = ToolClient::new(server.config());
        let mut states = client.state_changes();

        let connecting = tokio::spawn({
            let client = client.clone();
            async move { client.connect().await }
        });
        states
            .wait_for(|s| *s == ClientState::Connecting)
            .await
            .unwrap();

        let request = tokio::spawn({
            let client = client.clone();
            async move { client.send_request("queued", json!({"n": 1})).await }
        });
        while client.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        server.push(Frame::connected("conn-1", "test"));
        connecting.await.unwrap().unwrap();

        let frame = server.next_frame().await;
        server.push(Frame::response(request_id(&frame), json!("flushed")));
        assert_eq!(request.await.unwrap().unwrap(), json!("flushed"));
    }

    #[tokio::test]
    async fn test_policy_close_is_unauthorized() {
        let server = FakeServer::spawn().await;
        server
            .outgoing
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "Authentication required".into(),
            })))
            .unwrap();

        let client = ToolClient::new(server.config());
        assert_eq!(client.connect().await.unwrap_err(), ToolError::Unauthorized);
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[tokio::test]
    async fn test_notifications_and_subscribe() {
        let mut server = FakeServer::spawn().await;
        let client = connected_client(&server, server.config()).await;
        let mut notifications = client.notifications();

        client.subscribe(Some("pr-42".to_string())).unwrap();
        match server.next_frame().await {
            Frame::Subscribe { subscriber_id, .. } => {
                assert_eq!(subscriber_id.as_deref(), Some("pr-42"))
            }
            other => panic!("expected subscribe, got {:?}", other),
        }

        server.push(Frame::notification("review.ready", json!({"pr": 42})));
        match notifications.recv().await.unwrap() {
            Frame::Notification { method, params, .. } => {
                assert_eq!(method, "review.ready");
                assert_eq!(params, json!({"pr": 42}));
            }
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_clears_pending() {
        let mut server = FakeServer::spawn().await;
        let mut config = server.config();
        config.request_timeout = Duration::from_millis(200);
        let client = connected_client(&server, config).await;

        let started = Instant::now();
        let request = tokio::spawn({
            let client = client.clone();
            async move { client.send_request("abandoned", json!({})).await }
        });
        server.next_frame().await;

        client.disconnect();
        client.disconnect();
        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(client.pending_count(), 0);

        assert_eq!(request.await.unwrap().unwrap_err(), ToolError::Timeout(200));
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_not_connected_without_fallback() {
        let client = ToolClient::new(ClientConfig::new("ws://127.0.0.1:9/v1/ws", "http://127.0.0.1:9"));

        let err = client.send_request("get_pr_files", json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::NotConnected);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_fallback_tools_use_http() {
        use axum::extract::Path;
        use axum::routing::post;
        use axum::{Json, Router};

        let app = Router::new().route(
            "/v1/tools/{name}",
            post(|Path(name): Path<String>, Json(body): Json<Value>| async move {
                Json(json!({
                    "correlationId": body["correlationId"],
                    "result": {"tool": name, "params": body["params"]}
                }))
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = ClientConfig::new("ws://127.0.0.1:9/v1/ws", base_url)
            .with_fallback_tools(["get_pr_files"]);
        let client = ToolClient::new(config);

        let result = client
            .send_request("get_pr_files", json!({"pullNumber": 1}))
            .await
            .unwrap();
        assert_eq!(result["tool"], "get_pr_files");
        assert_eq!(result["params"]["pullNumber"], 1);

        let err = client.send_request("post_pr_comment", json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::NotConnected);
    }

    #[tokio::test]
    async fn test_reconnect_attempts_are_bounded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/v1/ws", listener.local_addr().unwrap());
        let accepts = Arc::new(AtomicUsize::new(0));

        // First connection handshakes and then drops; later ones are refused
        // before the handshake.
        let counter = accepts.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    let mut ws = accept_async(stream).await.unwrap();
                    let connected = Frame::connected("conn-1", "test").to_text().unwrap();
                    ws.send(Message::text(connected)).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        });

        let mut config = ClientConfig::new(url, "http://127.0.0.1:9");
        config.reconnect_delay = Duration::from_millis(20);
        config.max_reconnect_attempts = 2;
        let client = ToolClient::new(config);
        client.connect().await.unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(accepts.load(Ordering::SeqCst), 3);
        assert_eq!(client.state(), ClientState::Disconnected);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(accepts.load(Ordering::SeqCst), 3);
    }
}
