// relay-client: coordinator for the bidirectional RPC connection.
//
// Correlates requests with responses by id across an unreliable
// connection, reconnects with capped exponential backoff, queues traffic
// while reconnecting, fans out subscription events, and falls back to
// request/response HTTP when the bidirectional connect fails.

pub mod backoff;
pub mod batch;
pub mod config;
pub mod endpoint;
mod http;
pub mod error;

pub use batch::BatchBuilder;
pub use config::ClientConfig;
pub use endpoint::Endpoints;
pub use error::ClientError;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use relay_protocol::{
    batch_response_from_value, encode_batch_request, encode_request, error_codes, BatchRequest,
    BatchResponse, Meta, Request, RpcError,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// States and events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    ReconnectStarted,
    ReconnectAttempt { attempt: u32 },
    Reconnected,
    ReconnectFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransportMode {
    WebSocket,
    Http,
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

enum WsOutbound {
    Text(String),
    Pong(tokio_tungstenite::tungstenite::Bytes),
    Close,
}

struct PendingEntry {
    tx: oneshot::Sender<Result<Value, ClientError>>,
    timeout: JoinHandle<()>,
}

struct Subscription {
    id: u64,
    handler: Arc<dyn Fn(Value) + Send + Sync>,
}

/// Returned by [`RpcClient::subscribe`]; identifies one handler on one
/// channel for later removal.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    channel: String,
    id: u64,
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// ClientInner
// ---------------------------------------------------------------------------

struct ClientInner {
    config: ClientConfig,
    endpoints: Endpoints,
    http: reqwest::Client,
    state: Mutex<ConnectionState>,
    transport: Mutex<TransportMode>,
    writer: Mutex<Option<mpsc::UnboundedSender<WsOutbound>>>,
    pending: Mutex<HashMap<String, PendingEntry>>,
    queue: Mutex<VecDeque<String>>,
    subscriptions: Mutex<HashMap<String, Vec<Subscription>>>,
    listeners: Mutex<Vec<Arc<dyn Fn(ConnectionState) + Send + Sync>>>,
    events: broadcast::Sender<ClientEvent>,
    id_counter: AtomicU64,
    subscription_counter: AtomicU64,
    intentional_close: AtomicBool,
}

impl ClientInner {
    fn new(endpoints: Endpoints, config: ClientConfig, http: reqwest::Client) -> Self {
        let (events, _) = broadcast::channel(64);
        ClientInner {
            config,
            endpoints,
            http,
            state: Mutex::new(ConnectionState::Disconnected),
            transport: Mutex::new(TransportMode::WebSocket),
            writer: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            subscriptions: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            events,
            id_counter: AtomicU64::new(0),
            subscription_counter: AtomicU64::new(0),
            intentional_close: AtomicBool::new(false),
        }
    }

    /// Locally unique id: wall-clock millis plus a monotonic counter.
    /// Ids are not globally unique and must not be treated as such.
    fn next_id(&self) -> String {
        let counter = self.id_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", Utc::now().timestamp_millis(), counter)
    }

    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = {
            let mut state = lock(&self.state);
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        };
        if changed {
            let listeners = lock(&self.listeners).clone();
            for listener in listeners {
                listener(next);
            }
            self.emit(ClientEvent::StateChanged(next));
        }
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    // -----------------------------------------------------------------------
    // Pending requests
    // -----------------------------------------------------------------------

    fn register_pending(
        self: &Arc<Self>,
        id: &str,
        tx: oneshot::Sender<Result<Value, ClientError>>,
    ) {
        let timeout_ms = self.config.request_timeout_ms;
        let inner = Arc::clone(self);
        let id_owned = id.to_owned();
        let timeout = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            inner.resolve_pending(&id_owned, Err(ClientError::Timeout(timeout_ms)));
        });
        lock(&self.pending).insert(id.to_owned(), PendingEntry { tx, timeout });
    }

    /// Resolve (or reject) exactly one pending entry; unknown ids are
    /// dropped silently (late responses after a client-side timeout).
    fn resolve_pending(&self, id: &str, outcome: Result<Value, ClientError>) {
        let entry = lock(&self.pending).remove(id);
        if let Some(entry) = entry {
            entry.timeout.abort();
            let _ = entry.tx.send(outcome);
        }
    }

    fn reject_all(&self, error: &ClientError) {
        let entries: Vec<PendingEntry> = lock(&self.pending).drain().map(|(_, e)| e).collect();
        for entry in entries {
            entry.timeout.abort();
            let _ = entry.tx.send(Err(error.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // Send paths
    // -----------------------------------------------------------------------

    /// Write now when connected, enqueue while (re)connecting, fail when
    /// the client is gone.
    fn send_or_queue(&self, serialized: String) -> Result<(), ClientError> {
        match self.state() {
            ConnectionState::Connected => {
                let writer = lock(&self.writer).clone();
                match writer {
                    Some(tx) if tx.send(WsOutbound::Text(serialized.clone())).is_ok() => Ok(()),
                    _ => {
                        // Socket not writable yet; keep for the flush.
                        lock(&self.queue).push_back(serialized);
                        Ok(())
                    }
                }
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                lock(&self.queue).push_back(serialized);
                Ok(())
            }
            ConnectionState::Disconnected => Err(ClientError::ConnectionClosed),
            ConnectionState::Closed => Err(ClientError::Closed),
        }
    }

    /// Flush queued frames in order onto the current writer.
    fn flush_queue(&self) {
        let writer = lock(&self.writer).clone();
        let Some(tx) = writer else {
            return;
        };
        let queued: Vec<String> = lock(&self.queue).drain(..).collect();
        let flushed = queued.len();
        for frame in queued {
            if tx.send(WsOutbound::Text(frame)).is_err() {
                break;
            }
        }
        if flushed > 0 {
            debug!(flushed, "flushed queued frames");
        }
    }

    // -----------------------------------------------------------------------
    // Inbound routing
    // -----------------------------------------------------------------------

    /// Route one inbound text frame.
    ///
    /// Unparseable frames are dropped silently.  An empty-id envelope is a
    /// subscription signal and never matches a pending request, even one
    /// whose id happens to be empty.
    fn route_frame(&self, text: &str) {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            debug!("dropping unparseable frame");
            return;
        };
        let Value::Object(ref obj) = value else {
            return;
        };
        let Some(id) = obj.get("id").and_then(Value::as_str) else {
            return;
        };
        if id.is_empty() {
            if let Some(result) = obj.get("result") {
                if let (Some(channel), Some(data)) = (
                    result.get("channel").and_then(Value::as_str),
                    result.get("data"),
                ) {
                    self.dispatch_event(channel, data.clone());
                }
            }
            return;
        }
        let id = id.to_owned();
        self.resolve_pending(&id, Ok(value));
    }

    fn dispatch_event(&self, channel: &str, data: Value) {
        let handlers: Vec<Arc<dyn Fn(Value) + Send + Sync>> = lock(&self.subscriptions)
            .get(channel)
            .map(|subs| subs.iter().map(|s| s.handler.clone()).collect())
            .unwrap_or_default();
        for handler in handlers {
            handler(data.clone());
        }
    }

    fn channels(&self) -> Vec<String> {
        lock(&self.subscriptions).keys().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Connection loss
    // -----------------------------------------------------------------------

    fn on_connection_lost(self: &Arc<Self>) {
        *lock(&self.writer) = None;
        if self.intentional_close.load(Ordering::SeqCst) {
            return;
        }
        if self.config.auto_reconnect {
            info!("connection lost, reconnecting");
            self.set_state(ConnectionState::Reconnecting);
            self.emit(ClientEvent::ReconnectStarted);
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                reconnect_loop(inner).await;
            });
        } else {
            self.set_state(ConnectionState::Disconnected);
            self.reject_all(&ClientError::ConnectionClosed);
        }
    }
}

// ---------------------------------------------------------------------------
// Socket tasks
// ---------------------------------------------------------------------------

async fn open_websocket(inner: &Arc<ClientInner>) -> Result<(), ClientError> {
    let connect = tokio_tungstenite::connect_async(inner.endpoints.ws_url.as_str());
    let timeout = Duration::from_millis(inner.config.connection_timeout_ms);
    let (ws, _response) = tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| ClientError::Timeout(inner.config.connection_timeout_ms))?
        .map_err(|e| ClientError::Connect(e.to_string()))?;

    let (sink, stream) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(sink, rx));
    tokio::spawn(read_loop(Arc::clone(inner), stream));
    *lock(&inner.writer) = Some(tx);
    inner.set_state(ConnectionState::Connected);
    inner.flush_queue();
    Ok(())
}

async fn write_loop(
    mut sink: futures_util::stream::SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<WsOutbound>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            WsOutbound::Text(text) => {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            WsOutbound::Pong(data) => {
                if sink.send(Message::Pong(data)).await.is_err() {
                    break;
                }
            }
            WsOutbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

async fn read_loop(inner: Arc<ClientInner>, mut stream: futures_util::stream::SplitStream<WsStream>) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => inner.route_frame(&text),
            Ok(Message::Binary(_)) => {
                // Binary frames carry no envelope; ignore.
            }
            Ok(Message::Ping(data)) => {
                let writer = lock(&inner.writer).clone();
                if let Some(tx) = writer {
                    let _ = tx.send(WsOutbound::Pong(data));
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    inner.on_connection_lost();
}

/// Retry the connection on the backoff curve; on success flush the queue
/// and re-establish channel subscriptions, on exhaustion reject everything
/// outstanding.
async fn reconnect_loop(inner: Arc<ClientInner>) {
    for attempt in 1..=inner.config.max_reconnect_attempts {
        tokio::time::sleep(backoff::reconnect_delay(&inner.config, attempt)).await;
        if inner.intentional_close.load(Ordering::SeqCst) {
            return;
        }
        inner.emit(ClientEvent::ReconnectAttempt { attempt });
        match open_websocket(&inner).await {
            Ok(()) => {
                info!(attempt, "reconnected");
                resubscribe_channels(&inner);
                inner.emit(ClientEvent::Reconnected);
                return;
            }
            Err(e) => {
                warn!(attempt, error = %e, "reconnect attempt failed");
            }
        }
    }
    inner.emit(ClientEvent::ReconnectFailed);
    inner.set_state(ConnectionState::Disconnected);
    inner.reject_all(&ClientError::ConnectionClosed);
}

/// The new connection knows nothing of the old one's channel set; replay
/// the subscriptions fire-and-forget (replies have fresh unknown ids and
/// fall through the silent-drop path).
fn resubscribe_channels(inner: &Arc<ClientInner>) {
    let root = inner.config.root_path.clone();
    for channel in inner.channels() {
        let request = Request::new(inner.next_id(), format!("{root}.subscribe"))
            .with_params(json!({ "channel": channel }));
        if let Ok(text) = encode_request(&request) {
            let _ = inner.send_or_queue(text);
        }
    }
}

// ---------------------------------------------------------------------------
// RpcClient
// ---------------------------------------------------------------------------

/// The client coordinator.
///
/// Cheap to clone; clones share the connection, pending map and
/// subscription registry.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    /// Connect to an endpoint given as `http(s)://…` or `ws(s)://…`.
    ///
    /// The bidirectional transport is attempted first; when it fails and
    /// fallback is enabled the client comes up on request/response HTTP.
    pub async fn connect(url: &str, config: ClientConfig) -> Result<RpcClient, ClientError> {
        let endpoints = Endpoints::normalize(url, &config.root_path)?;
        Self::connect_endpoints(endpoints, config).await
    }

    /// Connect with explicit per-transport URLs (split deployments).
    pub async fn connect_with_endpoints(
        ws_url: &str,
        http_url: &str,
        config: ClientConfig,
    ) -> Result<RpcClient, ClientError> {
        let endpoints = Endpoints::explicit(ws_url, http_url)?;
        Self::connect_endpoints(endpoints, config).await
    }

    async fn connect_endpoints(
        endpoints: Endpoints,
        config: ClientConfig,
    ) -> Result<RpcClient, ClientError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        let inner = Arc::new(ClientInner::new(endpoints, config, http));
        inner.set_state(ConnectionState::Connecting);
        match open_websocket(&inner).await {
            Ok(()) => Ok(RpcClient { inner }),
            Err(e) if inner.config.fallback_to_http => {
                info!(error = %e, "bidirectional connect failed, using request/response transport");
                *lock(&inner.transport) = TransportMode::Http;
                inner.set_state(ConnectionState::Connected);
                Ok(RpcClient { inner })
            }
            Err(e) => {
                inner.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Subscribe to connection lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Register a state-change listener callback.
    pub fn on_state_change(&self, listener: impl Fn(ConnectionState) + Send + Sync + 'static) {
        lock(&self.inner.listeners).push(Arc::new(listener));
    }

    /// Invoke one method and await its result.
    pub async fn call(
        &self,
        method: &str,
        params: impl Into<Option<Value>>,
    ) -> Result<Value, ClientError> {
        let id = self.inner.next_id();
        let mut request = Request::new(id.clone(), method);
        request.params = params.into();
        request.meta = Some(Meta {
            timestamp: Some(Utc::now().timestamp_millis()),
            ..Meta::default()
        });
        let serialized = encode_request(&request)?;
        let envelope = self.exchange(&id, serialized).await?;
        unwrap_single(&envelope)
    }

    /// Issue a prepared batch request.
    pub async fn call_batch(&self, batch: BatchRequest) -> Result<BatchResponse, ClientError> {
        let serialized = encode_batch_request(&batch)?;
        let envelope = self.exchange(&batch.id, serialized).await?;
        let Value::Object(obj) = envelope else {
            return Err(ClientError::Protocol(
                "batch reply must be an object".to_owned(),
            ));
        };
        batch_response_from_value(obj).map_err(ClientError::from)
    }

    /// Start assembling a batch.
    pub fn batch(&self) -> BatchBuilder {
        BatchBuilder::new()
    }

    pub(crate) fn id_allocator(&self) -> impl FnMut() -> String + '_ {
        move || self.inner.next_id()
    }

    /// Send one serialized envelope and await the reply envelope.
    async fn exchange(&self, id: &str, serialized: String) -> Result<Value, ClientError> {
        if *lock(&self.inner.transport) == TransportMode::Http {
            return http::post_envelope(
                &self.inner.http,
                self.inner.endpoints.http_url.as_str(),
                &self.inner.config,
                serialized,
            )
            .await;
        }
        let (tx, rx) = oneshot::channel();
        self.inner.register_pending(id, tx);
        if let Err(e) = self.inner.send_or_queue(serialized) {
            self.inner.resolve_pending(id, Err(e.clone()));
            return Err(e);
        }
        rx.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    /// Attach a handler to a broadcast channel.  The first handler on a
    /// channel issues the server-side subscription.
    pub async fn subscribe(
        &self,
        channel: &str,
        handler: impl Fn(Value) + Send + Sync + 'static,
    ) -> Result<SubscriptionHandle, ClientError> {
        let id = self
            .inner
            .subscription_counter
            .fetch_add(1, Ordering::Relaxed);
        let first = {
            let mut subs = lock(&self.inner.subscriptions);
            let list = subs.entry(channel.to_owned()).or_default();
            list.push(Subscription {
                id,
                handler: Arc::new(handler),
            });
            list.len() == 1
        };
        if first {
            let root = self.inner.config.root_path.clone();
            self.call(
                &format!("{root}.subscribe"),
                json!({ "channel": channel }),
            )
            .await?;
        }
        Ok(SubscriptionHandle {
            channel: channel.to_owned(),
            id,
        })
    }

    /// Remove one handler; removing the last frees the channel and tells
    /// the server.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), ClientError> {
        let emptied = {
            let mut subs = lock(&self.inner.subscriptions);
            let Some(list) = subs.get_mut(&handle.channel) else {
                return Ok(());
            };
            list.retain(|s| s.id != handle.id);
            if list.is_empty() {
                subs.remove(&handle.channel);
                true
            } else {
                false
            }
        };
        if emptied {
            let root = self.inner.config.root_path.clone();
            self.call(
                &format!("{root}.unsubscribe"),
                json!({ "channel": handle.channel }),
            )
            .await?;
        }
        Ok(())
    }

    /// Close deliberately: pending requests reject with [`ClientError::Closed`]
    /// and no reconnect is attempted.
    pub async fn close(&self) {
        self.inner.intentional_close.store(true, Ordering::SeqCst);
        let writer = lock(&self.inner.writer).take();
        if let Some(tx) = writer {
            let _ = tx.send(WsOutbound::Close);
        }
        self.inner.set_state(ConnectionState::Closed);
        self.inner.reject_all(&ClientError::Closed);
    }
}

fn unwrap_single(envelope: &Value) -> Result<Value, ClientError> {
    if let Some(error) = envelope.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or(error_codes::INTERNAL_ERROR);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_owned();
        return Err(ClientError::Rpc(RpcError {
            code,
            message,
            data: error.get("data").cloned(),
        }));
    }
    // A reply with neither result nor error is a void return.
    Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
}
