//! Per-connection lifecycle: open, hibernating, closed.
//!
//! The host runtime owns the raw socket and may evict the process while a
//! connection idles.  Everything the manager needs to rebuild a connection
//! after eviction is stored in the attachment (id, subscriptions, opaque
//! data); in-flight request state is never stored because a hibernated
//! connection has no pending handlers.
//!
//! Timer rules:
//! - only inbound activity resets the idle timer (sends do not);
//! - the idle timer firing moves `open -> hibernating` and serializes the
//!   attachment;
//! - the max-hibernation timer firing moves `hibernating -> closed`;
//! - any inbound message while hibernating wakes the connection and drains
//!   the queued events in FIFO order before anything else is sent.

use crate::config::ServerConfig;
use relay_protocol::{encode_response, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Close code sent when the max-hibernation window is exceeded.
pub const CLOSE_HIBERNATION_EXPIRED: u16 = 1001;

// ---------------------------------------------------------------------------
// Host socket seam
// ---------------------------------------------------------------------------

/// The peer is gone; the frame was not delivered.
#[derive(Debug)]
pub struct SocketClosed;

impl std::fmt::Display for SocketClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socket closed")
    }
}

impl std::error::Error for SocketClosed {}

/// Capabilities the hosting runtime exposes on a socket.
///
/// `serialize_attachment` stores bytes that survive process eviction;
/// `deserialize_attachment` returns them on wake.
pub trait HostSocket: Send + Sync {
    fn send(&self, text: String) -> Result<(), SocketClosed>;
    fn close(&self, code: u16, reason: &str);
    fn serialize_attachment(&self, bytes: Vec<u8>);
    fn deserialize_attachment(&self) -> Option<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// The state persisted across hibernation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub subscriptions: Vec<String>,
    pub data: HashMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Open,
    Hibernating,
    Closed,
}

/// Externalized connection state, as seen by broadcast filters.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: String,
    pub status: ConnectionStatus,
    pub subscriptions: Vec<String>,
    pub data: HashMap<String, Value>,
    /// Time since the connection (or its current incarnation) was opened.
    pub connected_for: Duration,
    /// Time since the last inbound message.
    pub idle_for: Duration,
    /// Time spent in the current hibernation, when hibernating.
    pub hibernating_for: Option<Duration>,
}

struct ConnectionState {
    id: String,
    socket: Arc<dyn HostSocket>,
    status: ConnectionStatus,
    connected_at: Instant,
    hibernated_at: Option<Instant>,
    last_message_at: Instant,
    subscriptions: HashSet<String>,
    data: HashMap<String, Value>,
    /// Events that arrived while hibernating, oldest first.
    queue: VecDeque<String>,
    idle_timer: Option<JoinHandle<()>>,
    max_hibernation_timer: Option<JoinHandle<()>>,
    /// Bumped on every timer (re)arm and wake; a timer that fires with a
    /// stale generation is a no-op.
    generation: u64,
}

impl ConnectionState {
    fn new(id: String, socket: Arc<dyn HostSocket>) -> Self {
        let now = Instant::now();
        ConnectionState {
            id,
            socket,
            status: ConnectionStatus::Open,
            connected_at: now,
            hibernated_at: None,
            last_message_at: now,
            subscriptions: HashSet::new(),
            data: HashMap::new(),
            queue: VecDeque::new(),
            idle_timer: None,
            max_hibernation_timer: None,
            generation: 0,
        }
    }

    fn info(&self) -> ConnectionInfo {
        let mut subscriptions: Vec<String> = self.subscriptions.iter().cloned().collect();
        subscriptions.sort();
        ConnectionInfo {
            id: self.id.clone(),
            status: self.status,
            subscriptions,
            data: self.data.clone(),
            connected_for: self.connected_at.elapsed(),
            idle_for: self.last_message_at.elapsed(),
            hibernating_for: self.hibernated_at.map(|at| at.elapsed()),
        }
    }

    fn attachment(&self) -> Attachment {
        let mut subscriptions: Vec<String> = self.subscriptions.iter().cloned().collect();
        subscriptions.sort();
        Attachment {
            id: self.id.clone(),
            subscriptions,
            data: self.data.clone(),
        }
    }

    fn cancel_timers(&mut self) {
        if let Some(handle) = self.idle_timer.take() {
            handle.abort();
        }
        if let Some(handle) = self.max_hibernation_timer.take() {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

type ConnectionHandle = Arc<Mutex<ConnectionState>>;

/// Registry of live and hibernating connections.
///
/// Per-connection mutable state is guarded by its own lock; timer tasks
/// acquire the same lock before mutating, and a generation counter makes a
/// stale timer firing after an inbound reset harmless.
pub struct ConnectionManager {
    config: Arc<ServerConfig>,
    connections: RwLock<HashMap<String, ConnectionHandle>>,
}

impl ConnectionManager {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        ConnectionManager {
            config,
            connections: RwLock::new(HashMap::new()),
        }
    }

    async fn get(&self, id: &str) -> Option<ConnectionHandle> {
        self.connections.read().await.get(id).cloned()
    }

    /// Register a freshly upgraded socket.
    ///
    /// If the socket carries an attachment this is a wake after eviction:
    /// the record is rebuilt from the attachment and any queued events are
    /// replayed in order.  The manager must tolerate an in-memory record
    /// already existing for the attachment id.
    pub async fn adopt(self: &Arc<Self>, socket: Arc<dyn HostSocket>) -> String {
        if let Some(bytes) = socket.deserialize_attachment() {
            match serde_json::from_slice::<Attachment>(&bytes) {
                Ok(attachment) => return self.wake_with_attachment(socket, attachment).await,
                Err(e) => {
                    warn!(error = %e, "discarding unreadable attachment");
                }
            }
        }
        let id = Uuid::new_v4().to_string();
        let state = ConnectionState::new(id.clone(), socket);
        self.connections
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(state)));
        self.arm_idle_timer(&id).await;
        info!(connection_id = %id, "connection opened");
        id
    }

    async fn wake_with_attachment(
        self: &Arc<Self>,
        socket: Arc<dyn HostSocket>,
        attachment: Attachment,
    ) -> String {
        let id = attachment.id.clone();
        let conn = {
            let mut map = self.connections.write().await;
            map.entry(id.clone())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(ConnectionState::new(id.clone(), socket.clone())))
                })
                .clone()
        };
        let replay = {
            let mut state = conn.lock().await;
            state.socket = socket.clone();
            state.status = ConnectionStatus::Open;
            state.hibernated_at = None;
            state.last_message_at = Instant::now();
            state.subscriptions = attachment.subscriptions.iter().cloned().collect();
            state.data = attachment.data;
            state.generation += 1;
            state.cancel_timers();
            std::mem::take(&mut state.queue)
        };
        let replayed = replay.len();
        for event in replay {
            let _ = socket.send(event);
        }
        self.arm_idle_timer(&id).await;
        info!(connection_id = %id, replayed, "connection woken from attachment");
        id
    }

    /// Record inbound activity: reset the idle timer and, if hibernating,
    /// wake the connection and drain its queue first.
    pub async fn on_inbound(self: &Arc<Self>, id: &str) -> bool {
        let Some(conn) = self.get(id).await else {
            return false;
        };
        let (replay, socket) = {
            let mut state = conn.lock().await;
            state.last_message_at = Instant::now();
            if state.status == ConnectionStatus::Hibernating {
                state.status = ConnectionStatus::Open;
                state.hibernated_at = None;
                state.generation += 1;
                state.cancel_timers();
                debug!(connection_id = %id, queued = state.queue.len(), "waking connection");
                (std::mem::take(&mut state.queue), state.socket.clone())
            } else {
                (VecDeque::new(), state.socket.clone())
            }
        };
        for event in replay {
            let _ = socket.send(event);
        }
        self.arm_idle_timer(id).await;
        true
    }

    /// Deliver a frame to one connection.
    ///
    /// Open connections get it on the socket; hibernating connections get
    /// it queued (bounded); closed or unknown connections drop it.
    pub async fn send(&self, id: &str, text: String) -> bool {
        let Some(conn) = self.get(id).await else {
            return false;
        };
        let mut state = conn.lock().await;
        match state.status {
            ConnectionStatus::Open => state.socket.send(text).is_ok(),
            ConnectionStatus::Hibernating => {
                enqueue_bounded(&mut state.queue, text, self.config.event_queue_limit);
                true
            }
            ConnectionStatus::Closed => false,
        }
    }

    /// Fan a channel event out to every subscribed connection.
    ///
    /// Returns the number of connections that received (or queued) the
    /// event.  `filter` sees each connection's externalized state.
    pub async fn broadcast(
        &self,
        channel: &str,
        data: Value,
        filter: Option<&(dyn Fn(&ConnectionInfo) -> bool + Send + Sync)>,
    ) -> usize {
        let envelope = Response::broadcast(channel, data);
        let text = match encode_response(&envelope) {
            Ok(text) => text,
            Err(e) => {
                warn!(channel, error = %e, "failed to encode broadcast envelope");
                return 0;
            }
        };
        let handles: Vec<ConnectionHandle> =
            self.connections.read().await.values().cloned().collect();
        let mut delivered = 0;
        for conn in handles {
            let mut state = conn.lock().await;
            if !state.subscriptions.contains(channel) {
                continue;
            }
            if let Some(filter) = filter {
                if !filter(&state.info()) {
                    continue;
                }
            }
            match state.status {
                ConnectionStatus::Open => {
                    if state.socket.send(text.clone()).is_ok() {
                        delivered += 1;
                    }
                }
                ConnectionStatus::Hibernating => {
                    enqueue_bounded(&mut state.queue, text.clone(), self.config.event_queue_limit);
                    delivered += 1;
                }
                ConnectionStatus::Closed => {}
            }
        }
        delivered
    }

    /// Close a connection and drop it from the map.
    pub async fn close(&self, id: &str, code: u16, reason: &str) {
        let Some(conn) = self.connections.write().await.remove(id) else {
            return;
        };
        let mut state = conn.lock().await;
        state.cancel_timers();
        state.generation += 1;
        if state.status != ConnectionStatus::Closed {
            state.status = ConnectionStatus::Closed;
            state.socket.close(code, reason);
            info!(connection_id = %id, code, reason, "connection closed");
        }
    }

    pub async fn subscribe(&self, id: &str, channel: &str) -> bool {
        let Some(conn) = self.get(id).await else {
            return false;
        };
        conn.lock().await.subscriptions.insert(channel.to_owned())
    }

    pub async fn unsubscribe(&self, id: &str, channel: &str) -> bool {
        let Some(conn) = self.get(id).await else {
            return false;
        };
        conn.lock().await.subscriptions.remove(channel)
    }

    /// Set one key in the connection's opaque data map.
    pub async fn set_data(&self, id: &str, key: impl Into<String>, value: Value) -> bool {
        let Some(conn) = self.get(id).await else {
            return false;
        };
        conn.lock().await.data.insert(key.into(), value);
        true
    }

    pub async fn info(&self, id: &str) -> Option<ConnectionInfo> {
        let conn = self.get(id).await?;
        let state = conn.lock().await;
        Some(state.info())
    }

    pub async fn status(&self, id: &str) -> Option<ConnectionStatus> {
        let conn = self.get(id).await?;
        let status = conn.lock().await.status;
        Some(status)
    }

    pub async fn connection_ids(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    async fn arm_idle_timer(self: &Arc<Self>, id: &str) {
        let Some(conn) = self.get(id).await else {
            return;
        };
        let mut state = conn.lock().await;
        state.generation += 1;
        let generation = state.generation;
        if let Some(handle) = state.idle_timer.take() {
            handle.abort();
        }
        let manager = Arc::clone(self);
        let id = id.to_owned();
        let delay = Duration::from_millis(self.config.idle_timeout_ms);
        state.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.on_idle_expired(&id, generation).await;
        }));
    }

    async fn on_idle_expired(self: &Arc<Self>, id: &str, generation: u64) {
        let Some(conn) = self.get(id).await else {
            return;
        };
        let mut state = conn.lock().await;
        if state.generation != generation || state.status != ConnectionStatus::Open {
            return;
        }
        state.status = ConnectionStatus::Hibernating;
        state.hibernated_at = Some(Instant::now());
        match serde_json::to_vec(&state.attachment()) {
            Ok(bytes) => state.socket.serialize_attachment(bytes),
            Err(e) => warn!(connection_id = %id, error = %e, "failed to serialize attachment"),
        }
        let manager = Arc::clone(self);
        let id_owned = id.to_owned();
        let delay = Duration::from_millis(self.config.max_hibernation_ms);
        state.max_hibernation_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.on_hibernation_expired(&id_owned, generation).await;
        }));
        debug!(connection_id = %id, "connection hibernating");
    }

    async fn on_hibernation_expired(self: &Arc<Self>, id: &str, generation: u64) {
        let expired = {
            let Some(conn) = self.get(id).await else {
                return;
            };
            let state = conn.lock().await;
            state.generation == generation && state.status == ConnectionStatus::Hibernating
        };
        if expired {
            self.close(id, CLOSE_HIBERNATION_EXPIRED, "hibernation window exceeded")
                .await;
        }
    }
}

fn enqueue_bounded(queue: &mut VecDeque<String>, text: String, limit: usize) {
    if queue.len() >= limit {
        queue.pop_front();
        debug!("event queue full, dropping oldest event");
    }
    queue.push_back(text);
}
