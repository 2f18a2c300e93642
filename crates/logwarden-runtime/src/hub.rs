use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::metrics::IngestMetrics;

/// Connection cap; past it the oldest-connected client is terminated.
pub const MAX_CLIENTS: usize = 500;

/// Subscription channels the hub fans out on.
pub const CHANNELS: [&str; 4] = ["logs", "alerts", "metrics", "sessions"];

/// Per-client outgoing buffer bound; the slowest events are dropped past it.
const CLIENT_BUFFER_BYTES: usize = 1024 * 1024;

struct ClientState {
    authenticated: bool,
    username: Option<String>,
    subscriptions: HashSet<String>,
    outgoing: VecDeque<String>,
    outgoing_bytes: usize,
    /// Set once per lag episode so only one `stream_lag` notice is queued
    lagging: bool,
    /// Set by the hub to force the connection closed (cap eviction,
    /// server shutdown)
    kicked: bool,
    connected_seq: u64,
}

/// Handle held by one WebSocket task.
pub struct ClientHandle {
    pub id: u64,
    state: Arc<Mutex<ClientState>>,
    pub notify: Arc<Notify>,
}

impl ClientHandle {
    pub fn pop_outgoing(&self) -> Option<String> {
        let mut state = self.state.lock().unwrap();
        let frame = state.outgoing.pop_front()?;
        state.outgoing_bytes -= frame.len();
        Some(frame)
    }

    pub fn is_kicked(&self) -> bool {
        self.state.lock().unwrap().kicked
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.lock().unwrap().authenticated
    }

    pub fn username(&self) -> Option<String> {
        self.state.lock().unwrap().username.clone()
    }
}

/// WebSocket fan-out hub.
///
/// Events enter on the post-commit path only; a client receives a channel's
/// events exactly when that channel is in its subscription set. Slow
/// clients lose their oldest queued events rather than their connection.
pub struct StreamHub {
    clients: Mutex<HashMap<u64, (Arc<Mutex<ClientState>>, Arc<Notify>)>>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
    metrics: Arc<IngestMetrics>,
}

impl StreamHub {
    pub fn new(metrics: Arc<IngestMetrics>) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(0),
            metrics,
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Register a connection, evicting the oldest-connected client when the
    /// cap is hit.
    pub fn register(&self) -> ClientHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(Mutex::new(ClientState {
            authenticated: false,
            username: None,
            subscriptions: HashSet::new(),
            outgoing: VecDeque::new(),
            outgoing_bytes: 0,
            lagging: false,
            kicked: false,
            connected_seq: seq,
        }));
        let notify = Arc::new(Notify::new());

        let mut clients = self.clients.lock().unwrap();
        if clients.len() >= MAX_CLIENTS {
            let oldest = clients
                .iter()
                .min_by_key(|(_, (state, _))| state.lock().unwrap().connected_seq)
                .map(|(id, _)| *id);
            if let Some(oldest) = oldest {
                if let Some((state, notify)) = clients.remove(&oldest) {
                    state.lock().unwrap().kicked = true;
                    notify.notify_one();
                    self.metrics.stream_evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        clients.insert(id, (state.clone(), notify.clone()));
        self.metrics
            .stream_clients
            .store(clients.len() as i64, Ordering::Relaxed);

        ClientHandle { id, state, notify }
    }

    pub fn unregister(&self, id: u64) {
        let mut clients = self.clients.lock().unwrap();
        clients.remove(&id);
        self.metrics
            .stream_clients
            .store(clients.len() as i64, Ordering::Relaxed);
    }

    pub fn authenticate(&self, id: u64, username: String) {
        if let Some((state, _)) = self.clients.lock().unwrap().get(&id) {
            let mut state = state.lock().unwrap();
            state.authenticated = true;
            state.username = Some(username);
        }
    }

    /// Apply a subscription request; unauthenticated clients may only join
    /// public channels, of which there are none by default.
    pub fn subscribe(&self, id: u64, channels: &[String]) -> Vec<String> {
        let clients = self.clients.lock().unwrap();
        let Some((state, _)) = clients.get(&id) else {
            return Vec::new();
        };
        let mut state = state.lock().unwrap();
        if !state.authenticated {
            return Vec::new();
        }

        let mut accepted = Vec::new();
        for channel in channels {
            if CHANNELS.contains(&channel.as_str()) {
                state.subscriptions.insert(channel.clone());
                accepted.push(channel.clone());
            }
        }
        accepted
    }

    pub fn unsubscribe(&self, id: u64, channels: &[String]) -> Vec<String> {
        let clients = self.clients.lock().unwrap();
        let Some((state, _)) = clients.get(&id) else {
            return Vec::new();
        };
        let mut state = state.lock().unwrap();
        let mut removed = Vec::new();
        for channel in channels {
            if state.subscriptions.remove(channel) {
                removed.push(channel.clone());
            }
        }
        removed
    }

    /// Fan one event out to every subscriber of `channel`.
    pub fn publish(&self, channel: &str, event_name: &str, data: serde_json::Value) {
        let frame = json!({
            "event": event_name,
            "channel": channel,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        })
        .to_string();

        let clients = self.clients.lock().unwrap();
        for (state, notify) in clients.values() {
            let mut state = state.lock().unwrap();
            if !state.subscriptions.contains(channel) {
                continue;
            }
            Self::enqueue(&mut state, frame.clone(), &self.metrics);
            notify.notify_one();
        }
    }

    /// Queue a frame for one specific client (replies, greetings).
    pub fn send_to(&self, id: u64, frame: String) {
        let clients = self.clients.lock().unwrap();
        if let Some((state, notify)) = clients.get(&id) {
            let mut state = state.lock().unwrap();
            Self::enqueue(&mut state, frame, &self.metrics);
            notify.notify_one();
        }
    }

    /// Queue a frame to every connected client regardless of subscriptions
    /// (server_shutdown).
    pub fn broadcast_all(&self, frame: String) {
        let clients = self.clients.lock().unwrap();
        for (state, notify) in clients.values() {
            let mut state = state.lock().unwrap();
            Self::enqueue(&mut state, frame.clone(), &self.metrics);
            notify.notify_one();
        }
    }

    /// Kick every client (used at shutdown after the farewell frame).
    pub fn kick_all(&self) {
        let clients = self.clients.lock().unwrap();
        for (state, notify) in clients.values() {
            state.lock().unwrap().kicked = true;
            notify.notify_one();
        }
    }

    fn enqueue(state: &mut ClientState, frame: String, metrics: &IngestMetrics) {
        state.outgoing_bytes += frame.len();
        state.outgoing.push_back(frame);

        if state.outgoing_bytes <= CLIENT_BUFFER_BYTES {
            if state.outgoing_bytes < CLIENT_BUFFER_BYTES / 2 {
                state.lagging = false;
            }
            return;
        }

        // Backpressure: drop the slowest (oldest) events, keep the socket
        let mut dropped = 0u64;
        while state.outgoing_bytes > CLIENT_BUFFER_BYTES {
            match state.outgoing.pop_front() {
                Some(old) => {
                    state.outgoing_bytes -= old.len();
                    dropped += 1;
                }
                None => break,
            }
        }
        metrics.stream_lag_drops.fetch_add(dropped, Ordering::Relaxed);

        if !state.lagging {
            state.lagging = true;
            let notice = json!({
                "event": "stream_lag",
                "data": { "dropped": dropped },
                "timestamp": Utc::now().to_rfc3339(),
            })
            .to_string();
            state.outgoing_bytes += notice.len();
            state.outgoing.push_back(notice);
        }
    }
}
