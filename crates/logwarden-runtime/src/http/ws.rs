use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use futures_util::SinkExt;
use std::time::{Duration, Instant};
use tracing::debug;

use super::auth::verify_jwt;
use super::AppState;
use crate::hub::ClientHandle;

/// Transport ping cadence and the silence budget before termination.
const PING_INTERVAL: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(35);

/// `GET /stream` — the live event WebSocket.
pub async fn stream(State(state): State<Arc<AppState>>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| handle_socket(socket, state))
}

fn server_frame(event: &str, data: Value) -> String {
    json!({
        "event": event,
        "data": data,
        "timestamp": Utc::now().to_rfc3339(),
    })
    .to_string()
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let client = state.hub.register();
    let client_id = format!("{:08x}", client.id);

    let greeting = server_frame("connected", json!({ "clientId": client_id }));
    if socket.send(Message::Text(greeting.into())).await.is_err() {
        state.hub.unregister(client.id);
        return;
    }

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(message)) => {
                        last_seen = Instant::now();
                        if handle_client_message(message, &client, &state, &mut socket).await.is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            }
            _ = client.notify.notified() => {
                if client.is_kicked() {
                    debug!(client = %client_id, "terminating client");
                    break;
                }
                // Drain the outgoing queue
                let mut failed = false;
                while let Some(frame) = client.pop_outgoing() {
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        failed = true;
                        break;
                    }
                }
                if failed {
                    break;
                }
            }
            _ = ping.tick() => {
                if last_seen.elapsed() > IDLE_TIMEOUT {
                    debug!(client = %client_id, "idle timeout");
                    break;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.hub.unregister(client.id);
    let _ = socket.close().await;
}

/// Client events: `authenticate | subscribe | unsubscribe | ping`.
async fn handle_client_message(
    message: Message,
    client: &ClientHandle,
    state: &Arc<AppState>,
    socket: &mut WebSocket,
) -> Result<(), ()> {
    let text = match message {
        Message::Text(text) => text.to_string(),
        Message::Close(_) => return Err(()),
        // Transport pong and binary noise keep the connection alive but
        // carry no protocol meaning
        _ => return Ok(()),
    };

    let Ok(value) = serde_json::from_str::<Value>(&text) else {
        return reply(socket, server_frame("error", json!({ "message": "not json" }))).await;
    };

    match value.get("event").and_then(Value::as_str) {
        Some("authenticate") => {
            let token = value.get("token").and_then(Value::as_str).unwrap_or_default();
            match verify_jwt(state, token) {
                Some((username, _role)) => {
                    state.hub.authenticate(client.id, username.clone());
                    reply(
                        socket,
                        server_frame("authenticated", json!({ "user": username })),
                    )
                    .await
                }
                None => {
                    reply(
                        socket,
                        server_frame("error", json!({ "message": "invalid token" })),
                    )
                    .await
                }
            }
        }
        Some("subscribe") => {
            let channels = channel_list(&value);
            let accepted = state.hub.subscribe(client.id, &channels);
            if accepted.is_empty() && !client.is_authenticated() {
                reply(
                    socket,
                    server_frame("error", json!({ "message": "authenticate before subscribing" })),
                )
                .await
            } else {
                reply(
                    socket,
                    server_frame("subscribed", json!({ "channels": accepted })),
                )
                .await
            }
        }
        Some("unsubscribe") => {
            let channels = channel_list(&value);
            let removed = state.hub.unsubscribe(client.id, &channels);
            reply(
                socket,
                server_frame("unsubscribed", json!({ "channels": removed })),
            )
            .await
        }
        Some("ping") => reply(socket, server_frame("pong", json!({}))).await,
        _ => {
            reply(
                socket,
                server_frame("error", json!({ "message": "unknown event" })),
            )
            .await
        }
    }
}

fn channel_list(value: &Value) -> Vec<String> {
    value
        .get("channels")
        .and_then(Value::as_array)
        .map(|channels| {
            channels
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

async fn reply(socket: &mut WebSocket, frame: String) -> Result<(), ()> {
    socket
        .send(Message::Text(frame.into()))
        .await
        .map_err(|_| ())
}
