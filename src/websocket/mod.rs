//! WebSocket feed of loan lifecycle events
//!
//! Clients subscribe to loan ids; an empty subscription list receives every
//! event.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, mpsc, RwLock};
use uuid::Uuid;

use crate::events::{EventBus, LifecycleEvent};

/// WebSocket server state
#[derive(Clone)]
pub struct WsState {
    events: EventBus,
    /// Connected clients and the loans they follow
    clients: Arc<RwLock<HashMap<Uuid, HashSet<Uuid>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    Subscribe { loan_ids: Vec<Uuid> },
    Unsubscribe { loan_ids: Vec<Uuid> },
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ServerMessage {
    Event { event: LifecycleEvent },
    Subscribed { loan_ids: Vec<Uuid> },
    Unsubscribed { loan_ids: Vec<Uuid> },
    Pong,
    Error { message: String },
}

impl WsState {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    async fn wants(&self, client_id: Uuid, event: &LifecycleEvent) -> bool {
        let clients = self.clients.read().await;
        clients
            .get(&client_id)
            .map_or(false, |loans| loans.is_empty() || loans.contains(&event.loan_id))
    }

    async fn subscribe(&self, client_id: Uuid, loan_ids: &[Uuid]) {
        let mut clients = self.clients.write().await;
        if let Some(loans) = clients.get_mut(&client_id) {
            loans.extend(loan_ids.iter().copied());
        }
    }

    async fn unsubscribe(&self, client_id: Uuid, loan_ids: &[Uuid]) {
        let mut clients = self.clients.write().await;
        if let Some(loans) = clients.get_mut(&client_id) {
            loans.retain(|id| !loan_ids.contains(id));
        }
    }
}

/// Upgrade HTTP to WebSocket
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let client_id = Uuid::new_v4();
    state
        .clients
        .write()
        .await
        .insert(client_id, HashSet::new());
    tracing::info!(client_id = %client_id, "WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMessage>(32);
    let mut events = state.events.subscribe();

    let send_state = state.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => {
                        if !send_state.wants(client_id, &event).await {
                            continue;
                        }
                        ServerMessage::Event { event }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(client_id = %client_id, skipped, "WebSocket client lagging");
                        ServerMessage::Error {
                            message: format!("{} events dropped", skipped),
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(reply) = reply_rx.recv() => reply,
                else => break,
            };

            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let reply = match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Subscribe { loan_ids }) => {
                    recv_state.subscribe(client_id, &loan_ids).await;
                    ServerMessage::Subscribed { loan_ids }
                }
                Ok(ClientMessage::Unsubscribe { loan_ids }) => {
                    recv_state.unsubscribe(client_id, &loan_ids).await;
                    ServerMessage::Unsubscribed { loan_ids }
                }
                Ok(ClientMessage::Ping) => ServerMessage::Pong,
                Err(e) => ServerMessage::Error {
                    message: format!("Unrecognized message: {}", e),
                },
            };
            if reply_tx.send(reply).await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    state.clients.write().await.remove(&client_id);
    tracing::info!(client_id = %client_id, "WebSocket client disconnected");
}
