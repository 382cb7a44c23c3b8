//! WebSocket live event channel.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use minici_core::BuildId;
use minici_core::event::{BuildEvent, Broadcaster};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::AppState;

/// Broadcaster backed by a bounded tokio broadcast channel.
///
/// Subscribers that fall behind by more than the capacity lose the oldest
/// events and are told how many they missed.
#[derive(Clone)]
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<BuildEvent>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.sender.subscribe()
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn publish(&self, event: BuildEvent) {
        // Fails only when nobody is listening.
        let _ = self.sender.send(event);
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let events = state.events.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, events))
}

async fn handle_socket(socket: WebSocket, mut events: broadcast::Receiver<BuildEvent>) {
    info!("WebSocket connection established");
    let (mut sink, mut stream) = socket.split();
    let mut filter: Option<BuildId> = None;

    loop {
        let outgoing = tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<WsCommand>(&text) {
                    Ok(WsCommand::Subscribe { build_id }) => {
                        debug!(build_id = %build_id, "Client subscribed");
                        filter = Some(build_id);
                        serde_json::to_string(&WsMessage::Subscribed { build_id })
                    }
                    Ok(WsCommand::Unsubscribe) => {
                        filter = None;
                        serde_json::to_string(&WsMessage::Unsubscribed)
                    }
                    Err(e) => {
                        debug!(error = %e, "Ignoring unknown WebSocket command");
                        continue;
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    break;
                }
                Some(Ok(_)) => continue,
            },
            event = events.recv() => match event {
                Ok(event) => {
                    if filter.is_some_and(|id| id != event.build_id()) {
                        continue;
                    }
                    serde_json::to_string(&event)
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "WebSocket client lagged behind");
                    serde_json::to_string(&WsMessage::Lagged { missed })
                }
                Err(RecvError::Closed) => break,
            },
        };

        let text = match outgoing {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to serialize WebSocket message");
                continue;
            }
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }

    info!("WebSocket connection closed");
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    Subscribe { build_id: BuildId },
    Unsubscribe,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsMessage {
    Subscribed { build_id: BuildId },
    Unsubscribed,
    /// The client missed events and should re-fetch build state.
    Lagged { missed: u64 },
}
