//! # routes::stream
//!
//! **Event Stream** — `GET /ws/agent`
//!
//! ## Server → client
//! ```text
//! 1. { "type": "status",  "payload": AgentStatus }     once, on connect
//! 2. replay buffer                                     oldest first (≤ 50)
//! 3. live events                                       until disconnect
//! ```
//!
//! ## Client → server
//! `{ "type": "analyze", "position_id": 7 }` queues an on-demand analysis.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{models::PositionId, state::SharedState};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Analyze { position_id: PositionId },
}

/// Upgrade HTTP → WebSocket and attach a broadcaster subscription.
pub async fn ws_agent(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (sender, receiver) = socket.split();
    run_session(&state, sender, receiver).await;
}

/// Drive one client: status snapshot, then the subscription, while reading
/// client messages.  Generic over the socket halves.
async fn run_session<Tx, Rx, E>(state: &SharedState, mut sender: Tx, mut receiver: Rx)
where
    Tx: Sink<Message> + Unpin,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
{
    // subscribe first: anything published while the status is built lands
    // in this subscriber's queue behind the replay
    let mut subscription = state.events.subscribe();

    info!(subscriber = subscription.id(), "🔌 Event stream client connected");

    // ── Status snapshot ───────────────────────────────────────────────────────
    let status = state.agent.status().await;
    let status = json!({
        "type":    "status",
        "payload": status,
    })
    .to_string();

    if sender.send(Message::Text(status)).await.is_err() {
        return;
    }

    // ── Event Loop ────────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            // replay, then live events
            event = subscription.recv() => {
                match event {
                    Some(event) => {
                        if sender.send(Message::Text(event.to_json())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // broadcaster dropped us — queue overflowed
                        warn!(subscriber = subscription.id(), "Slow event stream client disconnected");
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Text(text))) => handle_client_message(state, &text).await,
                    _ => {}
                }
            }
        }
    }

    info!(subscriber = subscription.id(), "🔌 Event stream client disconnected");
}

async fn handle_client_message(state: &SharedState, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Analyze { position_id }) => {
            if let Err(e) = state.agent.request_analysis(position_id).await {
                debug!(position_id, error = %e, "On-demand analysis rejected");
            }
        }
        Err(e) => debug!(error = %e, "Ignoring unrecognised client message"),
    }
}
