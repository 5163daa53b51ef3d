//! WebSocket handler for `GET /ws/{room}`. Grounded on the reference SSE
//! handler's `async_stream`-driven forwarding loop (`api/system.rs`
//! `events_sse`), adapted from server-push-only SSE to the bidirectional
//! ping/pong contract a WebSocket room needs (§6 "Hub event channel").

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;

use super::server::ApiState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    State(state): State<Arc<ApiState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, room, state))
}

async fn handle_socket(socket: WebSocket, room: String, state: Arc<ApiState>) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut events) = state.hub.join(&room).await;

    // S6: a late joiner to a task room replays cached output before live
    // events resume; the prior task_complete (already broadcast to the
    // global room) is not replayed.
    if let Some(task_id) = room.strip_prefix("task_") {
        if let Some((log_id, lines)) = state.log_cache.replay(task_id).await {
            for line in lines {
                let payload = json!({
                    "type": "task_output",
                    "task_id": task_id,
                    "log_id": log_id,
                    "output_line": line.line,
                    "output_type": line.output_type.as_str(),
                });
                if sender.send(Message::Text(payload.to_string().into())).await.is_err() {
                    state.hub.leave(&room, conn_id).await;
                    return;
                }
            }
        }
    }

    loop {
        tokio::select! {
            forwarded = events.recv() => {
                match forwarded {
                    Some(text) => {
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if text.trim() == "\"ping\"" || text.contains("\"type\":\"ping\"") {
                            let pong = json!({"type": "pong"}).to_string();
                            if sender.send(Message::Text(pong.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.hub.leave(&room, conn_id).await;
}
