//! WebSocket session handler
//!
//! One task per connection reads frames; a second task drains the
//! connection's bounded event channel into the socket, so a slow peer
//! never stalls command processing. A peer that lets its buffer fill is
//! cut off by the registry, at which point the writer task drains and
//! closes the socket. Commands take their turn through the store lock,
//! which is the hub's single serialization point.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::handlers::{self, SessionCtx};
use crate::models::{now_ms, ClientCommand, ServerEvent};
use crate::websocket::{Outbound, EVENT_BUFFER_SIZE};
use crate::AppState;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Bounded channel feeding this client's writer task; the registry
    // holds the only sender, so dropping the registration closes it
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(EVENT_BUFFER_SIZE);
    let conn_id = state.registry.register_conn(tx);
    let mut ctx = SessionCtx::new(conn_id);

    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                if ws_sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
        // channel closed: normal teardown, or the registry cut this
        // peer off for exceeding its buffer
        let _ = ws_sender.close().await;
    });

    state
        .registry
        .send_to_conn(conn_id, ServerEvent::Connected {});

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let command = match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(command) => command,
                    Err(e) => {
                        // malformed or unknown commands are dropped
                        tracing::warn!("Dropping undecodable frame: {}", e);
                        continue;
                    }
                };

                let mut guard = state.store.lock().await;
                let reply = handlers::route(&mut guard, &state.registry, &mut ctx, command);
                if reply.persist {
                    state.store.flush(&guard).await;
                }
                drop(guard);

                state.registry.dispatch(conn_id, reply.events);
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                // binary frames and transport pings are ignored
            }
            Err(e) => {
                tracing::warn!("WebSocket error on conn {}: {}", conn_id, e);
                break;
            }
        }
    }

    // Cleanup
    state.registry.remove_conn(conn_id);

    if let Some(user_id) = ctx.user_id.take() {
        let mut guard = state.store.lock().await;
        // an orphaned session (identity rebound elsewhere) must not mark
        // the user offline
        if state.registry.unbind_if_owner(&user_id, conn_id) {
            let last_seen = now_ms();
            if let Some(user) = guard.users.get_mut(&user_id) {
                user.is_online = false;
                user.last_seen = last_seen;
            }
            state.store.flush(&guard).await;
            drop(guard);

            state.registry.dispatch(
                conn_id,
                vec![Outbound::broadcast(
                    ServerEvent::UserOffline {
                        user_id,
                        last_seen,
                        online_user_ids: state.registry.online_user_ids(),
                    },
                    false,
                )],
            );
        }
    }

    send_task.abort();
}
