//! Datachannel attach endpoint — GET /rooms/{room_id}/events.
//!
//! The concrete reliable-ordered transport behind the room abstraction:
//! a WebSocket that forwards the room's control-message stream as UTF-8
//! JSON text frames, in publish order, until the room closes or the
//! socket drops.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use docent_core::config::OPERATOR_ROOM;

use crate::app::AppState;
use crate::auth;

pub async fn room_events_handler(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params.get("token").map(String::as_str).unwrap_or("");
    let secret = &state.config.gateway.secret;

    let authorised = match params.get("session_id") {
        Some(session_id) => {
            let owns_room = state
                .registry
                .get_entry(session_id)
                .map(|e| e.room_id == room_id)
                .unwrap_or(false);
            owns_room && auth::verify_token(secret, session_id, &room_id, token)
        }
        None if room_id == OPERATOR_ROOM => auth::verify_operator_token(secret, token),
        None => false,
    };
    if !authorised {
        return (StatusCode::UNAUTHORIZED, "missing or invalid token").into_response();
    }

    let Ok(rx) = state.rooms.subscribe(&room_id) else {
        return (StatusCode::NOT_FOUND, "room is gone").into_response();
    };

    ws.on_upgrade(move |socket| forward_room(socket, rx, room_id))
}

/// Pump the room broadcast into the socket. A consumer that falls behind
/// the broadcast backlog is disconnected rather than served out of order.
async fn forward_room(mut socket: WebSocket, mut rx: broadcast::Receiver<String>, room_id: String) {
    debug!(room = %room_id, "datachannel attached");
    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Ok(payload) => {
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        debug!(room = %room_id, "datachannel client went away");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(room = %room_id, missed, "slow datachannel consumer, disconnecting");
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    // Room closed — tell the client the stream is over.
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            // The client never publishes on this channel; inbound traffic is
            // drained only to notice the socket closing.
            inbound = socket.recv() => match inbound {
                Some(Ok(_)) => {}
                Some(Err(_)) | None => {
                    debug!(room = %room_id, "datachannel detached");
                    break;
                }
            },
        }
    }
}
