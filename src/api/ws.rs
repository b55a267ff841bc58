// =============================================================================
// WebSocket Handler — live engine-event stream
// =============================================================================
//
// Clients connect to `/api/v1/ws?token=<token>` and receive:
//   1. An immediate full StateSnapshot on connect.
//   2. Every engine event as it is published, serialized as JSON.
//
// A subscriber that falls behind the broadcast buffer is resynced with a
// fresh snapshot instead of being disconnected. Ping frames are answered
// with Pong; Close ends the session.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::api::validate_token;
use crate::app_state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Axum handler for the WebSocket upgrade request.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    if !validate_token(&token) {
        warn!("WebSocket connection rejected: invalid token");
        return (
            axum::http::StatusCode::FORBIDDEN,
            "invalid or missing token",
        )
            .into_response();
    }

    info!("WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
        .into_response()
}

/// Manage one connection: initial snapshot, then the live event feed.
async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.subscribe_events();

    if send_snapshot(&mut sender, &state).await.is_err() {
        warn!("failed to send initial WebSocket snapshot");
        return;
    }

    loop {
        tokio::select! {
            // ── Live events ─────────────────────────────────────────
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(error = %e, "failed to serialize event");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            debug!("WebSocket send failed — disconnecting");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        // Too slow: resync with a snapshot instead of
                        // replaying the gap.
                        debug!(missed, "subscriber lagged — resyncing with snapshot");
                        if send_snapshot(&mut sender, &state).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        info!("engine event stream closed — disconnecting");
                        break;
                    }
                }
            }

            // ── Incoming client frames ──────────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket closed by client");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Text/binary/pong from clients are ignored.
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                }
            }
        }
    }

    debug!("WebSocket connection closed — cleanup complete");
}

/// Serialize and send the current full snapshot.
async fn send_snapshot<S>(sender: &mut S, state: &Arc<AppState>) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    let snapshot = state.build_snapshot();
    match serde_json::to_string(&snapshot) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            // Serialisation errors are not network errors; keep the session.
            warn!(error = %e, "failed to serialize snapshot");
            Ok(())
        }
    }
}
