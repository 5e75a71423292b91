//! WebSocket transport for the JSON-RPC control plane (§4.9: "Transports a
//! persistent message stream per client, framed text messages"). Each
//! connection gets its own [`ClientConnection`] (rate limiter + auth
//! state); the dispatch table itself lives in `rpc::dispatch`. The
//! connection task selects over three sources: inbound frames, the event
//! bus subscription, and a heartbeat tick that keeps idle connections
//! alive and detects dead peers.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tracing::{debug, info, warn};

use crate::rpc::event_to_notification;
use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let (client_id, mut conn) = state.rpc.new_connection();
    let max_auth_failures = state.max_auth_failures();
    let mut events = state.events.subscribe();
    let heartbeat_interval = std::time::Duration::from_secs(state.config.snapshot().server.heartbeat_interval_secs);
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.tick().await;

    info!(client_id, "rpc client connected");

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match state.rpc.handle_frame(&text, &mut conn).await {
                            Some(response) => {
                                let json = match serde_json::to_string(&response) {
                                    Ok(j) => j,
                                    Err(e) => {
                                        warn!(client_id, error = %e, "failed to serialize rpc response");
                                        continue;
                                    }
                                };
                                if socket.send(Message::Text(json)).await.is_err() {
                                    break;
                                }
                            }
                            None => {
                                debug!(client_id, "closing connection on unrecoverable frame");
                                break;
                            }
                        }

                        if state.rpc.should_close_for_auth_failures(&conn, max_auth_failures) {
                            warn!(client_id, "closing connection after repeated auth failures");
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Binary(_))) => {
                        warn!(client_id, "binary frames are not supported on the rpc transport");
                    }
                    Some(Err(e)) => {
                        warn!(client_id, error = %e, "websocket receive error");
                        break;
                    }
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let subscribed = conn.subscriptions.iter().any(|topic| event.matches_topic(topic));
                        if conn.authenticated && subscribed {
                            if let Some(notification) = event_to_notification(&event) {
                                if let Ok(json) = serde_json::to_string(&notification) {
                                    if socket.send(Message::Text(json)).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(client_id, dropped = n, "client lagged on event bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    state.rpc.drop_connection(&client_id);
    info!(client_id, "rpc client disconnected");
}
