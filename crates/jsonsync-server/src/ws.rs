use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use jsonsync_core::{SubscriberId, Subscription, SyncCoordinator};
use std::sync::Arc;

use crate::state::AppState;

/// WebSocket upgrade handler for the push channel
pub async fn ws_sync(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let coordinator = state.coordinator.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, coordinator))
}

/// Send the snapshot, then stream change events until either side hangs up
async fn handle_socket(mut socket: WebSocket, coordinator: Arc<SyncCoordinator>) {
    let (snapshot, mut subscription) = coordinator.subscribe();
    let subscriber_id = subscription.id();

    let sent = match snapshot.encode() {
        Ok(payload) => socket.send(Message::Text(payload)).await.is_ok(),
        Err(e) => {
            tracing::warn!(subscriber_id, error = %e, "failed to encode snapshot");
            false
        }
    };
    if sent {
        tracing::debug!(subscriber_id, files = snapshot.len(), "snapshot sent");
        forward(&mut socket, &mut subscription, subscriber_id).await;
    }

    coordinator.hub().unregister(subscriber_id);
    tracing::debug!(subscriber_id, "push connection closed");
}

/// Relay queued events; incoming messages only signal liveness.
async fn forward(
    socket: &mut WebSocket,
    subscription: &mut Subscription,
    subscriber_id: SubscriberId,
) {
    loop {
        tokio::select! {
            queued = subscription.recv() => {
                // None: the hub dropped this subscriber.
                let Some(payload) = queued else { break };
                if socket.send(Message::Text(payload.to_string())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::debug!(subscriber_id, error = %e, "WebSocket error");
                    break;
                }
            },
        }
    }
}
