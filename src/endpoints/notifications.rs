use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::services::notification::NotificationPayload;
use crate::state::AppState;

pub fn notifications_routes(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct TopicQuery {
    pub topic: Option<String>,
}

/// WebSocket handler for install progress notifications
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<TopicQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let topic = query
        .topic
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| state.settings().topic.clone());
    tracing::info!(topic = %topic, "Notification WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state, topic))
}

/// Relay topic messages to the socket; text frames from the client are
/// published to the same topic
async fn handle_socket(socket: WebSocket, state: AppState, topic: String) {
    let (mut sender, mut receiver) = socket.split();
    let mut observer = state.hub.subscribe(&topic);

    tracing::info!(
        topic = %topic,
        observer = observer.id(),
        "Notification observer connected, observers: {}",
        state.hub.observer_count(&topic)
    );

    loop {
        tokio::select! {
            message = observer.recv() => {
                let Some(message) = message else { break };
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!("Failed to serialize notification: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let payload = serde_json::from_str::<NotificationPayload>(text.as_str())
                            .unwrap_or_else(|_| NotificationPayload::Text(text.as_str().to_string()));
                        state.hub.publish(&topic, payload);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client closed the connection");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::info!(
        topic = %observer.topic(),
        observer = observer.id(),
        "Notification observer disconnected"
    );
    state.hub.unsubscribe(observer);
}
