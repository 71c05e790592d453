//! WebSocket stream of service events
//!
//! Forwards every [`WalletEvent`](crate::dispatch::WalletEvent) published
//! on the bus to connected clients: proposal lifecycle changes and
//! confirmation notifications.

use crate::api::handlers::ApiState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    let bus = state.bus.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, bus))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, bus: std::sync::Arc<crate::dispatch::EventBus>) {
    let (mut sender, mut receiver) = socket.split();

    let mut rx = bus.subscribe();

    // Send welcome message
    let welcome = serde_json::json!({
        "type": "Connected",
        "data": { "message": "Connected to wallet event stream" },
    });
    if let Ok(json) = serde_json::to_string(&welcome) {
        let _ = sender.send(Message::Text(json.into())).await;
    }

    // Forward bus events to this client
    let mut send_task = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    // Handle incoming messages (ping/pong and graceful close)
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(data)) => {
                    // Pong is handled automatically by axum
                    log::debug!("Received ping: {:?}", data);
                }
                Ok(Message::Text(text)) => {
                    log::debug!("Received text message: {}", text);
                }
                Err(e) => {
                    log::warn!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    log::info!("WebSocket connection closed");
}
