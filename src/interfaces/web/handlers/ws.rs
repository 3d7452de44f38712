use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use tracing::debug;

use crate::interfaces::web::AppState;

/// Upgrade to a WebSocket and stream task events at the client. Nothing the
/// client sends is consumed; a failed write means it went away.
pub async fn ws_endpoint(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let (subscriber_id, mut events) = state.manager.subscribe().await;

    while let Some(event) = events.recv().await {
        let Ok(text) = serde_json::to_string(&event) else {
            continue;
        };
        if socket.send(Message::Text(text.into())).await.is_err() {
            debug!("websocket write failed, dropping subscriber");
            break;
        }
    }

    state.manager.unsubscribe(subscriber_id).await;
}
