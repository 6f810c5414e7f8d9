//! WebSocket handler for relay connections.

use axum::{
    body::Bytes,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::api::AppState;

use super::hub::{Outgoing, Registration, RelayHub};

/// How long a terminated connection gets to flush its close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// WebSocket upgrade handler.
///
/// GET /td
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Pump one socket through the hub until either side closes it.
pub async fn handle_socket(socket: WebSocket, hub: Arc<RelayHub>) {
    let (mut sender, mut receiver) = socket.split();
    let Registration {
        id,
        mut outgoing,
        cancel,
    } = hub.register();
    info!(conn_id = %id, "relay connection opened");

    let mut writer = tokio::spawn(async move {
        while let Some(item) = outgoing.recv().await {
            let message = match item {
                Outgoing::Event(event) => match serde_json::to_string(&event) {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        warn!("Failed to serialize relay event: {}", e);
                        continue;
                    }
                },
                Outgoing::Ping => Message::Ping(Bytes::new()),
                Outgoing::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(conn_id = %id, "relay connection terminated by hub");
                break;
            }
            frame = receiver.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => hub.handle_text(id, text.as_str()),
            Some(Ok(Message::Binary(data))) => hub.handle_binary(id, &data),
            Some(Ok(Message::Pong(_))) => hub.mark_alive(id),
            // Pings are answered by axum.
            Some(Ok(Message::Ping(_))) => {}
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                warn!(conn_id = %id, "relay socket error: {}", e);
                break;
            }
        }
    }

    // Dropping the hub's sender ends the writer once queued frames are out.
    hub.disconnect(id);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
}
