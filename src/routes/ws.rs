//! routes/ws.rs — the persistent connection endpoint.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    events::ClientEvent, presence::Registry, rooms::RoomRouter, session::SessionHandler,
    store::MessageLog,
};

pub fn router() -> Router {
    Router::new().route("/chat", get(ws_handler))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(registry): Extension<Registry>,
    Extension(rooms): Extension<RoomRouter>,
    Extension(log): Extension<MessageLog>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_loop(socket, registry, rooms, log))
}

/* ---------------- per connection ---------------- */

async fn client_loop(socket: WebSocket, registry: Registry, rooms: RoomRouter, log: MessageLog) {
    let conn_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel();
    rooms.connect(conn_id, tx).await;
    tracing::debug!(%conn_id, "connection opened");

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else { continue };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let handler = SessionHandler::new(conn_id, registry, rooms, log);
    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(raw) => match serde_json::from_str::<ClientEvent>(&raw) {
                Ok(event) => handler.handle(event).await,
                // unknown or malformed events are ignored, not errors
                Err(err) => tracing::debug!(%conn_id, "ignoring inbound frame: {err}"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    handler.disconnect().await;
    writer.abort();
    tracing::debug!(%conn_id, "connection closed");
}
