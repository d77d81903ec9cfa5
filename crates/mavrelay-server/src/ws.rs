//! WebSocket endpoint viewers subscribe on.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info};

use crate::hub::HubHandle;

pub fn ws_router(hub: HubHandle) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(hub)
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<HubHandle>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_viewer(socket, hub))
}

/// Pumps hub output to one socket until either side goes away. Anything the
/// viewer sends is ignored.
async fn serve_viewer(socket: WebSocket, hub: HubHandle) {
    let Some(mut viewer) = hub.accept().await else {
        debug!("hub stopped, refusing viewer");
        return;
    };
    let id = viewer.id();
    info!("[viewer {}] connected", id);

    let (mut ws_tx, mut ws_rx) = socket.split();
    loop {
        tokio::select! {
            text = viewer.next() => {
                let Some(text) = text else { break };
                if ws_tx.send(Message::Text(text.to_string())).await.is_err() {
                    debug!("[viewer {}] send failed, closing", id);
                    break;
                }
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("[viewer {}] read error: {}", id, e);
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    drop(viewer);
    let _ = ws_tx.close().await;
    info!("[viewer {}] disconnected", id);
}
