//! `GET /ws` — the streaming channel of §4.6/§6. Server-push only: a reader
//! task exists purely for liveness/half-close detection, no inbound commands
//! are defined.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;

use crate::config;

use super::AppState;

pub async fn upgrade(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Serialize)]
struct InitEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: InitPayload,
}

#[derive(Serialize)]
struct InitPayload {
    packets: Vec<crate::model::Packet>,
    stats: crate::model::AggregateStats,
    connections: Vec<crate::model::Connection>,
    interface: String,
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let init = InitEnvelope {
        kind: "init",
        data: InitPayload {
            packets: state.store.recent_packets(config::INIT_PACKETS_COUNT),
            stats: state.store.stats(&state.ip_cache),
            connections: state.store.connections(),
            interface: state.interface.clone(),
        },
    };
    let Ok(init_text) = serde_json::to_string(&init) else {
        return;
    };
    if sender.send(Message::Text(init_text)).await.is_err() {
        return;
    }

    let (client_id, mut outbound) = state.broadcaster.register();

    let mut writer_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut reader_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            if msg.is_err() {
                break;
            }
        }
    });

    // Either task ending (read error, write error, client disconnect) tears
    // down the other half and removes the client from the registry (§4.6).
    tokio::select! {
        _ = &mut writer_task => reader_task.abort(),
        _ = &mut reader_task => writer_task.abort(),
    }

    state.broadcaster.unregister(client_id);
}
