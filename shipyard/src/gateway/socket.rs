//! WebSocket endpoint for realtime log viewers

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use openapi_server::models::{ClientFrame, ServerFrame};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::bus::Topics;
use crate::gateway::rooms::{ConnectionId, Rooms};

/// How often to send WebSocket Ping frames
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong before considering the connection dead
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(rooms): State<Arc<Rooms>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, rooms))
}

async fn handle_socket(socket: WebSocket, rooms: Arc<Rooms>) {
    let (conn, frames) = rooms.register();
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, frames, conn, &rooms).await;
    rooms.disconnect(conn);
}

/// Forward queued frames, apply client frames, and keep the connection alive
/// with ping/pong
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut frames: mpsc::Receiver<String>,
    conn: ConnectionId,
    rooms: &Rooms,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!("Connection {} missed its pong", conn);
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            frame = frames.recv() => {
                match frame {
                    Some(frame) => {
                        if sender.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    // Disconnected by the room table (queue overflow)
                    None => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_frame(rooms, conn, text.as_str());
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

fn handle_client_frame(rooms: &Rooms, conn: ConnectionId, text: &str) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            rooms.notify(conn, &ServerFrame::Error(format!("malformed frame: {}", e)));
            return;
        }
    };

    match frame {
        ClientFrame::Subscribe(room) => match Topics::parse_room(&room) {
            Some(deployment_id) => {
                if let Err(e) = rooms.join(conn, deployment_id) {
                    rooms.notify(conn, &ServerFrame::Error(e.to_string()));
                }
            }
            None => rooms.notify(conn, &ServerFrame::Error(format!("unknown room {:?}", room))),
        },
        ClientFrame::Unsubscribe(room) => {
            if let Some(deployment_id) = Topics::parse_room(&room) {
                rooms.leave(conn, deployment_id);
            }
        }
    }
}
