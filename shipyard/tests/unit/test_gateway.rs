//! Realtime gateway tests over a real WebSocket

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use openapi_server::models::{LogPayload, ServerFrame};
use shipyard::bus::{LogBus, MemoryBus, Topics};
use shipyard::gateway::Rooms;
use shipyard::models::deployment::LogEvent;
use shipyard::server::serve::gateway_app;
use shipyard::workers::fanout;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Gateway {
    addr: SocketAddr,
    bus: Arc<MemoryBus>,
    rooms: Arc<Rooms>,
}

async fn start_gateway() -> Gateway {
    let bus = Arc::new(MemoryBus::new());
    let rooms = Arc::new(Rooms::new(64, 0));

    let subscription = bus.subscribe(Topics::ALL_LOGS).await.unwrap();
    let fanout_rooms = rooms.clone();
    tokio::spawn(async move {
        fanout::run(
            subscription,
            fanout_rooms.as_ref(),
            Box::pin(std::future::pending::<()>()),
        )
        .await;
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = gateway_app(rooms.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Gateway { addr, bus, rooms }
}

async fn connect(gateway: &Gateway) -> Client {
    let (client, _) = connect_async(format!("ws://{}/ws", gateway.addr))
        .await
        .unwrap();
    client
}

async fn send(client: &mut Client, event: &str, data: &str) {
    let frame = serde_json::json!({ "event": event, "data": data }).to_string();
    client.send(Message::Text(frame.into())).await.unwrap();
}

/// Next server frame, skipping control frames
async fn next_frame(client: &mut Client) -> ServerFrame {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("no frame within 5s")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn next_log(client: &mut Client) -> LogPayload {
    match next_frame(client).await {
        ServerFrame::Message(data) => serde_json::from_str(&data).unwrap(),
        ServerFrame::Error(e) => panic!("unexpected error frame: {e}"),
    }
}

async fn publish(bus: &MemoryBus, id: &str, sequence: u64) {
    bus.publish(&LogEvent {
        deployment_id: id.to_string(),
        sequence,
        timestamp: Utc::now(),
        message: format!("{id} line {sequence}"),
        status: None,
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_subscriber_receives_ack_then_ordered_logs() {
    let gateway = start_gateway().await;
    let mut client = connect(&gateway).await;

    send(&mut client, "subscribe", "logs:site-a").await;
    let ack = next_log(&mut client).await;
    assert_eq!(ack.log, "Joined logs:site-a");
    assert_eq!(ack.sequence, None);

    for seq in 1..=5 {
        publish(&gateway.bus, "site-a", seq).await;
        publish(&gateway.bus, "site-b", seq).await;
    }
    for seq in 1..=5 {
        let log = next_log(&mut client).await;
        assert_eq!(log.sequence, Some(seq));
        assert_eq!(log.log, format!("site-a line {seq}"));
    }
}

#[tokio::test]
async fn test_late_joiner_only_sees_later_events() {
    let gateway = start_gateway().await;
    let mut early = connect(&gateway).await;
    send(&mut early, "subscribe", "logs:site").await;
    next_log(&mut early).await;

    publish(&gateway.bus, "site", 1).await;
    publish(&gateway.bus, "site", 2).await;
    assert_eq!(next_log(&mut early).await.sequence, Some(1));
    assert_eq!(next_log(&mut early).await.sequence, Some(2));

    let mut late = connect(&gateway).await;
    send(&mut late, "subscribe", "logs:site").await;
    assert_eq!(next_log(&mut late).await.sequence, None);

    publish(&gateway.bus, "site", 3).await;
    assert_eq!(next_log(&mut late).await.sequence, Some(3));
    assert_eq!(next_log(&mut early).await.sequence, Some(3));
}

#[tokio::test]
async fn test_bad_frames_get_error_replies() {
    let gateway = start_gateway().await;
    let mut client = connect(&gateway).await;

    client
        .send(Message::Text("{not json".to_string().into()))
        .await
        .unwrap();
    assert!(matches!(next_frame(&mut client).await, ServerFrame::Error(_)));

    send(&mut client, "subscribe", "deployments:site").await;
    assert!(matches!(next_frame(&mut client).await, ServerFrame::Error(_)));

    // The connection survives bad input
    send(&mut client, "subscribe", "logs:site").await;
    assert_eq!(next_log(&mut client).await.log, "Joined logs:site");
}

#[tokio::test]
async fn test_unsubscribe_and_close_leave_rooms() {
    let gateway = start_gateway().await;
    let mut client = connect(&gateway).await;
    send(&mut client, "subscribe", "logs:site").await;
    next_log(&mut client).await;
    assert_eq!(gateway.rooms.members("site"), 1);

    send(&mut client, "unsubscribe", "logs:site").await;
    // Ordered after the unsubscribe on the same socket
    send(&mut client, "subscribe", "logs:other").await;
    next_log(&mut client).await;
    assert_eq!(gateway.rooms.members("site"), 0);

    client.close(None).await.unwrap();
    for _ in 0..100 {
        if gateway.rooms.connections() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(gateway.rooms.connections(), 0);
    assert_eq!(gateway.rooms.members("other"), 0);
}
