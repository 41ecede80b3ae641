//! WebSocket transport tests against a real axum server

use auth::PasswordHashing;
use futures::{SinkExt, StreamExt};
use realtime::cleanup::NoopCleanup;
use realtime::gateway::ws::AUTH_TIMEOUT_CLOSE_CODE;
use realtime::{AppState, Settings, Storage, routes};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server(auth_timeout_secs: u64) -> (SocketAddr, AppState) {
    let mut settings = Settings::load_from("realtime-test-missing").unwrap();
    settings.gateway.auth_timeout_secs = auth_timeout_secs;

    let state = AppState::build(
        &settings,
        Storage::Memory,
        PasswordHashing::insecure_fast(),
        Arc::new(NoopCleanup),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = routes::create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, state)
}

async fn connect(addr: SocketAddr) -> Socket {
    let (socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    socket
}

async fn send(socket: &mut Socket, frame: Value) {
    socket.send(Message::Text(frame.to_string())).await.unwrap();
}

/// Next JSON event, skipping control frames
async fn next_event(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for an event")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn register(socket: &mut Socket, name: &str) -> Uuid {
    send(
        socket,
        json!({
            "event": "register",
            "data": {
                "first_name": name,
                "last_name": "Socket",
                "email": format!("{}@example.com", name.to_lowercase()),
                "password": "password123"
            }
        }),
    )
    .await;
    let event = next_event(socket).await;
    assert_eq!(event["event"], "auth_success", "{}", event);
    event["data"]["user"]["id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn messages_flow_between_sockets() {
    let (addr, _state) = spawn_server(30).await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    let _alice_id = register(&mut alice, "Alice").await;
    let bob_id = register(&mut bob, "Bob").await;

    send(
        &mut alice,
        json!({
            "event": "create_conversation",
            "data": { "participant_ids": [bob_id], "is_group": false }
        }),
    )
    .await;
    let created = next_event(&mut alice).await;
    assert_eq!(created["event"], "conversation_created");
    let conversation_id = created["data"]["conversation"]["id"].clone();
    assert_eq!(next_event(&mut bob).await["event"], "conversation_created");

    send(
        &mut bob,
        json!({
            "event": "send_message",
            "data": { "conversation_id": conversation_id, "content": "hello" }
        }),
    )
    .await;
    let received = next_event(&mut alice).await;
    assert_eq!(received["event"], "new_message");
    assert_eq!(received["data"]["message"]["content"], "hello");
    assert_eq!(received["data"]["message"]["sender_id"], bob_id.to_string());
}

#[tokio::test]
async fn malformed_frames_keep_the_socket_open() {
    let (addr, _state) = spawn_server(30).await;
    let mut socket = connect(addr).await;

    socket
        .send(Message::Text("definitely not json".to_string()))
        .await
        .unwrap();
    let event = next_event(&mut socket).await;
    assert_eq!(event["event"], "error");
    assert_eq!(event["data"]["kind"], "bad_request");

    send(&mut socket, json!({ "event": "get_conversations" })).await;
    let event = next_event(&mut socket).await;
    assert_eq!(event["data"]["kind"], "not_authenticated");
}

#[tokio::test]
async fn unauthenticated_sockets_are_closed_after_the_timeout() {
    let (addr, _state) = spawn_server(1).await;
    let mut socket = connect(addr).await;

    let code = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(message) = socket.next().await {
            if let Ok(Message::Close(Some(frame))) = message {
                return Some(u16::from(frame.code));
            }
        }
        None
    })
    .await
    .expect("socket should be closed by the server");

    assert_eq!(code, Some(AUTH_TIMEOUT_CLOSE_CODE));
}

#[tokio::test]
async fn dropped_sockets_are_unbound() {
    let (addr, state) = spawn_server(30).await;
    let mut socket = connect(addr).await;
    let user_id = register(&mut socket, "Dora").await;
    assert!(state.gateway.registry().is_online(user_id));

    drop(socket);

    let unbound = tokio::time::timeout(Duration::from_secs(5), async {
        while state.gateway.registry().is_online(user_id) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(unbound.is_ok(), "connection should be unbound after the socket drops");
}

#[tokio::test]
async fn health_reports_storage_and_connections() {
    let (addr, _state) = spawn_server(30).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.contains("\"status\":\"ok\""));
    assert!(response.contains("\"storage\":\"memory\""));
}
