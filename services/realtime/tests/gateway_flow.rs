//! End-to-end gateway behaviour over in-memory connections and storage

use auth::PasswordHashing;
use realtime::cleanup::TempDirCleanup;
use realtime::gateway::{Connection, ConnectionState, Gateway, ServerEvent};
use realtime::{AppState, ErrorKind, Settings, Storage};
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

struct Harness {
    gateway: Gateway,
    uploads: TempDir,
}

struct Client {
    connection: Connection,
    events: UnboundedReceiver<ServerEvent>,
}

fn harness() -> Harness {
    let uploads = tempfile::tempdir().unwrap();
    let settings = Settings::load_from("realtime-test-missing").unwrap();
    let state = AppState::build(
        &settings,
        Storage::Memory,
        PasswordHashing::insecure_fast(),
        Arc::new(TempDirCleanup::new(uploads.path())),
    );
    Harness {
        gateway: state.gateway,
        uploads,
    }
}

impl Harness {
    fn connect(&self) -> Client {
        let (connection, events) = self.gateway.open("127.0.0.1");
        Client { connection, events }
    }

    async fn send(&self, client: &mut Client, frame: Value) {
        self.gateway
            .handle_frame(&mut client.connection, &frame.to_string())
            .await;
    }

    /// Register a fresh account on a new connection
    async fn register(&self, first_name: &str) -> (Client, Uuid, String) {
        let mut client = self.connect();
        self.send(
            &mut client,
            json!({
                "event": "register",
                "data": {
                    "first_name": first_name,
                    "last_name": "Tester",
                    "email": format!("{}@example.com", first_name.to_lowercase()),
                    "password": "password123"
                }
            }),
        )
        .await;

        match client.next() {
            ServerEvent::AuthSuccess { user, session_id } => (client, user.id, session_id),
            other => panic!("expected auth_success, got {:?}", other),
        }
    }

    async fn create_direct(&self, client: &mut Client, other: Uuid) -> Uuid {
        self.send(
            client,
            json!({
                "event": "create_conversation",
                "data": { "participant_ids": [other], "is_group": false }
            }),
        )
        .await;
        match client.next() {
            ServerEvent::ConversationCreated { conversation } => conversation.id,
            other => panic!("expected conversation_created, got {:?}", other),
        }
    }
}

impl Client {
    fn next(&mut self) -> ServerEvent {
        self.events.try_recv().expect("an event should be queued")
    }

    fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    fn expect_error(&mut self, kind: ErrorKind) {
        match self.next() {
            ServerEvent::Error { kind: actual, .. } => assert_eq!(actual, kind),
            other => panic!("expected error {:?}, got {:?}", kind, other),
        }
    }
}

#[tokio::test]
async fn message_and_read_receipt_reach_the_other_participant() {
    let h = harness();
    let (mut alice, alice_id, _) = h.register("Alice").await;
    let (mut bob, bob_id, _) = h.register("Bob").await;

    let conversation_id = h.create_direct(&mut alice, bob_id).await;
    assert!(matches!(bob.next(), ServerEvent::ConversationCreated { .. }));

    h.send(
        &mut bob,
        json!({
            "event": "send_message",
            "data": { "conversation_id": conversation_id, "content": "hello" }
        }),
    )
    .await;

    match alice.next() {
        ServerEvent::NewMessage { message } => {
            assert_eq!(message.content, "hello");
            assert_eq!(message.sender_id, bob_id);
            assert_eq!(message.sender.first_name, "Bob");
        }
        other => panic!("expected new_message, got {:?}", other),
    }
    assert!(matches!(bob.next(), ServerEvent::NewMessage { .. }));

    h.send(
        &mut alice,
        json!({ "event": "mark_read", "data": { "conversation_id": conversation_id } }),
    )
    .await;

    match bob.next() {
        ServerEvent::MessagesRead {
            conversation_id: id,
            user_id,
            count,
        } => {
            assert_eq!(id, conversation_id);
            assert_eq!(user_id, alice_id);
            assert_eq!(count, 1);
        }
        other => panic!("expected messages_read, got {:?}", other),
    }
}

#[tokio::test]
async fn unauthenticated_connections_are_rejected_but_stay_open() {
    let h = harness();
    let mut client = h.connect();

    h.send(
        &mut client,
        json!({
            "event": "send_message",
            "data": { "conversation_id": Uuid::new_v4(), "content": "hi" }
        }),
    )
    .await;
    client.expect_error(ErrorKind::NotAuthenticated);

    h.send(
        &mut client,
        json!({ "event": "login", "data": { "email": "nobody@example.com", "password": "password123" } }),
    )
    .await;
    match client.next() {
        ServerEvent::AuthError { kind, .. } => assert_eq!(kind, ErrorKind::InvalidCredentials),
        other => panic!("expected auth_error, got {:?}", other),
    }
    assert_eq!(client.connection.state(), &ConnectionState::Connected);

    h.gateway.handle_frame(&mut client.connection, "{not json").await;
    client.expect_error(ErrorKind::BadRequest);
    assert!(!client.connection.is_closed());
}

#[tokio::test]
async fn login_and_session_resume_bind_the_connection() {
    let h = harness();
    let (_first, user_id, session_id) = h.register("Carol").await;

    let mut laptop = h.connect();
    h.send(
        &mut laptop,
        json!({
            "event": "login",
            "data": { "email": "CAROL@example.com", "password": "password123", "device_info": "laptop" }
        }),
    )
    .await;
    let laptop_session = match laptop.next() {
        ServerEvent::AuthSuccess { user, session_id } => {
            assert_eq!(user.id, user_id);
            session_id
        }
        other => panic!("expected auth_success, got {:?}", other),
    };
    assert_ne!(laptop_session, session_id);

    let mut phone = h.connect();
    h.send(
        &mut phone,
        json!({ "event": "authenticate", "data": { "session_id": session_id } }),
    )
    .await;
    assert!(matches!(phone.next(), ServerEvent::AuthSuccess { .. }));
    assert_eq!(h.gateway.registry().connections_for(user_id).len(), 3);
    assert_eq!(
        h.gateway.sessions().active_sessions_for(user_id).await.unwrap().len(),
        2
    );

    h.send(&mut phone, json!({ "event": "logout" })).await;
    assert!(matches!(phone.next(), ServerEvent::LogoutSuccess));
    assert!(!phone.connection.is_authenticated());
    assert_eq!(h.gateway.registry().connections_for(user_id).len(), 2);

    let mut tablet = h.connect();
    h.send(
        &mut tablet,
        json!({ "event": "authenticate", "data": { "session_id": session_id } }),
    )
    .await;
    match tablet.next() {
        ServerEvent::AuthError { kind, .. } => assert_eq!(kind, ErrorKind::NotAuthenticated),
        other => panic!("expected auth_error, got {:?}", other),
    }
}

#[tokio::test]
async fn duplicate_registration_is_a_conflict() {
    let h = harness();
    let _ = h.register("Dave").await;

    let mut client = h.connect();
    h.send(
        &mut client,
        json!({
            "event": "register",
            "data": {
                "first_name": "Dave",
                "last_name": "Again",
                "email": "dave@example.com",
                "password": "password123"
            }
        }),
    )
    .await;
    match client.next() {
        ServerEvent::AuthError { kind, .. } => assert_eq!(kind, ErrorKind::Conflict),
        other => panic!("expected auth_error, got {:?}", other),
    }
}

#[tokio::test]
async fn every_device_of_a_participant_receives_messages() {
    let h = harness();
    let (mut alice, _, alice_session) = h.register("Alice").await;
    let (mut bob, bob_id, _) = h.register("Bob").await;

    let mut alice_phone = h.connect();
    h.send(
        &mut alice_phone,
        json!({ "event": "authenticate", "data": { "session_id": alice_session } }),
    )
    .await;
    alice_phone.drain();

    let conversation_id = h.create_direct(&mut alice, bob_id).await;
    alice_phone.drain();
    bob.drain();

    h.send(
        &mut bob,
        json!({
            "event": "send_message",
            "data": { "conversation_id": conversation_id, "content": "to both" }
        }),
    )
    .await;

    for device in [&mut alice, &mut alice_phone] {
        match device.next() {
            ServerEvent::NewMessage { message } => assert_eq!(message.content, "to both"),
            other => panic!("expected new_message, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn non_participants_cannot_post() {
    let h = harness();
    let (mut alice, _, _) = h.register("Alice").await;
    let (mut bob, bob_id, _) = h.register("Bob").await;
    let (mut eve, _, _) = h.register("Eve").await;

    let conversation_id = h.create_direct(&mut alice, bob_id).await;
    bob.drain();

    h.send(
        &mut eve,
        json!({
            "event": "send_message",
            "data": { "conversation_id": conversation_id, "content": "let me in" }
        }),
    )
    .await;
    eve.expect_error(ErrorKind::Forbidden);
    assert!(alice.drain().is_empty());
    assert!(bob.drain().is_empty());

    h.send(
        &mut alice,
        json!({ "event": "get_messages", "data": { "conversation_id": conversation_id } }),
    )
    .await;
    match alice.next() {
        ServerEvent::MessagesList { messages, .. } => assert!(messages.is_empty()),
        other => panic!("expected messages_list, got {:?}", other),
    }
}

#[tokio::test]
async fn mark_read_only_counts_messages_from_others() {
    let h = harness();
    let (mut alice, _, _) = h.register("Alice").await;
    let (mut bob, bob_id, _) = h.register("Bob").await;
    let conversation_id = h.create_direct(&mut alice, bob_id).await;

    for (client, count) in [(&mut bob, 5), (&mut alice, 2)] {
        for i in 0..count {
            h.send(
                client,
                json!({
                    "event": "send_message",
                    "data": { "conversation_id": conversation_id, "content": format!("m{}", i) }
                }),
            )
            .await;
        }
    }
    alice.drain();
    bob.drain();

    h.send(&mut alice, json!({ "event": "get_unread_counts" })).await;
    match alice.next() {
        ServerEvent::UnreadCounts { counts } => {
            assert_eq!(counts.len(), 1);
            assert_eq!(counts[0].count, 5);
        }
        other => panic!("expected unread_counts, got {:?}", other),
    }

    h.send(
        &mut alice,
        json!({ "event": "mark_read", "data": { "conversation_id": conversation_id } }),
    )
    .await;
    match bob.next() {
        ServerEvent::MessagesRead { count, .. } => assert_eq!(count, 5),
        other => panic!("expected messages_read, got {:?}", other),
    }
    alice.drain();

    h.send(&mut bob, json!({ "event": "get_unread_counts" })).await;
    match bob.next() {
        ServerEvent::UnreadCounts { counts } => assert_eq!(counts[0].count, 2),
        other => panic!("expected unread_counts, got {:?}", other),
    }
}

#[tokio::test]
async fn abrupt_disconnect_unbinds_and_cleans_up() {
    let h = harness();
    let (mut alice, alice_id, alice_session) = h.register("Alice").await;
    let (mut bob, bob_id, _) = h.register("Bob").await;
    let conversation_id = h.create_direct(&mut alice, bob_id).await;
    bob.drain();

    let mut alice_phone = h.connect();
    h.send(
        &mut alice_phone,
        json!({ "event": "authenticate", "data": { "session_id": alice_session } }),
    )
    .await;
    alice_phone.drain();

    let upload_dir = h.uploads.path().join(alice_id.to_string());
    std::fs::create_dir_all(&upload_dir).unwrap();

    let closed_id = alice.connection.id();
    h.gateway.close(&mut alice.connection).await;
    h.gateway.close(&mut alice.connection).await;

    let remaining = h.gateway.registry().connections_for(alice_id);
    assert_eq!(remaining.len(), 1);
    assert!(remaining.iter().all(|handle| handle.id() != closed_id));
    assert!(upload_dir.exists(), "another device is still online");

    h.send(
        &mut bob,
        json!({
            "event": "send_message",
            "data": { "conversation_id": conversation_id, "content": "are you there" }
        }),
    )
    .await;
    assert!(alice.drain().is_empty());
    assert!(matches!(alice_phone.next(), ServerEvent::NewMessage { .. }));

    h.gateway.close(&mut alice_phone.connection).await;
    assert!(!h.gateway.registry().is_online(alice_id));
    assert!(!upload_dir.exists());
}

#[tokio::test]
async fn creating_a_direct_conversation_twice_returns_the_same_one() {
    let h = harness();
    let (mut alice, alice_id, _) = h.register("Alice").await;
    let (mut bob, bob_id, _) = h.register("Bob").await;

    let first = h.create_direct(&mut alice, bob_id).await;
    bob.drain();
    let second = h.create_direct(&mut bob, alice_id).await;
    assert_eq!(first, second);
    assert!(alice.drain().is_empty(), "an existing conversation is not re-announced");
}

#[tokio::test]
async fn removed_participants_are_told_and_typing_skips_the_typist() {
    let h = harness();
    let (mut alice, _, _) = h.register("Alice").await;
    let (mut bob, bob_id, _) = h.register("Bob").await;
    let (mut carol, carol_id, _) = h.register("Carol").await;

    h.send(
        &mut alice,
        json!({
            "event": "create_conversation",
            "data": { "participant_ids": [bob_id, carol_id], "name": "Trio", "is_group": true }
        }),
    )
    .await;
    let group_id = match alice.next() {
        ServerEvent::ConversationCreated { conversation } => conversation.id,
        other => panic!("expected conversation_created, got {:?}", other),
    };
    bob.drain();
    carol.drain();

    h.send(
        &mut carol,
        json!({ "event": "typing", "data": { "conversation_id": group_id } }),
    )
    .await;
    assert!(carol.drain().is_empty());
    assert!(matches!(alice.next(), ServerEvent::UserTyping { .. }));
    assert!(matches!(bob.next(), ServerEvent::UserTyping { .. }));

    h.send(
        &mut alice,
        json!({
            "event": "remove_participant",
            "data": { "conversation_id": group_id, "user_id": carol_id }
        }),
    )
    .await;
    match carol.next() {
        ServerEvent::ParticipantsChanged {
            participants,
            removed,
            ..
        } => {
            assert_eq!(removed, Some(carol_id));
            assert!(!participants.contains(&carol_id));
        }
        other => panic!("expected participants_changed, got {:?}", other),
    }
    alice.drain();
    bob.drain();

    h.send(
        &mut carol,
        json!({
            "event": "send_message",
            "data": { "conversation_id": group_id, "content": "still here?" }
        }),
    )
    .await;
    carol.expect_error(ErrorKind::Forbidden);

    h.send(
        &mut bob,
        json!({ "event": "leave_conversation", "data": { "conversation_id": group_id } }),
    )
    .await;
    assert!(matches!(bob.next(), ServerEvent::ParticipantsChanged { .. }));
    assert!(matches!(alice.next(), ServerEvent::ParticipantsChanged { .. }));
    assert!(carol.drain().is_empty());
}

#[tokio::test]
async fn conversation_list_reports_last_message_and_unread() {
    let h = harness();
    let (mut alice, _, _) = h.register("Alice").await;
    let (mut bob, bob_id, _) = h.register("Bob").await;
    let conversation_id = h.create_direct(&mut alice, bob_id).await;

    h.send(
        &mut bob,
        json!({
            "event": "send_message",
            "data": { "conversation_id": conversation_id, "content": "ping" }
        }),
    )
    .await;
    alice.drain();

    h.send(&mut alice, json!({ "event": "get_conversations" })).await;
    match alice.next() {
        ServerEvent::ConversationsList { conversations } => {
            assert_eq!(conversations.len(), 1);
            let overview = &conversations[0];
            assert_eq!(overview.conversation.id, conversation_id);
            assert_eq!(overview.unread_count, 1);
            assert_eq!(
                overview.last_message.as_ref().map(|m| m.content.as_str()),
                Some("ping")
            );
            assert_eq!(overview.members.len(), 2);
        }
        other => panic!("expected conversations_list, got {:?}", other),
    }
}

#[tokio::test]
async fn notifications_reach_every_device_of_one_user() {
    let h = harness();
    let (mut alice, alice_id, alice_session) = h.register("Alice").await;
    let (mut bob, _, _) = h.register("Bob").await;
    let mut alice_phone = h.connect();
    h.send(
        &mut alice_phone,
        json!({ "event": "authenticate", "data": { "session_id": alice_session } }),
    )
    .await;
    alice_phone.drain();

    let payload = json!({ "title": "Upload finished" });
    assert_eq!(h.gateway.notify_user(alice_id, payload.clone()), 2);

    for client in [&mut alice, &mut alice_phone] {
        match client.next() {
            ServerEvent::Notification(data) => assert_eq!(data, payload),
            other => panic!("expected notification, got {:?}", other),
        }
    }
    assert!(bob.drain().is_empty());
}

#[tokio::test]
async fn notifying_an_offline_user_reaches_nobody() {
    let h = harness();
    let (mut alice, alice_id, _) = h.register("Alice").await;
    h.gateway.close(&mut alice.connection).await;

    assert_eq!(h.gateway.notify_user(alice_id, json!({ "title": "hi" })), 0);
    assert_eq!(h.gateway.notify_user(Uuid::new_v4(), json!(null)), 0);
    assert!(alice.drain().is_empty());
}

#[tokio::test]
async fn updates_reach_every_authenticated_connection() {
    let h = harness();
    let (mut alice, _, alice_session) = h.register("Alice").await;
    let (mut bob, _, _) = h.register("Bob").await;
    let mut alice_phone = h.connect();
    h.send(
        &mut alice_phone,
        json!({ "event": "authenticate", "data": { "session_id": alice_session } }),
    )
    .await;
    alice_phone.drain();
    let mut anonymous = h.connect();

    assert_eq!(h.gateway.broadcast_update(json!({ "maintenance": true })), 3);
    for client in [&mut alice, &mut alice_phone, &mut bob] {
        assert!(matches!(client.next(), ServerEvent::Update(_)));
    }
    assert!(anonymous.drain().is_empty());
}

#[tokio::test]
async fn switching_user_on_a_connection_cleans_up_the_previous_one() {
    let h = harness();
    let (mut shared, alice_id, _) = h.register("Alice").await;
    let (_bob, _, bob_session) = h.register("Bob").await;
    let upload_dir = h.uploads.path().join(alice_id.to_string());
    std::fs::create_dir_all(&upload_dir).unwrap();

    h.send(
        &mut shared,
        json!({ "event": "authenticate", "data": { "session_id": bob_session } }),
    )
    .await;
    assert!(matches!(shared.next(), ServerEvent::AuthSuccess { .. }));

    assert!(!h.gateway.registry().is_online(alice_id));
    assert!(!upload_dir.exists());
}

#[tokio::test]
async fn switching_user_keeps_files_while_another_device_is_online() {
    let h = harness();
    let (mut shared, alice_id, alice_session) = h.register("Alice").await;
    let (_bob, _, bob_session) = h.register("Bob").await;
    let mut alice_phone = h.connect();
    h.send(
        &mut alice_phone,
        json!({ "event": "authenticate", "data": { "session_id": alice_session } }),
    )
    .await;
    let upload_dir = h.uploads.path().join(alice_id.to_string());
    std::fs::create_dir_all(&upload_dir).unwrap();

    h.send(
        &mut shared,
        json!({ "event": "authenticate", "data": { "session_id": bob_session } }),
    )
    .await;

    assert!(h.gateway.registry().is_online(alice_id));
    assert!(upload_dir.exists());
}
