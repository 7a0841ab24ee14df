mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use quill_client::channel::{ChannelStatus, CollabEvent, CollaborationChannel};
use quill_client::color::user_color;
use quill_client::{AppContext, AuthUser, ClientConfig};
use quill_realtime::Dispatcher;
use quill_types::events::{DOCUMENT_SAVED_EVENT, document_topic};
use quill_types::models::{ChatRole, CursorRect};

use common::{FakeBackend, ME, hub_link, next_matching};

fn user(email: &str) -> AuthUser {
    AuthUser {
        id: Uuid::new_v4(),
        email: email.into(),
    }
}

fn rect(x: f64) -> CursorRect {
    CursorRect {
        x,
        y: 10.0,
        width: 2.0,
        height: 18.0,
    }
}

struct Peer {
    user: AuthUser,
    channel: CollaborationChannel,
    events: quill_client::Subscription,
}

async fn join_pair(hub: &Dispatcher, doc: Uuid) -> (Peer, Peer) {
    let mut peers = Vec::new();
    for email in ["alice@example.com", "bob@example.com"] {
        let user = user(email);
        let channel = CollaborationChannel::new(hub_link(hub, user.id).await);
        let events = channel.subscribe();
        channel.join(Some(doc), Some(&user)).unwrap();
        peers.push(Peer { user, channel, events });
    }
    for peer in &mut peers {
        next_matching(&mut peer.events, |e| matches!(e, CollabEvent::OnlineUsers(users) if users.len() == 2)).await;
    }
    let bob = peers.pop().unwrap();
    let alice = peers.pop().unwrap();
    (alice, bob)
}

#[tokio::test]
async fn each_client_sees_one_cursor_per_remote_user_and_never_its_own() {
    let hub = Dispatcher::new();
    let doc = Uuid::new_v4();
    let (mut alice, mut bob) = join_pair(&hub, doc).await;

    for x in [1.0, 2.0, 3.0] {
        alice.channel.send_cursor(rect(x)).unwrap();
    }
    bob.channel.send_cursor(rect(7.0)).unwrap();

    next_matching(&mut bob.events, |e| matches!(e, CollabEvent::RemoteCursor(c) if c.rect.x == 3.0)).await;
    next_matching(&mut alice.events, |e| matches!(e, CollabEvent::RemoteCursor(_))).await;

    let seen_by_bob = bob.channel.remote_cursors();
    assert_eq!(seen_by_bob.len(), 1);
    assert_eq!(seen_by_bob[0].user_id, alice.user.id);
    assert_eq!(seen_by_bob[0].rect.x, 3.0);
    assert_eq!(seen_by_bob[0].color, user_color(alice.user.id));

    let seen_by_alice = alice.channel.remote_cursors();
    assert_eq!(seen_by_alice.len(), 1);
    assert_eq!(seen_by_alice[0].user_id, bob.user.id);
}

#[tokio::test]
async fn chat_reaches_the_other_member_once() {
    let hub = Dispatcher::new();
    let doc = Uuid::new_v4();
    let (mut alice, mut bob) = join_pair(&hub, doc).await;

    let sent = alice.channel.send_chat("hello bob", ChatRole::User).unwrap();
    let echoed = next_matching(&mut alice.events, |e| matches!(e, CollabEvent::Chat(_))).await;
    assert_eq!(echoed, CollabEvent::Chat(sent.clone()));

    let received = next_matching(&mut bob.events, |e| matches!(e, CollabEvent::Chat(_))).await;
    assert_eq!(received, CollabEvent::Chat(sent));

    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Some(event) = alice.events.try_recv() {
        assert!(!matches!(event, CollabEvent::Chat(_)), "own broadcast came back: {:?}", event);
    }
}

#[tokio::test]
async fn leaving_prunes_presence_and_cursors() {
    let hub = Dispatcher::new();
    let doc = Uuid::new_v4();
    let (mut alice, bob) = join_pair(&hub, doc).await;

    bob.channel.send_cursor(rect(4.0)).unwrap();
    next_matching(&mut alice.events, |e| matches!(e, CollabEvent::RemoteCursor(_))).await;
    assert_eq!(alice.channel.remote_cursors().len(), 1);

    bob.channel.leave();
    bob.channel.leave();
    let event = next_matching(&mut alice.events, |e| matches!(e, CollabEvent::OnlineUsers(u) if u.len() == 1)).await;
    match event {
        CollabEvent::OnlineUsers(users) => assert_eq!(users[0].user_id, alice.user.id),
        other => panic!("unexpected {:?}", other),
    }
    assert!(alice.channel.remote_cursors().is_empty());
    assert_eq!(bob.channel.status(), ChannelStatus::Idle);
}

#[tokio::test]
async fn saves_by_others_are_surfaced() {
    let hub = Dispatcher::new();
    let doc = Uuid::new_v4();
    let (mut alice, mut bob) = join_pair(&hub, doc).await;

    hub.publish(
        &document_topic(doc),
        DOCUMENT_SAVED_EVENT,
        json!({"document_id": doc, "version": 5, "updated_at": "2024-05-01T12:00:00Z", "saved_by": bob.user.id}),
    )
    .await;

    let event = next_matching(&mut alice.events, |e| matches!(e, CollabEvent::DocumentSaved { .. })).await;
    assert_eq!(
        event,
        CollabEvent::DocumentSaved {
            version: 5,
            saved_by: bob.user.id
        }
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Some(event) = bob.events.try_recv() {
        assert!(!matches!(event, CollabEvent::DocumentSaved { .. }));
    }
}

#[tokio::test]
async fn context_joins_open_document_and_records_chat() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new());
    let doc = backend.add_owned("Shared notes", 0);
    let config = ClientConfig {
        chat_log_dir: dir.path().to_path_buf(),
        ..ClientConfig::default()
    };
    let ctx = AppContext::with_backend(config, backend.clone());

    let me = ctx.sign_in(ME, "password").await.unwrap();
    assert_eq!(ctx.cache().documents().len(), 1);

    let hub = Dispatcher::new();
    ctx.attach_channel(hub_link(&hub, me.id).await).await;
    let mut events = ctx.subscribe().await.unwrap();

    let opened = ctx.open_document(doc.id).await.unwrap();
    assert_eq!(opened.title, "Shared notes");
    assert_eq!(ctx.current_document(), Some(doc.id));
    next_matching(&mut events, |e| matches!(e, CollabEvent::OnlineUsers(u) if u.len() == 1)).await;
    assert_eq!(hub.presence_state(&document_topic(doc.id)).await.len(), 1);

    ctx.send_chat("note to self", ChatRole::User).await.unwrap();
    let mut history = Vec::new();
    for _ in 0..40 {
        history = ctx.chat_history().await.unwrap();
        if !history.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].text, "note to self");

    ctx.close_document().await;
    assert_eq!(ctx.current_document(), None);
    next_matching(&mut events, |e| *e == CollabEvent::StatusChanged(ChannelStatus::Idle)).await;

    ctx.sign_out().await;
    assert!(ctx.session().get().is_none());
    assert!(ctx.cache().documents().is_empty());
}
