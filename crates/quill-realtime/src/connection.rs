use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use quill_db::Database;
use quill_types::api::Claims;
use quill_types::events::{RealtimeCommand, RealtimeEvent, parse_document_topic};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Time a fresh socket has to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity of an authenticated gateway connection.
#[derive(Debug, Clone)]
struct Identity {
    user_id: Uuid,
    email: String,
}

/// Handle a single WebSocket connection: Identify handshake, Ready, then the
/// command/event loop until either side goes away.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, db: Arc<Database>, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let identity = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(identity) => identity,
        None => {
            warn!("Gateway client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", identity.email, identity.user_id);

    let ready = RealtimeEvent::Ready {
        user_id: identity.user_id,
        email: identity.email.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, db, identity).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    identity: Identity,
) {
    let (conn_id, mut events_rx) = dispatcher.register_connection(identity.user_id).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward hub events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_dispatcher = dispatcher.clone();
    let recv_identity = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<RealtimeCommand>(&text) {
                    Ok(cmd) => handle_command(&recv_dispatcher, &db, conn_id, &recv_identity, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_identity.email,
                            recv_identity.user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister_connection(conn_id).await;
    info!("{} ({}) disconnected from gateway", identity.email, identity.user_id);
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &RealtimeEvent) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|e| warn!("Failed to encode event: {}", e))?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<Identity> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(RealtimeCommand::Identify { token }) = serde_json::from_str::<RealtimeCommand>(&text) {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(Identity {
                        user_id: token_data.claims.sub,
                        email: token_data.claims.email,
                    });
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await.ok().flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    conn_id: Uuid,
    identity: &Identity,
    cmd: RealtimeCommand,
) {
    match cmd {
        RealtimeCommand::Identify { .. } => {} // Already handled

        RealtimeCommand::Join { topic } => {
            match authorize_topic(db, &topic, identity).await {
                Ok(()) => {
                    info!("{} ({}) joined {}", identity.email, identity.user_id, topic);
                    dispatcher.join(conn_id, &topic).await;
                }
                Err(reason) => {
                    warn!("{} ({}) refused {}: {}", identity.email, identity.user_id, topic, reason);
                    dispatcher
                        .send_to(conn_id, RealtimeEvent::SubscribeFailed { topic, reason: reason.to_string() })
                        .await;
                }
            }
        }

        RealtimeCommand::Leave { topic } => {
            debug!("{} ({}) left {}", identity.email, identity.user_id, topic);
            dispatcher.leave(conn_id, &topic).await;
        }

        RealtimeCommand::Track { topic, payload } => {
            dispatcher.track(conn_id, &topic, payload).await;
        }

        RealtimeCommand::Broadcast { topic, event, payload } => {
            trace!("{} ({}) broadcast {} on {}", identity.email, identity.user_id, event, topic);
            dispatcher.broadcast_from(conn_id, &topic, event, payload).await;
        }
    }
}

/// Only document topics exist, and joining one requires read access.
async fn authorize_topic(db: &Arc<Database>, topic: &str, identity: &Identity) -> Result<(), &'static str> {
    let document_id = parse_document_topic(topic).ok_or("unknown topic")?;

    let db = db.clone();
    let user_id = identity.user_id.to_string();
    let email = identity.email.clone();
    let access = tokio::task::spawn_blocking(move || {
        db.document_access(&document_id.to_string(), &user_id, &email)
    })
    .await
    .map_err(|_| "internal error")?
    .map_err(|e| {
        warn!("Access check failed for {}: {}", topic, e);
        "internal error"
    })?;

    access.map(|_| ()).ok_or("document not found or access denied")
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_types::models::Role;

    fn identity(email: &str) -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
        }
    }

    #[tokio::test]
    async fn topic_authorization() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let owner = identity("owner@example.com");
        let guest = identity("guest@example.com");
        let stranger = identity("stranger@example.com");
        db.create_user(&owner.user_id.to_string(), &owner.email, "hash").unwrap();

        let doc_id = Uuid::new_v4();
        db.create_document(&doc_id.to_string(), &owner.user_id.to_string(), "Doc", "")
            .unwrap();
        db.upsert_permission(&Uuid::new_v4().to_string(), &doc_id.to_string(), &guest.email, Role::Viewer)
            .unwrap();
        let topic = quill_types::events::document_topic(doc_id);

        assert!(authorize_topic(&db, &topic, &owner).await.is_ok());
        assert!(authorize_topic(&db, &topic, &guest).await.is_ok());
        assert_eq!(
            authorize_topic(&db, &topic, &stranger).await,
            Err("document not found or access denied")
        );
        assert_eq!(authorize_topic(&db, "lobby", &owner).await, Err("unknown topic"));
    }
}
