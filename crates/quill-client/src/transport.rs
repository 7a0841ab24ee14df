//! WebSocket link to the realtime gateway.
//!
//! After the handshake the socket is split into a writer task draining
//! [`RealtimeLink::commands`] and a reader task feeding
//! [`RealtimeLink::events`]. Dropping the command sender closes the socket.

use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use quill_types::events::{RealtimeCommand, RealtimeEvent};

use crate::error::{ClientError, Result};
use crate::session::AuthUser;

const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Both directions of a gateway connection as plain channels.
pub struct RealtimeLink {
    pub commands: mpsc::UnboundedSender<RealtimeCommand>,
    pub events: mpsc::UnboundedReceiver<RealtimeEvent>,
}

impl RealtimeLink {
    /// Channel pairs for driving a link by hand: the returned sender and
    /// receiver play the server side.
    pub fn pair() -> (
        Self,
        mpsc::UnboundedReceiver<RealtimeCommand>,
        mpsc::UnboundedSender<RealtimeEvent>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                commands: cmd_tx,
                events: event_rx,
            },
            cmd_rx,
            event_tx,
        )
    }
}

fn ws_url(gateway_url: &str) -> String {
    gateway_url.replace("http://", "ws://").replace("https://", "wss://")
}

fn realtime_err(context: &str, e: impl std::fmt::Display) -> ClientError {
    ClientError::Realtime(format!("{}: {}", context, e))
}

async fn wait_for_ready<S>(ws_rx: &mut S) -> Result<AuthUser>
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    while let Some(msg) = ws_rx.next().await {
        match msg.map_err(|e| realtime_err("gateway read failed", e))? {
            Message::Text(text) => match serde_json::from_str::<RealtimeEvent>(text.as_str())? {
                RealtimeEvent::Ready { user_id, email } => return Ok(AuthUser { id: user_id, email }),
                other => debug!("Ignoring {:?} before ready", other),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(ClientError::Realtime("gateway closed before ready".into()))
}

/// Open the gateway, identify with `token` and wait for `Ready`.
pub async fn connect(gateway_url: &str, token: &str) -> Result<(RealtimeLink, AuthUser)> {
    let url = ws_url(gateway_url);
    let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| realtime_err("gateway connect failed", e))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let identify = serde_json::to_string(&RealtimeCommand::Identify {
        token: token.to_string(),
    })?;
    ws_tx
        .send(Message::text(identify))
        .await
        .map_err(|e| realtime_err("identify failed", e))?;

    let user = tokio::time::timeout(READY_TIMEOUT, wait_for_ready(&mut ws_rx))
        .await
        .map_err(|_| ClientError::Realtime("timed out waiting for gateway".into()))??;
    info!("Realtime gateway ready for {}", user.email);

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<RealtimeCommand>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<RealtimeEvent>();

    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            let json = match serde_json::to_string(&cmd) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to encode {:?}: {}", cmd, e);
                    continue;
                }
            };
            if ws_tx.send(Message::text(json)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
        debug!("Realtime writer stopped");
    });

    tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Realtime read error: {}", e);
                    break;
                }
            };
            match msg {
                Message::Text(text) => match serde_json::from_str::<RealtimeEvent>(text.as_str()) {
                    Ok(event) => {
                        if event_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Undecodable gateway frame: {}", e),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        debug!("Realtime reader stopped");
    });

    Ok((
        RealtimeLink {
            commands: cmd_tx,
            events: event_rx,
        },
        user,
    ))
}
