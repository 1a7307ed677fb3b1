//! Discord gateway client (v10, JSON encoding).
//!
//! Maintains the websocket session that delivers inbound events: identify
//! with message + reaction intents, heartbeat at the interval the server
//! dictates, and forward the dispatches the bot cares about as typed
//! [`GatewayEvent`]s over a channel. The connection is re-established with
//! exponential backoff whenever it drops; the task exits once the event
//! receiver is gone.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::discord::{Attachment, Emoji, User};
use crate::error::{AdapterError, Result};

/// Gateway endpoint, as also returned by `GET /gateway`.
const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// GUILD_MESSAGES | GUILD_MESSAGE_REACTIONS | MESSAGE_CONTENT.
const INTENTS: u64 = (1 << 9) | (1 << 10) | (1 << 15);

/// Seconds to wait for the websocket handshake.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Reconnect backoff bounds.
const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

// ═══════════════════════════════════════════════════════════════════════
//  Event types
// ═══════════════════════════════════════════════════════════════════════

/// A message delivered by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub content: String,
    pub author: User,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// A reaction added to or removed from a message.
#[derive(Debug, Clone, Deserialize)]
pub struct ReactionEvent {
    pub user_id: String,
    pub channel_id: String,
    pub message_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    pub emoji: Emoji,
}

/// Events surfaced to the bot. Everything else the gateway sends is
/// consumed internally or ignored.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Session established; carries the bot's own user.
    Ready { user: User },
    MessageCreate(IncomingMessage),
    ReactionAdd(ReactionEvent),
    ReactionRemove(ReactionEvent),
}

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
    #[serde(default)]
    d: Value,
}

// ═══════════════════════════════════════════════════════════════════════
//  Gateway
// ═══════════════════════════════════════════════════════════════════════

/// Owns the gateway connection lifecycle.
pub struct Gateway {
    token: String,
}

impl Gateway {
    /// Create a gateway client with the given bot token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Spawn the connection task. Events arrive on the returned receiver;
    /// dropping it shuts the task down after the current session ends.
    pub fn spawn(self) -> (mpsc::Receiver<GatewayEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(256);
        let handle = tokio::spawn(async move {
            let mut backoff = BACKOFF_INITIAL;
            loop {
                match self.session(&tx).await {
                    Ok(()) => {
                        // Server asked for a clean reconnect.
                        backoff = BACKOFF_INITIAL;
                    }
                    Err(error) => {
                        warn!(%error, "gateway session failed");
                    }
                }
                if tx.is_closed() {
                    info!("gateway receiver dropped, stopping");
                    return;
                }
                debug!(delay_secs = backoff.as_secs(), "reconnecting to gateway");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(BACKOFF_MAX);
            }
        });
        (rx, handle)
    }

    /// Run one gateway session to completion.
    ///
    /// Returns `Ok(())` when the server requests a reconnect (opcodes 7
    /// and 9) and an error for every other termination.
    async fn session(&self, tx: &mpsc::Sender<GatewayEvent>) -> Result<()> {
        let (ws, _response) = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            connect_async(GATEWAY_URL),
        )
        .await
        .map_err(|_| AdapterError::Timeout {
            seconds: CONNECT_TIMEOUT_SECS,
            reason: "gateway websocket handshake".to_string(),
        })?
        .map_err(|err| AdapterError::Gateway(format!("connect failed: {err}")))?;

        let (mut sink, mut stream) = ws.split();

        // The first frame must be HELLO with our heartbeat interval.
        let hello = Self::next_payload(&mut stream).await?;
        if hello.op != 10 {
            return Err(AdapterError::Gateway(format!(
                "expected HELLO, got opcode {}",
                hello.op
            )));
        }
        let heartbeat_ms = hello
            .d
            .get("heartbeat_interval")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| AdapterError::Gateway("HELLO missing heartbeat_interval".into()))?;

        let identify = json!({
            "op": 2,
            "d": {
                "token": self.token,
                "intents": INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "quoteboard",
                    "device": "quoteboard",
                },
            },
        });
        sink.send(WsMessage::Text(identify.to_string().into()))
            .await
            .map_err(|err| AdapterError::Gateway(format!("identify failed: {err}")))?;

        info!(heartbeat_ms, "gateway session opened");

        let mut heartbeat = tokio::time::interval(Duration::from_millis(heartbeat_ms));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await;

        let mut last_seq: Option<u64> = None;
        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let beat = json!({ "op": 1, "d": last_seq });
                    sink.send(WsMessage::Text(beat.to_string().into()))
                        .await
                        .map_err(|err| AdapterError::Gateway(format!("heartbeat failed: {err}")))?;
                }
                frame = stream.next() => {
                    let frame = frame
                        .ok_or_else(|| AdapterError::Gateway("stream ended".into()))?
                        .map_err(|err| AdapterError::Gateway(format!("receive error: {err}")))?;

                    match frame {
                        WsMessage::Text(text) => {
                            let payload: GatewayPayload = serde_json::from_str(&text)?;
                            if let Some(seq) = payload.s {
                                last_seq = Some(seq);
                            }
                            match payload.op {
                                // Dispatch.
                                0 => Self::dispatch(payload, tx).await,
                                // Server-initiated heartbeat request.
                                1 => {
                                    let beat = json!({ "op": 1, "d": last_seq });
                                    sink.send(WsMessage::Text(beat.to_string().into()))
                                        .await
                                        .map_err(|err| AdapterError::Gateway(
                                            format!("heartbeat failed: {err}"),
                                        ))?;
                                }
                                // Reconnect / invalid session: start over.
                                7 | 9 => {
                                    info!(opcode = payload.op, "gateway requested reconnect");
                                    return Ok(());
                                }
                                // Heartbeat ACK and anything unknown.
                                _ => {}
                            }
                        }
                        WsMessage::Ping(data) => {
                            let _ = sink.send(WsMessage::Pong(data)).await;
                        }
                        WsMessage::Close(close_frame) => {
                            return Err(AdapterError::Gateway(format!(
                                "connection closed: {close_frame:?}"
                            )));
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Forward a dispatch payload as a typed event, dropping types the
    /// bot does not handle and logging payloads that fail to decode.
    async fn dispatch(payload: GatewayPayload, tx: &mpsc::Sender<GatewayEvent>) {
        let Some(kind) = payload.t.as_deref() else {
            return;
        };

        let event = match kind {
            "READY" => payload
                .d
                .get("user")
                .cloned()
                .and_then(|user| serde_json::from_value::<User>(user).ok())
                .map(|user| GatewayEvent::Ready { user }),
            "MESSAGE_CREATE" => serde_json::from_value::<IncomingMessage>(payload.d)
                .map(GatewayEvent::MessageCreate)
                .ok(),
            "MESSAGE_REACTION_ADD" => serde_json::from_value::<ReactionEvent>(payload.d)
                .map(GatewayEvent::ReactionAdd)
                .ok(),
            "MESSAGE_REACTION_REMOVE" => serde_json::from_value::<ReactionEvent>(payload.d)
                .map(GatewayEvent::ReactionRemove)
                .ok(),
            _ => None,
        };

        match event {
            Some(event) => {
                if tx.send(event).await.is_err() {
                    debug!("event receiver dropped");
                }
            }
            None if matches!(
                kind,
                "MESSAGE_CREATE" | "MESSAGE_REACTION_ADD" | "MESSAGE_REACTION_REMOVE" | "READY"
            ) =>
            {
                warn!(kind, "failed to decode dispatch payload");
            }
            None => {}
        }
    }

    async fn next_payload<S>(stream: &mut S) -> Result<GatewayPayload>
    where
        S: futures::Stream<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            let frame = stream
                .next()
                .await
                .ok_or_else(|| AdapterError::Gateway("stream ended before HELLO".into()))?
                .map_err(|err| AdapterError::Gateway(format!("receive error: {err}")))?;
            match frame {
                WsMessage::Text(text) => return Ok(serde_json::from_str(&text)?),
                WsMessage::Close(close_frame) => {
                    return Err(AdapterError::Gateway(format!(
                        "closed before HELLO: {close_frame:?}"
                    )));
                }
                // Skip ping/pong/binary noise before the first payload.
                _ => {}
            }
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intents_cover_messages_and_reactions() {
        // GUILD_MESSAGES, GUILD_MESSAGE_REACTIONS, MESSAGE_CONTENT.
        assert_ne!(INTENTS & (1 << 9), 0);
        assert_ne!(INTENTS & (1 << 10), 0);
        assert_ne!(INTENTS & (1 << 15), 0);
    }

    #[test]
    fn payload_decodes_without_optional_fields() {
        let payload: GatewayPayload = serde_json::from_str(r#"{"op": 11}"#).unwrap();
        assert_eq!(payload.op, 11);
        assert!(payload.s.is_none());
        assert!(payload.t.is_none());
    }

    #[test]
    fn message_create_payload_decodes() {
        let body = r#"{
            "id": "5",
            "channel_id": "6",
            "guild_id": "7",
            "content": "!quote",
            "author": {"id": "8", "username": "alice"}
        }"#;
        let message: IncomingMessage = serde_json::from_str(body).unwrap();
        assert_eq!(message.guild_id.as_deref(), Some("7"));
        assert_eq!(message.content, "!quote");
    }

    #[test]
    fn reaction_payload_decodes() {
        let body = r#"{
            "user_id": "1",
            "channel_id": "2",
            "message_id": "3",
            "guild_id": "4",
            "emoji": {"name": "💬"}
        }"#;
        let reaction: ReactionEvent = serde_json::from_str(body).unwrap();
        assert_eq!(reaction.emoji.name.as_deref(), Some("💬"));
    }
}
