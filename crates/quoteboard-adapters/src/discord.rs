//! Discord REST client (Bot API v10).
//!
//! Covers the calls the bot actually makes: sending and deleting channel
//! messages, fetching a single message with its reactions, pinning,
//! uploading a text file, and resolving users for live mention rendering.
//! Replies that should not clutter a channel go through
//! [`DiscordClient::send_self_destructing`], which deletes its own message
//! after a delay.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::{AdapterError, Result};

/// Discord API v10 base URL.
const API_BASE_URL: &str = "https://discord.com/api/v10";

/// Environment variable holding the bot token.
pub const TOKEN_ENV_VAR: &str = "DISCORD_BOT_TOKEN";

// ═══════════════════════════════════════════════════════════════════════
//  Wire types
// ═══════════════════════════════════════════════════════════════════════

/// A Discord user, as returned by the user and message endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

impl User {
    /// Render the user as a mention that Discord resolves client-side.
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}

/// A file attached to a message.
#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    pub url: String,
}

/// The emoji half of a reaction.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Emoji {
    #[serde(default)]
    pub name: Option<String>,
}

/// An aggregated reaction on a message.
#[derive(Debug, Clone, Deserialize)]
pub struct Reaction {
    pub emoji: Emoji,
    pub count: u64,
}

/// A channel message.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    pub author: User,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

// ═══════════════════════════════════════════════════════════════════════
//  Client
// ═══════════════════════════════════════════════════════════════════════

/// Discord REST client. Cheap to clone; the underlying connection pool is
/// shared.
#[derive(Clone)]
pub struct DiscordClient {
    token: String,
    http: reqwest::Client,
}

impl DiscordClient {
    /// Create a client with the given bot token.
    pub fn new(token: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("quoteboard/0.1")
            .build()
            .unwrap_or_default();
        Self {
            token: token.into(),
            http,
        }
    }

    /// Create a client from the `DISCORD_BOT_TOKEN` environment variable.
    pub fn from_env() -> Result<Self> {
        match std::env::var(TOKEN_ENV_VAR) {
            Ok(token) if !token.is_empty() => Ok(Self::new(token)),
            _ => Err(AdapterError::AuthRequired {
                provider: "discord",
                env_var: TOKEN_ENV_VAR,
            }),
        }
    }

    /// The bot token, for the gateway identify handshake.
    pub fn token(&self) -> &str {
        &self.token
    }

    // -----------------------------------------------------------------------
    // HTTP plumbing
    // -----------------------------------------------------------------------

    fn api_url(path: &str) -> String {
        format!("{API_BASE_URL}{path}")
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token)
    }

    /// Check the response status, turning Discord's error body into a
    /// typed [`AdapterError::Api`].
    async fn check(response: reqwest::Response, endpoint: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body: Value = response.json().await.unwrap_or_default();
        let message = body
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
            .to_string();
        Err(AdapterError::Api {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    /// Fetch the bot's own user, used to filter self-authored events.
    pub async fn current_user(&self) -> Result<User> {
        self.get_json("/users/@me").await
    }

    /// Fetch a user by id. Fails when the id no longer resolves, e.g. a
    /// deleted account; callers fall back to the stored display name.
    pub async fn get_user(&self, user_id: &str) -> Result<User> {
        self.get_json(&format!("/users/{user_id}")).await
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Fetch a single message, including its reaction counts.
    pub async fn get_message(&self, channel_id: &str, message_id: &str) -> Result<Message> {
        self.get_json(&format!("/channels/{channel_id}/messages/{message_id}"))
            .await
    }

    /// Send a plain text message to a channel.
    pub async fn send_message(&self, channel_id: &str, content: &str) -> Result<Message> {
        let path = format!("/channels/{channel_id}/messages");
        debug!(channel_id, "sending message");

        let response = self
            .http
            .post(Self::api_url(&path))
            .header("Authorization", self.auth_header())
            .json(&json!({ "content": content }))
            .send()
            .await?;
        Self::check(response, &path).await?.json().await.map_err(Into::into)
    }

    /// Delete a message.
    pub async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<()> {
        let path = format!("/channels/{channel_id}/messages/{message_id}");
        let response = self
            .http
            .delete(Self::api_url(&path))
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        Self::check(response, &path).await?;
        Ok(())
    }

    /// Pin a message in its channel.
    pub async fn pin_message(&self, channel_id: &str, message_id: &str) -> Result<()> {
        let path = format!("/channels/{channel_id}/pins/{message_id}");
        let response = self
            .http
            .put(Self::api_url(&path))
            .header("Authorization", self.auth_header())
            .header("Content-Length", "0")
            .send()
            .await?;
        Self::check(response, &path).await?;
        Ok(())
    }

    /// Remove a pinned message.
    pub async fn unpin_message(&self, channel_id: &str, message_id: &str) -> Result<()> {
        let path = format!("/channels/{channel_id}/pins/{message_id}");
        let response = self
            .http
            .delete(Self::api_url(&path))
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        Self::check(response, &path).await?;
        Ok(())
    }

    /// Upload a text file to a channel (bulk quote export).
    pub async fn send_file(
        &self,
        channel_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<Message> {
        let path = format!("/channels/{channel_id}/messages");
        debug!(channel_id, filename, size = bytes.len(), "uploading file");

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("text/plain")
            .map_err(|err| AdapterError::InvalidResponse {
                endpoint: path.clone(),
                reason: format!("invalid upload part: {err}"),
            })?;
        let form = reqwest::multipart::Form::new().part("files[0]", part);

        let response = self
            .http
            .post(Self::api_url(&path))
            .header("Authorization", self.auth_header())
            .multipart(form)
            .send()
            .await?;
        Self::check(response, &path).await?.json().await.map_err(Into::into)
    }

    /// Send a message that deletes itself after `ttl`.
    ///
    /// Runs in a spawned task; send and delete failures are logged, never
    /// surfaced. Acknowledgements are best-effort.
    pub fn send_self_destructing(&self, channel_id: &str, content: &str, ttl: Duration) {
        let client = self.clone();
        let channel_id = channel_id.to_string();
        let content = format!(
            "{content} [This message will self delete in {}s]",
            ttl.as_secs()
        );

        tokio::spawn(async move {
            let message = match client.send_message(&channel_id, &content).await {
                Ok(message) => message,
                Err(error) => {
                    warn!(%error, channel_id, "failed to send self-destructing message");
                    return;
                }
            };
            tokio::time::sleep(ttl).await;
            if let Err(error) = client.delete_message(&channel_id, &message.id).await {
                warn!(%error, channel_id, message_id = %message.id, "failed to delete message");
            }
        });
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .get(Self::api_url(path))
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        Self::check(response, path).await?.json().await.map_err(Into::into)
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_joins_base_and_path() {
        assert_eq!(
            DiscordClient::api_url("/channels/123/messages"),
            "https://discord.com/api/v10/channels/123/messages"
        );
    }

    #[test]
    fn user_mention_format() {
        let user = User {
            id: "42".to_string(),
            username: "alice".to_string(),
            bot: false,
        };
        assert_eq!(user.mention(), "<@42>");
    }

    #[test]
    fn message_deserializes_with_missing_optional_fields() {
        let body = r#"{
            "id": "1",
            "channel_id": "2",
            "author": {"id": "3", "username": "bob"}
        }"#;
        let message: Message = serde_json::from_str(body).unwrap();
        assert_eq!(message.content, "");
        assert!(message.attachments.is_empty());
        assert!(message.reactions.is_empty());
        assert!(!message.author.bot);
    }

    #[test]
    fn reaction_counts_deserialize() {
        let body = r#"{
            "id": "1",
            "channel_id": "2",
            "content": "hi",
            "author": {"id": "3", "username": "bob", "bot": true},
            "reactions": [{"emoji": {"name": "💬"}, "count": 2}]
        }"#;
        let message: Message = serde_json::from_str(body).unwrap();
        assert_eq!(message.reactions[0].emoji.name.as_deref(), Some("💬"));
        assert_eq!(message.reactions[0].count, 2);
        assert!(message.author.bot);
    }
}
