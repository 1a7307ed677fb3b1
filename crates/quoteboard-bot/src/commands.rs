//! Command surface: classifies inbound events into store operations and
//! formats the replies.
//!
//! This layer never touches store internals: it calls the per-guild
//! store API and hands results back to Discord. Acknowledgements and
//! error hints go out as self-destructing messages so channels stay
//! readable.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use quoteboard_adapters::DiscordClient;
use quoteboard_adapters::discord::Message;
use quoteboard_adapters::gateway::{GatewayEvent, IncomingMessage, ReactionEvent};
use quoteboard_adapters::{JellyfinClient, NlQuotesClient};
use quoteboard_store::{GuildRegistry, NewQuote, QuoteRecord, QuoteStore};

use crate::config::Config;

const USAGE_HINT: &str =
    "You must specify a quote id (its a number) or a name like !quote 5 or !quote jesus";
const REMOVE_USAGE_HINT: &str =
    "You must specify a quote id (its a number) like !removequote 5";
const NO_QUOTES_YET: &str = "This server has no saved quotes yet!";

/// Error hints are short-lived regardless of the ack TTL.
const HINT_TTL: Duration = Duration::from_secs(5);

/// How long the bulk export file stays up.
const EXPORT_TTL: Duration = Duration::from_secs(30);

// ═══════════════════════════════════════════════════════════════════════
//  Parsing
// ═══════════════════════════════════════════════════════════════════════

/// A classified text command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `!quote`
    RandomQuote,
    /// `!quote 5`
    QuoteByIndex(usize),
    /// `!quote jesus` or `!quote <@123>`
    QuoteByQuery(String),
    /// `!quote all`
    ExportAll,
    /// `!removequote 5`; `None` when the argument is missing or not a
    /// number.
    RemoveQuote(Option<usize>),
    /// `!nlquote [search term]`
    NlQuote(Option<String>),
    /// `!jellyfinrecent`
    JellyfinRecent,
}

/// Parse `content` into a command, or `None` when it is ordinary chat.
pub fn parse(content: &str, prefix: &str) -> Option<Command> {
    let rest = content.strip_prefix(prefix)?;
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest.trim(), ""),
    };

    match name {
        "quote" => Some(match args {
            "" => Command::RandomQuote,
            _ => {
                if let Ok(index) = args.parse::<usize>() {
                    Command::QuoteByIndex(index)
                } else if args.eq_ignore_ascii_case("all") {
                    Command::ExportAll
                } else {
                    Command::QuoteByQuery(args.to_string())
                }
            }
        }),
        "removequote" => Some(Command::RemoveQuote(args.parse().ok())),
        "nlquote" => Some(Command::NlQuote(
            (!args.is_empty()).then(|| args.to_string()),
        )),
        "jellyfinrecent" => Some(Command::JellyfinRecent),
        _ => None,
    }
}

/// Extract the user id from a `<@123>` / `<@!123>` mention.
fn mention_user_id(query: &str) -> Option<&str> {
    let inner = query.strip_prefix("<@")?.strip_suffix('>')?;
    let inner = inner.strip_prefix('!').unwrap_or(inner);
    (!inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit())).then_some(inner)
}

// ═══════════════════════════════════════════════════════════════════════
//  Formatting
// ═══════════════════════════════════════════════════════════════════════

/// Render a quote for posting. Tombstoned slots render as the bare
/// sentinel; live quotes get a code block, attachment links, and the
/// author line.
fn format_quote_message(index: usize, record: &QuoteRecord, author_display: &str) -> String {
    if record.tombstoned {
        return format!("[#{index}]: {}", record.text);
    }

    let mut message = format!("[#{index}]:");
    if !record.text.is_empty() {
        message.push_str(&format!(" ```{}```", record.text));
    }
    for url in &record.attachment_urls {
        message.push('\n');
        message.push_str(url);
    }
    message.push_str(&format!("\n-{author_display}"));
    message
}

/// Render a quote with the author resolved to a live mention where the
/// user id still exists, falling back to the display name captured at
/// save time.
pub(crate) async fn render_quote(
    discord: &DiscordClient,
    index: usize,
    record: &QuoteRecord,
) -> String {
    if record.tombstoned {
        return format_quote_message(index, record, "");
    }
    let author = match discord.get_user(&record.user_id).await {
        Ok(user) => user.mention(),
        Err(_) => record.author.clone(),
    };
    format_quote_message(index, record, &author)
}

/// Build the plain-text bulk export, one live quote per line.
fn export_buffer(live: impl Iterator<Item = (usize, QuoteRecord)>) -> String {
    let mut buffer = String::new();
    for (index, record) in live {
        buffer.push_str(&format!("{index} : {} : {}", record.author, record.text));
        if !record.attachment_urls.is_empty() {
            buffer.push_str(&format!(
                " (Attachments: {})",
                record.attachment_urls.join(", ")
            ));
        }
        buffer.push_str("\r\n");
    }
    buffer
}

// ═══════════════════════════════════════════════════════════════════════
//  Reaction guard
// ═══════════════════════════════════════════════════════════════════════

/// Decide whether a bookmark reaction may create a quote.
///
/// Rejects the bot's own messages, messages where the trigger emoji
/// already carries more than one reaction (this path already fired, or
/// several users are racing), and text equal to the store's most recent
/// live quote (rapid react/unreact/react cycles).
fn reaction_quote_allowed(
    message: &Message,
    bot_user_id: &str,
    quote_emoji: &str,
    last_text: Option<&str>,
) -> bool {
    if message.author.id == bot_user_id {
        return false;
    }
    let already_fired = message
        .reactions
        .iter()
        .any(|reaction| reaction.emoji.name.as_deref() == Some(quote_emoji) && reaction.count > 1);
    if already_fired {
        return false;
    }
    if last_text.is_some_and(|text| text == message.content) {
        return false;
    }
    true
}

// ═══════════════════════════════════════════════════════════════════════
//  Handler
// ═══════════════════════════════════════════════════════════════════════

/// Routes gateway events into store operations and Discord replies.
/// Shared across per-event tasks via `Arc`.
pub struct Handler {
    discord: DiscordClient,
    registry: Arc<GuildRegistry>,
    nlquotes: NlQuotesClient,
    jellyfin: Option<JellyfinClient>,
    jellyfin_channels: Vec<String>,
    command_prefix: String,
    quote_emoji: String,
    pin_emoji: String,
    ack_ttl: Duration,
    bot_user_id: String,
}

impl Handler {
    pub fn new(
        discord: DiscordClient,
        registry: Arc<GuildRegistry>,
        jellyfin: Option<JellyfinClient>,
        config: &Config,
        bot_user_id: String,
    ) -> Self {
        Self {
            discord,
            registry,
            nlquotes: NlQuotesClient::new(),
            jellyfin,
            jellyfin_channels: config
                .jellyfin
                .as_ref()
                .map(|j| j.channels.clone())
                .unwrap_or_default(),
            command_prefix: config.command_prefix.clone(),
            quote_emoji: config.quote_emoji.clone(),
            pin_emoji: config.pin_emoji.clone(),
            ack_ttl: Duration::from_secs(config.ack_ttl_secs),
            bot_user_id,
        }
    }

    /// Entry point for one gateway event; runs in its own task.
    pub async fn handle_event(self: Arc<Self>, event: GatewayEvent) {
        match event {
            GatewayEvent::Ready { user } => {
                info!(username = %user.username, "gateway session ready");
            }
            GatewayEvent::MessageCreate(message) => self.on_message(message).await,
            GatewayEvent::ReactionAdd(reaction) => self.on_reaction_add(reaction).await,
            GatewayEvent::ReactionRemove(reaction) => self.on_reaction_remove(reaction).await,
        }
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    async fn on_message(&self, message: IncomingMessage) {
        if message.author.id == self.bot_user_id {
            return;
        }
        let Some(command) = parse(&message.content, &self.command_prefix) else {
            return;
        };
        debug!(channel_id = %message.channel_id, ?command, "handling command");

        match command {
            Command::RandomQuote => self.random_quote(&message).await,
            Command::QuoteByIndex(index) => self.quote_by_index(&message, index).await,
            Command::QuoteByQuery(query) => self.quote_by_query(&message, &query).await,
            Command::ExportAll => self.export_all(&message).await,
            Command::RemoveQuote(index) => self.remove_quote(&message, index).await,
            Command::NlQuote(term) => self.nl_quote(&message, term).await,
            Command::JellyfinRecent => self.jellyfin_recent(&message).await,
        }
    }

    /// The guild's store, or `None` for DMs where quote commands do not
    /// apply.
    fn guild_store(&self, message: &IncomingMessage) -> Option<Arc<QuoteStore>> {
        message
            .guild_id
            .as_deref()
            .map(|guild_id| self.registry.get_or_create(guild_id))
    }

    async fn random_quote(&self, message: &IncomingMessage) {
        let Some(store) = self.guild_store(message) else {
            return;
        };
        match store.random() {
            Ok((index, record)) => {
                let reply = self.render_quote(index, &record).await;
                self.send(&message.channel_id, &reply).await;
            }
            // Also covers random selection giving up after its retry
            // bound; callers cannot tell the two apart.
            Err(_) => {
                self.discord
                    .send_self_destructing(&message.channel_id, NO_QUOTES_YET, self.ack_ttl);
            }
        }
    }

    async fn quote_by_index(&self, message: &IncomingMessage, index: usize) {
        let Some(store) = self.guild_store(message) else {
            return;
        };
        match store.get(index) {
            Ok(record) => {
                let reply = self.render_quote(index, &record).await;
                self.send(&message.channel_id, &reply).await;
            }
            Err(_) => {
                let hint = format!(
                    "Sorry we only have up to quote {}",
                    store.len().saturating_sub(1)
                );
                self.discord
                    .send_self_destructing(&message.channel_id, &hint, HINT_TTL);
            }
        }
    }

    async fn quote_by_query(&self, message: &IncomingMessage, query: &str) {
        let Some(store) = self.guild_store(message) else {
            return;
        };

        let mut result = store.random_by_author(query);

        // Maybe the query is a mention; resolve it to a username and
        // retry.
        if result.is_err() {
            if let Some(user_id) = mention_user_id(query) {
                if let Ok(user) = self.discord.get_user(user_id).await {
                    result = store.random_by_author(&user.username);
                }
            }
        }

        match result {
            Ok((index, record)) => {
                let reply = self.render_quote(index, &record).await;
                self.send(&message.channel_id, &reply).await;
            }
            Err(_) => {
                self.discord
                    .send_self_destructing(&message.channel_id, USAGE_HINT, HINT_TTL);
            }
        }
    }

    async fn export_all(&self, message: &IncomingMessage) {
        let Some(store) = self.guild_store(message) else {
            return;
        };

        let buffer = export_buffer(store.iter_live());
        if buffer.is_empty() {
            self.discord
                .send_self_destructing(&message.channel_id, NO_QUOTES_YET, self.ack_ttl);
            return;
        }

        let upload = self
            .discord
            .send_file(&message.channel_id, "quotes.txt", buffer.into_bytes())
            .await;
        match upload {
            Ok(file_message) => {
                self.discord.send_self_destructing(
                    &message.channel_id,
                    "Deleting this file in 30 seconds",
                    EXPORT_TTL,
                );
                let discord = self.discord.clone();
                let channel_id = message.channel_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(EXPORT_TTL).await;
                    if let Err(error) =
                        discord.delete_message(&channel_id, &file_message.id).await
                    {
                        warn!(%error, channel_id, "failed to delete quote export");
                    }
                });
            }
            Err(error) => warn!(%error, "failed to upload quote export"),
        }
    }

    async fn remove_quote(&self, message: &IncomingMessage, index: Option<usize>) {
        let Some(store) = self.guild_store(message) else {
            return;
        };
        let Some(index) = index else {
            self.discord
                .send_self_destructing(&message.channel_id, REMOVE_USAGE_HINT, HINT_TTL);
            return;
        };

        let reply = match store.delete(index) {
            Ok(()) => format!("Quote {index} deleted successfully"),
            Err(_) => format!("No quote with id {index}"),
        };
        self.discord
            .send_self_destructing(&message.channel_id, &reply, HINT_TTL);
    }

    async fn nl_quote(&self, message: &IncomingMessage, term: Option<String>) {
        match term {
            None => match self.nlquotes.random().await {
                Ok(quote) => self.send(&message.channel_id, &quote).await,
                Err(error) => {
                    warn!(%error, "nlquotes random failed");
                    self.discord.send_self_destructing(
                        &message.channel_id,
                        "couldn't pull a random quote sorry, maybe the API is down?",
                        HINT_TTL,
                    );
                }
            },
            Some(term) => match self.nlquotes.search(&term).await {
                Ok(Some(quote)) => self.send(&message.channel_id, &quote).await,
                Ok(None) => {
                    let reply = format!("shockingly NL has never said '{term}'");
                    self.send(&message.channel_id, &reply).await;
                }
                Err(error) => {
                    warn!(%error, term, "nlquotes search failed");
                    self.discord.send_self_destructing(
                        &message.channel_id,
                        "sorry got an error trying that",
                        HINT_TTL,
                    );
                }
            },
        }
    }

    async fn jellyfin_recent(&self, message: &IncomingMessage) {
        let Some(client) = &self.jellyfin else {
            return;
        };
        // Only the configured update channels may invoke this.
        if !self
            .jellyfin_channels
            .iter()
            .any(|channel| channel == &message.channel_id)
        {
            return;
        }

        let since = chrono::Utc::now() - chrono::Duration::days(1);
        match client.update_message_since(since).await {
            Ok(Some(update)) => self.send(&message.channel_id, &update).await,
            Ok(None) => debug!("no recent media to report"),
            Err(error) => warn!(%error, "media server query failed"),
        }
    }

    // -----------------------------------------------------------------------
    // Reactions
    // -----------------------------------------------------------------------

    async fn on_reaction_add(&self, reaction: ReactionEvent) {
        let Some(emoji) = reaction.emoji.name.as_deref() else {
            return;
        };

        if emoji == self.pin_emoji {
            if let Err(error) = self
                .discord
                .pin_message(&reaction.channel_id, &reaction.message_id)
                .await
            {
                warn!(%error, message_id = %reaction.message_id, "failed to pin message");
            }
            return;
        }
        if emoji != self.quote_emoji {
            return;
        }
        let Some(guild_id) = reaction.guild_id.as_deref() else {
            return;
        };

        // The reacted message may be gone by the time we look.
        let message = match self
            .discord
            .get_message(&reaction.channel_id, &reaction.message_id)
            .await
        {
            Ok(message) => message,
            Err(error) => {
                debug!(%error, message_id = %reaction.message_id, "reacted message unavailable");
                return;
            }
        };

        let store = self.registry.get_or_create(guild_id);
        let last_text = store.most_recent_live().ok().map(|record| record.text);
        if !reaction_quote_allowed(
            &message,
            &self.bot_user_id,
            &self.quote_emoji,
            last_text.as_deref(),
        ) {
            debug!(message_id = %message.id, "reaction create rejected by dedup guard");
            return;
        }

        let attachment_urls: Vec<String> = message
            .attachments
            .iter()
            .map(|attachment| attachment.url.clone())
            .collect();
        let has_attachments = !attachment_urls.is_empty();

        let index = store.create(NewQuote {
            text: message.content.clone(),
            attachment_urls,
            author: message.author.username.clone(),
            user_id: message.author.id.clone(),
        });
        info!(guild_id, index, author = %message.author.username, "quote saved from reaction");

        let mut ack = format!("Added quote [#{index}]:");
        if !message.content.is_empty() {
            ack.push_str(&format!(" ```{}```", message.content));
        }
        if has_attachments {
            ack.push_str(" [Contains Attachments]");
        }
        ack.push_str(&format!(" -{}", message.author.username));
        self.discord
            .send_self_destructing(&reaction.channel_id, &ack, self.ack_ttl);
    }

    async fn on_reaction_remove(&self, reaction: ReactionEvent) {
        if reaction.emoji.name.as_deref() != Some(self.pin_emoji.as_str()) {
            return;
        }
        if let Err(error) = self
            .discord
            .unpin_message(&reaction.channel_id, &reaction.message_id)
            .await
        {
            warn!(%error, message_id = %reaction.message_id, "failed to unpin message");
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn render_quote(&self, index: usize, record: &QuoteRecord) -> String {
        render_quote(&self.discord, index, record).await
    }

    async fn send(&self, channel_id: &str, content: &str) {
        if let Err(error) = self.discord.send_message(channel_id, content).await {
            warn!(%error, channel_id, "failed to send message");
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use quoteboard_adapters::discord::{Emoji, Reaction, User};

    // ── parsing ──────────────────────────────────────────────────────

    #[test]
    fn parse_quote_variants() {
        assert_eq!(parse("!quote", "!"), Some(Command::RandomQuote));
        assert_eq!(parse("!quote 5", "!"), Some(Command::QuoteByIndex(5)));
        assert_eq!(parse("!quote all", "!"), Some(Command::ExportAll));
        assert_eq!(parse("!quote ALL", "!"), Some(Command::ExportAll));
        assert_eq!(
            parse("!quote jesus", "!"),
            Some(Command::QuoteByQuery("jesus".to_string()))
        );
        assert_eq!(
            parse("!quote <@123>", "!"),
            Some(Command::QuoteByQuery("<@123>".to_string()))
        );
    }

    #[test]
    fn parse_remove_variants() {
        assert_eq!(parse("!removequote 3", "!"), Some(Command::RemoveQuote(Some(3))));
        assert_eq!(parse("!removequote", "!"), Some(Command::RemoveQuote(None)));
        assert_eq!(
            parse("!removequote abc", "!"),
            Some(Command::RemoveQuote(None))
        );
    }

    #[test]
    fn parse_nlquote_variants() {
        assert_eq!(parse("!nlquote", "!"), Some(Command::NlQuote(None)));
        assert_eq!(
            parse("!nlquote egg salad", "!"),
            Some(Command::NlQuote(Some("egg salad".to_string())))
        );
    }

    #[test]
    fn parse_ignores_chat_and_unknown_commands() {
        assert_eq!(parse("hello there", "!"), None);
        assert_eq!(parse("!unknowncommand", "!"), None);
        assert_eq!(parse("quote 5", "!"), None);
    }

    #[test]
    fn parse_respects_configured_prefix() {
        assert_eq!(parse("?quote", "?"), Some(Command::RandomQuote));
        assert_eq!(parse("!quote", "?"), None);
    }

    #[test]
    fn mention_extraction() {
        assert_eq!(mention_user_id("<@123>"), Some("123"));
        assert_eq!(mention_user_id("<@!123>"), Some("123"));
        assert_eq!(mention_user_id("<@abc>"), None);
        assert_eq!(mention_user_id("jesus"), None);
        assert_eq!(mention_user_id("<@>"), None);
    }

    // ── formatting ───────────────────────────────────────────────────

    fn record(text: &str, author: &str, attachments: &[&str]) -> QuoteRecord {
        QuoteRecord {
            text: text.to_string(),
            attachment_urls: attachments.iter().map(|s| s.to_string()).collect(),
            author: author.to_string(),
            user_id: "u1".to_string(),
            tombstoned: false,
        }
    }

    #[test]
    fn quote_message_with_text_only() {
        let message = format_quote_message(3, &record("hi there", "Alice", &[]), "Alice");
        assert_eq!(message, "[#3]: ```hi there```\n-Alice");
    }

    #[test]
    fn quote_message_with_attachments_only() {
        let message = format_quote_message(
            0,
            &record("", "Bob", &["https://cdn.example/x.png"]),
            "<@42>",
        );
        assert_eq!(message, "[#0]:\nhttps://cdn.example/x.png\n-<@42>");
    }

    #[test]
    fn tombstoned_quote_renders_sentinel_only() {
        let tombstone = QuoteRecord::tombstone();
        let message = format_quote_message(7, &tombstone, "");
        assert_eq!(message, "[#7]: This quote has been deleted");
    }

    #[test]
    fn export_buffer_lists_live_quotes_with_windows_newlines() {
        let live = vec![
            (0, record("first", "Alice", &[])),
            (2, record("second", "Bob", &["https://cdn.example/a.png"])),
        ];
        let buffer = export_buffer(live.into_iter());
        assert_eq!(
            buffer,
            "0 : Alice : first\r\n\
             2 : Bob : second (Attachments: https://cdn.example/a.png)\r\n"
        );
    }

    // ── reaction guard ───────────────────────────────────────────────

    fn reacted_message(author_id: &str, content: &str, quote_reactions: u64) -> Message {
        let body = serde_json::json!({
            "id": "m1",
            "channel_id": "c1",
            "content": content,
            "author": {"id": author_id, "username": "alice"},
            "reactions": [{"emoji": {"name": "💬"}, "count": quote_reactions}],
        });
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn reaction_guard_allows_fresh_message() {
        let message = reacted_message("u1", "something new", 1);
        assert!(reaction_quote_allowed(&message, "bot", "💬", Some("old quote")));
    }

    #[test]
    fn reaction_guard_rejects_bot_messages() {
        let message = reacted_message("bot", "hi", 1);
        assert!(!reaction_quote_allowed(&message, "bot", "💬", None));
    }

    #[test]
    fn reaction_guard_rejects_double_reactions() {
        let message = reacted_message("u1", "hi", 2);
        assert!(!reaction_quote_allowed(&message, "bot", "💬", None));
    }

    #[test]
    fn reaction_guard_rejects_repeat_of_latest_quote() {
        let message = reacted_message("u1", "same text", 1);
        assert!(!reaction_quote_allowed(&message, "bot", "💬", Some("same text")));
    }

    #[test]
    fn reaction_guard_ignores_other_emoji_counts() {
        let mut message = reacted_message("u1", "hi", 1);
        message.reactions.push(Reaction {
            emoji: Emoji {
                name: Some("👍".to_string()),
            },
            count: 12,
        });
        assert!(reaction_quote_allowed(&message, "bot", "💬", None));
    }

    #[test]
    fn user_mention_roundtrip() {
        let user = User {
            id: "9".to_string(),
            username: "bob".to_string(),
            bot: false,
        };
        assert_eq!(user.mention(), "<@9>");
    }
}
