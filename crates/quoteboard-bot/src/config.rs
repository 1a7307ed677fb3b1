//! Bot configuration.
//!
//! Reads the TOML config file and falls back to sensible defaults when
//! the file or individual keys are missing. Secrets never live here;
//! tokens and API keys come from the environment (loaded via `.env` by
//! the run command).

use std::path::PathBuf;

/// Settings for the daily random-quote broadcast. Present only when both
/// a guild and a channel are configured.
#[derive(Debug, Clone)]
pub struct DailyQuoteConfig {
    /// Cron expression (seconds-resolution, six fields).
    pub schedule: String,
    pub guild_id: String,
    pub channel_id: String,
}

/// Settings for the media-server update broadcast. Present only when at
/// least one target channel is configured.
#[derive(Debug, Clone)]
pub struct JellyfinConfig {
    pub schedule: String,
    pub base_url: String,
    /// Channels that receive the daily update and may invoke the
    /// on-demand command.
    pub channels: Vec<String>,
}

/// Top-level bot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the registry snapshot lives.
    pub snapshot_path: PathBuf,
    /// Seconds between periodic snapshot saves.
    pub flush_interval_secs: u64,
    /// Prefix for text commands.
    pub command_prefix: String,
    /// Reaction emoji that saves a quote.
    pub quote_emoji: String,
    /// Reaction emoji that pins / unpins a message.
    pub pin_emoji: String,
    /// Seconds before acknowledgement messages delete themselves.
    pub ack_ttl_secs: u64,
    pub daily_quote: Option<DailyQuoteConfig>,
    pub jellyfin: Option<JellyfinConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("data/quotes.json"),
            flush_interval_secs: 60,
            command_prefix: "!".to_string(),
            quote_emoji: "💬".to_string(),
            pin_emoji: "📌".to_string(),
            ack_ttl_secs: 10,
            daily_quote: None,
            jellyfin: None,
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults for
    /// anything missing or unparsable.
    pub fn load(path: &str) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };
        match content.parse::<toml::Table>() {
            Ok(table) => Self::from_table(&table),
            Err(error) => {
                tracing::warn!(%error, path, "config file is not valid TOML, using defaults");
                Self::default()
            }
        }
    }

    fn from_table(table: &toml::Table) -> Self {
        let defaults = Self::default();

        let bot = section(table, "bot");
        let store = section(table, "store");

        let daily_quote = section(table, "daily_quote").and_then(|section| {
            let guild_id = str_key(section, "guild_id")?;
            let channel_id = str_key(section, "channel_id")?;
            Some(DailyQuoteConfig {
                schedule: str_key(section, "schedule")
                    .unwrap_or_else(|| "0 0 8 * * *".to_string()),
                guild_id,
                channel_id,
            })
        });

        let jellyfin = section(table, "jellyfin").and_then(|section| {
            let channels: Vec<String> = section
                .get("channels")
                .and_then(|v| v.as_array())
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            if channels.is_empty() {
                return None;
            }
            Some(JellyfinConfig {
                schedule: str_key(section, "schedule")
                    .unwrap_or_else(|| "0 0 4 * * *".to_string()),
                base_url: str_key(section, "base_url")
                    .unwrap_or_else(|| "http://localhost:8096/jelly".to_string()),
                channels,
            })
        });

        Self {
            snapshot_path: store
                .and_then(|s| str_key(s, "snapshot_path"))
                .map(PathBuf::from)
                .unwrap_or(defaults.snapshot_path),
            flush_interval_secs: store
                .and_then(|s| int_key(s, "flush_interval_secs"))
                .map(|v| v.max(1) as u64)
                .unwrap_or(defaults.flush_interval_secs),
            command_prefix: bot
                .and_then(|s| str_key(s, "command_prefix"))
                .unwrap_or(defaults.command_prefix),
            quote_emoji: bot
                .and_then(|s| str_key(s, "quote_emoji"))
                .unwrap_or(defaults.quote_emoji),
            pin_emoji: bot
                .and_then(|s| str_key(s, "pin_emoji"))
                .unwrap_or(defaults.pin_emoji),
            ack_ttl_secs: bot
                .and_then(|s| int_key(s, "ack_ttl_secs"))
                .map(|v| v.max(1) as u64)
                .unwrap_or(defaults.ack_ttl_secs),
            daily_quote,
            jellyfin,
        }
    }
}

fn section<'a>(table: &'a toml::Table, name: &str) -> Option<&'a toml::Table> {
    match table.get(name) {
        Some(toml::Value::Table(section)) => Some(section),
        _ => None,
    }
}

fn str_key(section: &toml::Table, key: &str) -> Option<String> {
    section.get(key).and_then(|v| v.as_str()).map(String::from)
}

fn int_key(section: &toml::Table, key: &str) -> Option<i64> {
    section.get(key).and_then(|v| v.as_integer())
}

// ── tests ────────────────────────────────────────────────────────────
