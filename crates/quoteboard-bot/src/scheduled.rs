//! Cron-driven broadcasts.
//!
//! Two background jobs, each sleeping until the next occurrence of its
//! cron schedule: a daily random quote posted to a configured channel,
//! and the media-server update posted to its channels. Failures are
//! logged and the job waits for the next occurrence; nothing here is
//! fatal.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use quoteboard_adapters::{DiscordClient, JellyfinClient};
use quoteboard_store::GuildRegistry;

use crate::commands::render_quote;
use crate::config::{DailyQuoteConfig, JellyfinConfig};

/// Spawn the daily random-quote broadcast.
pub fn spawn_daily_quote(
    discord: DiscordClient,
    registry: Arc<GuildRegistry>,
    config: DailyQuoteConfig,
) -> Result<JoinHandle<()>> {
    let schedule = Schedule::from_str(&config.schedule)
        .with_context(|| format!("bad daily quote schedule: {}", config.schedule))?;

    Ok(tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!("daily quote schedule has no upcoming runs, stopping");
                return;
            };
            sleep_until(next).await;

            let store = registry.get_or_create(&config.guild_id);
            match store.random() {
                Ok((index, record)) => {
                    let message = render_quote(&discord, index, &record).await;
                    if let Err(error) = discord.send_message(&config.channel_id, &message).await {
                        warn!(%error, channel_id = %config.channel_id, "daily quote send failed");
                    }
                }
                Err(_) => debug!(guild_id = %config.guild_id, "no quotes to broadcast"),
            }
        }
    }))
}

/// Spawn the daily media-server update broadcast.
pub fn spawn_media_updates(
    discord: DiscordClient,
    client: JellyfinClient,
    config: JellyfinConfig,
) -> Result<JoinHandle<()>> {
    let schedule = Schedule::from_str(&config.schedule)
        .with_context(|| format!("bad media update schedule: {}", config.schedule))?;

    Ok(tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!("media update schedule has no upcoming runs, stopping");
                return;
            };
            sleep_until(next).await;

            let since = Utc::now() - chrono::Duration::days(1);
            match client.update_message_since(since).await {
                Ok(Some(update)) => {
                    for channel_id in &config.channels {
                        if let Err(error) = discord.send_message(channel_id, &update).await {
                            warn!(%error, channel_id, "media update send failed");
                        }
                    }
                }
                Ok(None) => debug!("no new media since yesterday"),
                Err(error) => warn!(%error, "media server query failed"),
            }
        }
    }))
}

/// Sleep until the given wall-clock time (or return at once if it has
/// already passed).
async fn sleep_until(when: DateTime<Utc>) {
    let delay = (when - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    debug!(delay_secs = delay.as_secs(), "sleeping until next scheduled run");
    tokio::time::sleep(delay).await;
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedules_parse_and_have_upcoming_runs() {
        for expression in ["0 0 8 * * *", "0 0 4 * * *"] {
            let schedule = Schedule::from_str(expression).unwrap();
            assert!(schedule.upcoming(Utc).next().is_some());
        }
    }

    #[test]
    fn bad_schedule_is_rejected_at_spawn() {
        let error = Schedule::from_str("not a schedule");
        assert!(error.is_err());
    }
}
