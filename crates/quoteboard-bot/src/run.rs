//! Bootstrap, main event loop, and graceful shutdown.
//!
//! Startup order matters: restore the registry from the snapshot before
//! any event can mutate it, verify credentials before opening the
//! gateway, and only then start the periodic flush and scheduled jobs.
//! On shutdown the flush timer stops first and one final save covers the
//! tail interval.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use quoteboard_adapters::discord::TOKEN_ENV_VAR;
use quoteboard_adapters::{DiscordClient, Gateway, JellyfinClient};
use quoteboard_store::{GuildRegistry, Snapshotter, StoreError};

use crate::commands::Handler;
use crate::config::Config;
use crate::scheduled;

/// Run the bot until a termination signal arrives.
pub async fn run(config_path: &str) -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::load(config_path);
    info!(
        config = config_path,
        snapshot = %config.snapshot_path.display(),
        "starting quoteboard"
    );

    let discord = DiscordClient::from_env().context("discord credentials missing")?;

    if let Some(parent) = config.snapshot_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("failed to create snapshot directory")?;
        }
    }

    // Restore state before anything can mutate or overwrite it. The bot
    // must not run on unknown persisted state.
    let registry = Arc::new(GuildRegistry::new());
    let snapshotter = Snapshotter::new(&config.snapshot_path, Arc::clone(&registry));
    match snapshotter.load_all() {
        Ok(guilds) => info!(guilds, "registry restored from snapshot"),
        Err(error @ StoreError::Format(_)) => {
            return Err(error).context("snapshot file is unparsable");
        }
        Err(error) => return Err(error).context("snapshot file is unreadable"),
    }

    // Verify the token and learn our own user before events flow; the
    // command surface filters self-authored events by this id.
    let me = discord
        .current_user()
        .await
        .context("discord rejected the bot token")?;
    info!(username = %me.username, "authenticated with discord");

    let flush = snapshotter.spawn_periodic(Duration::from_secs(config.flush_interval_secs));

    let jellyfin = match &config.jellyfin {
        Some(jellyfin_config) => match JellyfinClient::from_env(&jellyfin_config.base_url) {
            Ok(client) => Some(client),
            Err(error) => {
                warn!(%error, "media server features disabled");
                None
            }
        },
        None => None,
    };

    let mut jobs = Vec::new();
    if let Some(daily) = config.daily_quote.clone() {
        jobs.push(scheduled::spawn_daily_quote(
            discord.clone(),
            Arc::clone(&registry),
            daily,
        )?);
    }
    if let (Some(client), Some(jellyfin_config)) = (jellyfin.clone(), config.jellyfin.clone()) {
        jobs.push(scheduled::spawn_media_updates(
            discord.clone(),
            client,
            jellyfin_config,
        )?);
    }

    let handler = Arc::new(Handler::new(
        discord.clone(),
        Arc::clone(&registry),
        jellyfin,
        &config,
        me.id.clone(),
    ));

    let (mut events, gateway_handle) = Gateway::new(discord.token()).spawn();

    println!();
    println!("  quoteboard v{}", env!("CARGO_PKG_VERSION"));
    println!("  Bot: @{}", me.username);
    println!("  Guilds restored: {}", registry.len());
    println!("  Snapshot: {}", config.snapshot_path.display());
    println!();
    println!("  Bot is now running. Press Ctrl+C to exit.");
    println!();

    // One task per event, so a slow REST call never blocks the stream.
    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                match maybe_event {
                    Some(event) => {
                        tokio::spawn(Arc::clone(&handler).handle_event(event));
                    }
                    None => {
                        error!("gateway task ended unexpectedly");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    // Stop the timer first, then flush once more to cover the interval
    // since the last tick.
    flush.stop().await;
    if let Err(error) = snapshotter.save_all().await {
        error!(%error, "final snapshot save failed");
    }
    for job in jobs {
        job.abort();
    }
    drop(events);
    gateway_handle.abort();

    info!("shutdown complete");
    Ok(())
}

/// Print local state without connecting anywhere.
pub fn status(config_path: &str) {
    dotenvy::dotenv().ok();
    let config = Config::load(config_path);

    println!();
    println!("  quoteboard status");
    println!("  =================");
    println!();

    if std::path::Path::new(config_path).exists() {
        println!("  Config:    OK ({config_path})");
    } else {
        println!("  Config:    MISSING ({config_path}), using defaults");
    }

    match std::fs::metadata(&config.snapshot_path) {
        Ok(meta) => println!(
            "  Snapshot:  OK ({}, {} bytes)",
            config.snapshot_path.display(),
            meta.len()
        ),
        Err(_) => println!(
            "  Snapshot:  NOT CREATED YET ({})",
            config.snapshot_path.display()
        ),
    }

    match std::env::var(TOKEN_ENV_VAR) {
        Ok(token) if !token.is_empty() => println!("  Discord:   TOKEN SET"),
        _ => println!("  Discord:   TOKEN NOT SET (export {TOKEN_ENV_VAR})"),
    }

    match &config.daily_quote {
        Some(daily) => println!("  Daily quote: {} -> channel {}", daily.schedule, daily.channel_id),
        None => println!("  Daily quote: disabled"),
    }
    match &config.jellyfin {
        Some(jellyfin) => println!(
            "  Media updates: {} -> {} channel(s)",
            jellyfin.schedule,
            jellyfin.channels.len()
        ),
        None => println!("  Media updates: disabled"),
    }

    println!();
}
