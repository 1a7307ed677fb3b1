//! # quoteboard-adapters
//!
//! Platform clients for quoteboard. Everything in this crate is I/O glue
//! around external services; none of it touches quote-store state.
//!
//! - [`discord`] — REST client for messages, pins, uploads, and user
//!   lookups, plus self-destructing acknowledgements.
//! - [`gateway`] — the websocket event source delivering messages and
//!   reactions as typed [`gateway::GatewayEvent`]s.
//! - [`nlquotes`] — third-party quote-search API client.
//! - [`jellyfin`] — media-server poller for the daily update broadcast.

pub mod discord;
pub mod error;
pub mod gateway;
pub mod jellyfin;
pub mod nlquotes;

// ── re-exports ───────────────────────────────────────────────────────

pub use discord::DiscordClient;
pub use error::{AdapterError, Result};
pub use gateway::{Gateway, GatewayEvent};
pub use jellyfin::JellyfinClient;
pub use nlquotes::NlQuotesClient;
