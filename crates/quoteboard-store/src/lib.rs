//! # quoteboard-store
//!
//! Per-guild quote storage for quoteboard.
//!
//! Each guild owns an independent [`QuoteStore`]: a slot arena with
//! tombstone deletion and FIFO slot reuse, plus a case-insensitive author
//! index. Slot indices are the public quote numbers and stay stable for
//! the life of the store. The [`GuildRegistry`] hands out stores on first
//! access, and [`Snapshotter`] flushes the whole registry to a versioned
//! JSON file on a timer and at shutdown.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  GuildRegistry (DashMap, create-on-access)   │
//! ├──────────────────────────────────────────────┤
//! │  QuoteStore per guild (one Mutex each)       │
//! │    records: slot arena with tombstones       │
//! │    author_index: lowercased name → slots     │
//! │    free_slots: FIFO reuse queue              │
//! ├──────────────────────────────────────────────┤
//! │  Snapshotter (versioned JSON, atomic rename) │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! In-memory state is authoritative; the snapshot file is a write-behind
//! backup consulted only at startup.

pub mod error;
pub mod quote;
pub mod registry;
pub mod snapshot;

// ── re-exports ───────────────────────────────────────────────────────

pub use error::{StoreError, StoreResult};
pub use quote::{DELETED_QUOTE_TEXT, NewQuote, QuoteRecord, QuoteStore};
pub use registry::GuildRegistry;
pub use snapshot::{DEFAULT_FLUSH_INTERVAL, GuildSnapshot, PeriodicFlush, Snapshotter};
