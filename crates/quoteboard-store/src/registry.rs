//! Guild registry: one [`QuoteStore`] per guild, created on first access.
//!
//! The registry is the only shared entry point handlers touch, so the
//! create-if-absent path must be safe under concurrent first access from
//! multiple guilds at once. A [`DashMap`] guards the map itself; each
//! store then serializes its own operations behind its own lock.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::quote::QuoteStore;

/// Shared map from guild identifier to that guild's quote store.
///
/// Constructed once at startup and passed by reference to every handler.
/// Stores are never destroyed during the process lifetime.
#[derive(Debug, Default)]
pub struct GuildRegistry {
    stores: DashMap<String, Arc<QuoteStore>>,
}

impl GuildRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the guild's store, atomically creating an empty one on
    /// first access.
    pub fn get_or_create(&self, guild_id: &str) -> Arc<QuoteStore> {
        self.stores
            .entry(guild_id.to_string())
            .or_insert_with(|| {
                debug!(guild_id, "creating quote store for new guild");
                Arc::new(QuoteStore::new())
            })
            .clone()
    }

    /// Return the guild's store without creating one.
    pub fn get(&self, guild_id: &str) -> Option<Arc<QuoteStore>> {
        self.stores.get(guild_id).map(|entry| entry.clone())
    }

    /// Insert a reconstructed store, replacing any existing entry.
    /// Used by snapshot load at startup.
    pub fn insert(&self, guild_id: impl Into<String>, store: QuoteStore) {
        self.stores.insert(guild_id.into(), Arc::new(store));
    }

    /// Snapshot the current set of guild ids.
    pub fn guild_ids(&self) -> Vec<String> {
        self.stores.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of guilds with a store.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Whether no guild has a store yet.
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::NewQuote;

    fn quote(text: &str) -> NewQuote {
        NewQuote {
            text: text.to_string(),
            attachment_urls: Vec::new(),
            author: "Alice".to_string(),
            user_id: "u1".to_string(),
        }
    }

    #[test]
    fn get_or_create_returns_same_store() {
        let registry = GuildRegistry::new();
        let a = registry.get_or_create("g1");
        a.create(quote("hello"));

        let b = registry.get_or_create("g1");
        assert_eq!(b.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn guilds_are_isolated() {
        let registry = GuildRegistry::new();
        registry.get_or_create("g1").create(quote("only in g1"));

        assert!(registry.get_or_create("g2").is_empty());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn get_does_not_create() {
        let registry = GuildRegistry::new();
        assert!(registry.get("missing").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_first_access_creates_exactly_one_store() {
        let registry = Arc::new(GuildRegistry::new());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let store = registry.get_or_create("g1");
                    store.create(NewQuote {
                        text: format!("q{i}"),
                        attachment_urls: Vec::new(),
                        author: format!("author{i}"),
                        user_id: format!("u{i}"),
                    });
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // All sixteen creates landed in a single store.
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("g1").unwrap().len(), 16);
    }
}
