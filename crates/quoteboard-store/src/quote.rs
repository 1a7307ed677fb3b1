//! Per-guild quote storage.
//!
//! A [`QuoteStore`] is an arena of [`QuoteRecord`]s whose slot indices are
//! the public, user-facing quote numbers. Deletion never removes a slot:
//! the record is overwritten with a tombstone and its index joins a FIFO
//! free-slot queue for reuse by the next create. A secondary index maps
//! lower-cased author names to the live slots they own.
//!
//! Invariants, held at every return point:
//!
//! - every index in the author index refers to a live (non-tombstoned)
//!   record;
//! - every index in the free-slot queue refers to a tombstoned record, and
//!   no index appears in both structures;
//! - the record arena only grows;
//! - all access goes through the store's single mutex.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{StoreError, StoreResult};
use crate::snapshot::GuildSnapshot;

/// Sentinel text stored in a tombstoned slot.
pub const DELETED_QUOTE_TEXT: &str = "This quote has been deleted";

/// Upper bound on resampling attempts in [`QuoteStore::random`].
const MAX_RANDOM_ATTEMPTS: usize = 10;

// ═══════════════════════════════════════════════════════════════════════
//  QuoteRecord
// ═══════════════════════════════════════════════════════════════════════

/// A single stored quote.
///
/// `text` may be empty when the quoted message carried only attachments.
/// `author` keeps the display name exactly as captured at creation time;
/// the lower-cased form lives only in the store's author index. `user_id`
/// is the opaque platform identifier, kept for live mention re-resolution
/// at display time (the user may since have left the guild).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRecord {
    pub text: String,
    #[serde(default)]
    pub attachment_urls: Vec<String>,
    pub author: String,
    pub user_id: String,
    #[serde(default)]
    pub tombstoned: bool,
}

impl QuoteRecord {
    /// The record written over a deleted slot: sentinel text, no author,
    /// no attachments.
    pub fn tombstone() -> Self {
        Self {
            text: DELETED_QUOTE_TEXT.to_string(),
            tombstoned: true,
            ..Self::default()
        }
    }
}

impl fmt::Display for QuoteRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -@{}", self.text, self.author)
    }
}

/// Input for creating a new quote.
#[derive(Debug, Clone)]
pub struct NewQuote {
    pub text: String,
    pub attachment_urls: Vec<String>,
    pub author: String,
    pub user_id: String,
}

// ═══════════════════════════════════════════════════════════════════════
//  QuoteStore
// ═══════════════════════════════════════════════════════════════════════

/// One guild's quote collection.
///
/// All fields live behind a single mutex; each operation holds it for the
/// whole logical step so create/delete are atomic with respect to every
/// other operation on the same store. No operation performs I/O while
/// holding the lock.
#[derive(Debug, Default)]
pub struct QuoteStore {
    inner: Mutex<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    /// Slot arena. Indices are stable public quote numbers.
    records: Vec<QuoteRecord>,
    /// Lower-cased author name → live slot indices, insertion order.
    author_index: HashMap<String, Vec<usize>>,
    /// Tombstoned slots available for reuse, oldest first.
    free_slots: VecDeque<usize>,
}

impl QuoteStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, StoreInner> {
        // Recover the guard on poisoning; no operation leaves the data
        // inconsistent mid-lock.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a quote, reusing the oldest tombstoned slot if one exists,
    /// otherwise appending. Returns the assigned slot index.
    ///
    /// Never fails; the caller owns any user-visible acknowledgement.
    #[instrument(skip(self, new), fields(author = %new.author))]
    pub fn create(&self, new: NewQuote) -> usize {
        let key = new.author.to_lowercase();
        let record = QuoteRecord {
            text: new.text,
            attachment_urls: new.attachment_urls,
            author: new.author,
            user_id: new.user_id,
            tombstoned: false,
        };

        let mut inner = self.inner();
        let index = match inner.free_slots.pop_front() {
            Some(slot) => {
                inner.records[slot] = record;
                slot
            }
            None => {
                inner.records.push(record);
                inner.records.len() - 1
            }
        };
        inner.author_index.entry(key).or_default().push(index);

        debug!(index, "quote created");
        index
    }

    /// Tombstone the quote at `index` and queue the slot for reuse.
    ///
    /// Fails with `NotFound` if `index` is out of range or the slot is
    /// already tombstoned; a repeated delete must not enqueue the slot
    /// twice.
    #[instrument(skip(self))]
    pub fn delete(&self, index: usize) -> StoreResult<()> {
        let mut inner = self.inner();
        let key = match inner.records.get(index) {
            Some(record) if !record.tombstoned => record.author.to_lowercase(),
            _ => return Err(StoreError::quote_not_found(index)),
        };

        // Full scan of the author's list; insertion order is the only
        // ordering guarantee it carries.
        if let Some(indices) = inner.author_index.get_mut(&key) {
            indices.retain(|&i| i != index);
            if indices.is_empty() {
                inner.author_index.remove(&key);
            }
        }

        inner.records[index] = QuoteRecord::tombstone();
        inner.free_slots.push_back(index);

        debug!(index, "quote deleted");
        Ok(())
    }

    /// Fetch the record at `index`, tombstoned or not. Callers decide how
    /// to render a tombstoned result.
    pub fn get(&self, index: usize) -> StoreResult<QuoteRecord> {
        self.inner()
            .records
            .get(index)
            .cloned()
            .ok_or_else(|| StoreError::quote_not_found(index))
    }

    /// Pick a uniformly random live quote.
    ///
    /// Tombstoned slots stay in the sampling space and are rejected after
    /// the fact, so heavily-deleted stores under-serve random picks; after
    /// [`MAX_RANDOM_ATTEMPTS`] consecutive misses the result is `Empty`,
    /// indistinguishable from a store with no quotes at all.
    pub fn random(&self) -> StoreResult<(usize, QuoteRecord)> {
        let inner = self.inner();
        if inner.records.is_empty() {
            return Err(StoreError::Empty);
        }

        let mut rng = rand::thread_rng();
        for _ in 0..MAX_RANDOM_ATTEMPTS {
            let index = rng.gen_range(0..inner.records.len());
            let record = &inner.records[index];
            if !record.tombstoned {
                return Ok((index, record.clone()));
            }
        }
        Err(StoreError::Empty)
    }

    /// Pick a uniformly random quote by author display name,
    /// case-insensitively. Every index in the author index is live, so no
    /// resampling is needed.
    pub fn random_by_author(&self, author: &str) -> StoreResult<(usize, QuoteRecord)> {
        let key = author.to_lowercase();
        let inner = self.inner();
        let indices = inner
            .author_index
            .get(&key)
            .filter(|indices| !indices.is_empty())
            .ok_or_else(|| StoreError::author_not_found(author))?;

        let index = indices[rand::thread_rng().gen_range(0..indices.len())];
        Ok((index, inner.records[index].clone()))
    }

    /// The live record in the highest-numbered slot, if any.
    ///
    /// Used by the create-from-reaction dedup guard to compare a proposed
    /// quote against the latest saved one.
    pub fn most_recent_live(&self) -> StoreResult<QuoteRecord> {
        self.inner()
            .records
            .iter()
            .rev()
            .find(|record| !record.tombstoned)
            .cloned()
            .ok_or(StoreError::Empty)
    }

    /// Iterate live quotes in ascending index order.
    ///
    /// The sequence is snapshotted under the lock and consumed without it,
    /// so it stays valid however long the caller takes; call again to
    /// restart. Intended for bulk export.
    pub fn iter_live(&self) -> impl Iterator<Item = (usize, QuoteRecord)> {
        let live: Vec<(usize, QuoteRecord)> = self
            .inner()
            .records
            .iter()
            .enumerate()
            .filter(|(_, record)| !record.tombstoned)
            .map(|(index, record)| (index, record.clone()))
            .collect();
        live.into_iter()
    }

    /// Total slot count, tombstones included.
    pub fn len(&self) -> usize {
        self.inner().records.len()
    }

    /// Whether the store has no slots at all.
    pub fn is_empty(&self) -> bool {
        self.inner().records.is_empty()
    }

    // ── snapshot support ─────────────────────────────────────────────

    /// Copy the full store state for serialization. Holds the lock only
    /// for the copy; the caller writes to disk after release.
    pub fn export(&self) -> GuildSnapshot {
        let inner = self.inner();
        GuildSnapshot {
            records: inner.records.clone(),
            author_index: inner.author_index.clone(),
            free_slots: inner.free_slots.clone(),
        }
    }

    /// Rebuild a store from a deserialized snapshot.
    pub fn from_snapshot(snapshot: GuildSnapshot) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                records: snapshot.records,
                author_index: snapshot.author_index,
                free_slots: snapshot.free_slots,
            }),
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(text: &str, author: &str, user_id: &str) -> NewQuote {
        NewQuote {
            text: text.to_string(),
            attachment_urls: Vec::new(),
            author: author.to_string(),
            user_id: user_id.to_string(),
        }
    }

    /// Assert the store invariants: author index points only at live
    /// records, free slots point only at tombstones, and the two are
    /// disjoint.
    fn assert_invariants(store: &QuoteStore) {
        let snapshot = store.export();
        for (author, indices) in &snapshot.author_index {
            for &i in indices {
                assert!(
                    !snapshot.records[i].tombstoned,
                    "author index for {author} references tombstoned slot {i}"
                );
            }
        }
        for &i in &snapshot.free_slots {
            assert!(
                snapshot.records[i].tombstoned,
                "free slot {i} references a live record"
            );
            assert!(
                !snapshot.author_index.values().any(|v| v.contains(&i)),
                "slot {i} is both free and author-indexed"
            );
        }
    }

    // ── create / delete ──────────────────────────────────────────────

    #[test]
    fn create_assigns_sequential_indices() {
        let store = QuoteStore::new();
        assert_eq!(store.create(quote("a", "Alice", "u1")), 0);
        assert_eq!(store.create(quote("b", "Bob", "u2")), 1);
        assert_eq!(store.len(), 2);
        assert_invariants(&store);
    }

    #[test]
    fn delete_tombstones_in_place() {
        let store = QuoteStore::new();
        store.create(quote("a", "Alice", "u1"));
        store.create(quote("b", "Bob", "u2"));

        store.delete(0).unwrap();

        // Slot count is unchanged; the record is the sentinel.
        assert_eq!(store.len(), 2);
        let record = store.get(0).unwrap();
        assert!(record.tombstoned);
        assert_eq!(record.text, DELETED_QUOTE_TEXT);
        assert!(record.author.is_empty());
        assert!(record.attachment_urls.is_empty());
        assert_invariants(&store);
    }

    #[test]
    fn slot_reuse_is_fifo() {
        let store = QuoteStore::new();
        store.create(quote("a", "Alice", "u1"));
        store.create(quote("b", "Bob", "u2"));
        store.delete(0).unwrap();

        // Third create lands in the reused slot, and the queue drains.
        assert_eq!(store.create(quote("c", "Carol", "u3")), 0);
        assert!(store.export().free_slots.is_empty());

        // Oldest tombstone is reused first.
        store.create(quote("d", "Dan", "u4"));
        store.delete(1).unwrap();
        store.delete(2).unwrap();
        assert_eq!(store.create(quote("e", "Eve", "u5")), 1);
        assert_eq!(store.create(quote("f", "Fay", "u6")), 2);
        assert_invariants(&store);
    }

    #[test]
    fn delete_out_of_range_is_not_found_and_leaves_store_unchanged() {
        let store = QuoteStore::new();
        store.create(quote("a", "Alice", "u1"));
        store.create(quote("b", "Bob", "u2"));
        let before = store.export();

        assert!(matches!(
            store.delete(5),
            Err(StoreError::NotFound { entity: "quote", .. })
        ));
        assert_eq!(store.export(), before);
    }

    #[test]
    fn repeated_delete_does_not_double_enqueue() {
        let store = QuoteStore::new();
        store.create(quote("a", "Alice", "u1"));
        store.delete(0).unwrap();

        assert!(store.delete(0).is_err());
        assert_eq!(store.export().free_slots.len(), 1);
        assert_invariants(&store);
    }

    // ── author index ─────────────────────────────────────────────────

    #[test]
    fn author_lookup_is_case_insensitive() {
        let store = QuoteStore::new();
        let index = store.create(quote("hi", "Bob", "u2"));

        let (found, record) = store.random_by_author("bob").unwrap();
        assert_eq!(found, index);
        assert_eq!(record.author, "Bob");

        let (found, _) = store.random_by_author("BOB").unwrap();
        assert_eq!(found, index);
    }

    #[test]
    fn delete_removes_index_from_author_list() {
        let store = QuoteStore::new();
        store.create(quote("one", "Alice", "u1"));
        store.create(quote("two", "Alice", "u1"));
        store.delete(0).unwrap();

        let snapshot = store.export();
        assert!(!snapshot.author_index["alice"].contains(&0));
        assert_eq!(snapshot.author_index["alice"], vec![1]);
        assert_invariants(&store);
    }

    #[test]
    fn author_with_no_live_quotes_is_not_found() {
        let store = QuoteStore::new();
        store.create(quote("only", "Alice", "u1"));
        store.delete(0).unwrap();

        assert!(matches!(
            store.random_by_author("alice"),
            Err(StoreError::NotFound { entity: "author", .. })
        ));
    }

    // ── random selection ─────────────────────────────────────────────

    #[test]
    fn random_on_empty_store_is_empty() {
        let store = QuoteStore::new();
        assert!(matches!(store.random(), Err(StoreError::Empty)));
    }

    #[test]
    fn random_never_returns_a_tombstone() {
        let store = QuoteStore::new();
        store.create(quote("a", "Alice", "u1"));
        store.create(quote("b", "Bob", "u2"));
        store.create(quote("c", "Carol", "u3"));
        store.delete(1).unwrap();

        for _ in 0..1000 {
            if let Ok((index, record)) = store.random() {
                assert_ne!(index, 1);
                assert_ne!(record.text, DELETED_QUOTE_TEXT);
            }
        }
    }

    #[test]
    fn random_on_fully_tombstoned_store_gives_up_as_empty() {
        let store = QuoteStore::new();
        store.create(quote("a", "Alice", "u1"));
        store.delete(0).unwrap();

        assert!(matches!(store.random(), Err(StoreError::Empty)));
    }

    // ── accessors ────────────────────────────────────────────────────

    #[test]
    fn get_out_of_range_is_not_found() {
        let store = QuoteStore::new();
        assert!(store.get(0).is_err());
    }

    #[test]
    fn most_recent_live_skips_trailing_tombstones() {
        let store = QuoteStore::new();
        assert!(matches!(store.most_recent_live(), Err(StoreError::Empty)));

        store.create(quote("first", "Alice", "u1"));
        store.create(quote("second", "Bob", "u2"));
        store.delete(1).unwrap();

        assert_eq!(store.most_recent_live().unwrap().text, "first");
    }

    #[test]
    fn iter_live_skips_tombstones_in_ascending_order() {
        let store = QuoteStore::new();
        store.create(quote("a", "Alice", "u1"));
        store.create(quote("b", "Bob", "u2"));
        store.create(quote("c", "Carol", "u3"));
        store.delete(1).unwrap();

        let live: Vec<(usize, String)> = store
            .iter_live()
            .map(|(index, record)| (index, record.text))
            .collect();
        assert_eq!(live, vec![(0, "a".to_string()), (2, "c".to_string())]);

        // Restartable: a second call yields the same sequence.
        assert_eq!(store.iter_live().count(), 2);
    }

    // ── full scenario ────────────────────────────────────────────────

    #[test]
    fn create_delete_reuse_scenario() {
        let store = QuoteStore::new();
        assert_eq!(store.create(quote("hello world", "Alice", "u1")), 0);
        assert_eq!(store.create(quote("gm", "Bob", "u2")), 1);

        store.delete(0).unwrap();
        assert_eq!(store.get(0).unwrap().text, DELETED_QUOTE_TEXT);

        assert_eq!(store.create(quote("new one", "Carol", "u3")), 0);
        assert!(store.random_by_author("alice").is_err());
        assert_invariants(&store);
    }

    #[test]
    fn invariants_hold_across_interleaved_mutations() {
        let store = QuoteStore::new();
        for round in 0..20 {
            store.create(quote(&format!("q{round}"), "Alice", "u1"));
            assert_invariants(&store);
            if round % 3 == 0 {
                store.delete(round / 3).unwrap();
                assert_invariants(&store);
            }
        }
    }
}
