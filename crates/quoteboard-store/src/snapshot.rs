//! Durable snapshots of the guild registry.
//!
//! The whole registry serializes to a single versioned JSON file. Disk is
//! a write-behind backup, not a source of truth: the file is read once at
//! startup and overwritten in full on every save. Saves copy each store's
//! state under that store's lock, release, and only then touch disk, so
//! no lock is ever held across I/O. The snapshot is not an atomic
//! point-in-time view across guilds; each guild's entry is consistent on
//! its own.
//!
//! Writes go to a temporary file beside the target and are renamed into
//! place, so a crash mid-write never leaves a half-written snapshot.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::quote::{QuoteRecord, QuoteStore};
use crate::registry::GuildRegistry;

/// Current on-disk schema version. Bump on shape changes and migrate
/// deliberately; unknown versions are rejected at load.
const SNAPSHOT_VERSION: u32 = 1;

/// How often the background flush runs unless configured otherwise.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

// ═══════════════════════════════════════════════════════════════════════
//  Snapshot schema
// ═══════════════════════════════════════════════════════════════════════

/// One guild's serialized store state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildSnapshot {
    pub records: Vec<QuoteRecord>,
    #[serde(default)]
    pub author_index: HashMap<String, Vec<usize>>,
    #[serde(default)]
    pub free_slots: VecDeque<usize>,
}

/// The full snapshot file.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    guilds: BTreeMap<String, GuildSnapshot>,
}

// ═══════════════════════════════════════════════════════════════════════
//  Snapshotter
// ═══════════════════════════════════════════════════════════════════════

/// Reads and writes the registry snapshot file. Cheap to clone; clones
/// share the registry.
#[derive(Clone)]
pub struct Snapshotter {
    path: PathBuf,
    registry: Arc<GuildRegistry>,
}

impl Snapshotter {
    /// Create a snapshotter for `path` over `registry`.
    pub fn new(path: impl Into<PathBuf>, registry: Arc<GuildRegistry>) -> Self {
        Self {
            path: path.into(),
            registry,
        }
    }

    /// Populate the registry from the snapshot file.
    ///
    /// A missing file leaves the registry empty and is not an error. An
    /// unreadable file is `Io`; unparsable or internally inconsistent
    /// content is `Format`, which the caller must treat as fatal at
    /// startup. Returns the number of guilds loaded.
    pub fn load_all(&self) -> StoreResult<usize> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no snapshot file yet, starting empty");
                return Ok(0);
            }
            Err(err) => return Err(err.into()),
        };

        let file: SnapshotFile =
            serde_json::from_slice(&bytes).map_err(|err| StoreError::Format(err.to_string()))?;
        if file.version != SNAPSHOT_VERSION {
            return Err(StoreError::Format(format!(
                "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                file.version
            )));
        }

        let mut loaded = 0;
        for (guild_id, snapshot) in file.guilds {
            validate(&guild_id, &snapshot)?;
            self.registry
                .insert(guild_id, QuoteStore::from_snapshot(snapshot));
            loaded += 1;
        }

        info!(guilds = loaded, path = %self.path.display(), "snapshot loaded");
        Ok(loaded)
    }

    /// Write the full current state of every guild's store to the
    /// snapshot file, atomically replacing the previous one.
    pub async fn save_all(&self) -> StoreResult<()> {
        let mut guilds = BTreeMap::new();
        for guild_id in self.registry.guild_ids() {
            if let Some(store) = self.registry.get(&guild_id) {
                guilds.insert(guild_id, store.export());
            }
        }

        let file = SnapshotFile {
            version: SNAPSHOT_VERSION,
            guilds,
        };
        let bytes =
            serde_json::to_vec(&file).map_err(|err| StoreError::Format(err.to_string()))?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes)).await??;

        debug!(guilds = file.guilds.len(), path = %self.path.display(), "snapshot saved");
        Ok(())
    }

    /// Spawn a background task that saves every `interval`.
    ///
    /// Save failures are logged and retried on the next tick; they never
    /// stop the task. Call [`PeriodicFlush::stop`] on shutdown, then run
    /// one final [`Snapshotter::save_all`] to cover the tail interval.
    pub fn spawn_periodic(&self, interval: Duration) -> PeriodicFlush {
        let snapshotter = self.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());

        let task_shutdown = Arc::clone(&shutdown);
        let task_notify = Arc::clone(&notify);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            ticker.tick().await;

            info!(interval_secs = interval.as_secs(), "periodic snapshot flush started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(error) = snapshotter.save_all().await {
                            warn!(%error, "periodic snapshot save failed");
                        }
                    }
                    _ = task_notify.notified() => {}
                }
                if task_shutdown.load(Ordering::Acquire) {
                    break;
                }
            }
            info!("periodic snapshot flush stopped");
        });

        PeriodicFlush {
            handle,
            shutdown,
            notify,
        }
    }
}

/// Handle to the background flush task.
pub struct PeriodicFlush {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl PeriodicFlush {
    /// Stop the flush task and wait for it to exit.
    pub async fn stop(self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_one();
        let _ = self.handle.await;
    }
}

// ── helpers ──────────────────────────────────────────────────────────

/// Reject snapshots whose indices contradict the store invariants.
fn validate(guild_id: &str, snapshot: &GuildSnapshot) -> StoreResult<()> {
    let len = snapshot.records.len();
    for (author, indices) in &snapshot.author_index {
        for &index in indices {
            match snapshot.records.get(index) {
                Some(record) if !record.tombstoned => {}
                _ => {
                    return Err(StoreError::Format(format!(
                        "guild {guild_id}: author index for {author} references \
                         invalid slot {index}"
                    )));
                }
            }
        }
    }
    for &index in &snapshot.free_slots {
        match snapshot.records.get(index) {
            Some(record) if record.tombstoned => {}
            _ => {
                return Err(StoreError::Format(format!(
                    "guild {guild_id}: free slot {index} out of range or live \
                     (store has {len} records)"
                )));
            }
        }
    }
    Ok(())
}

/// Write `bytes` to a temporary file beside `path`, then rename it into
/// place. Rename within a directory is atomic on the platforms we run on.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

// ── tests ────────────────────────────────────────────────────────────
