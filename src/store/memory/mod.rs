//! In-memory store with optimistic transactions.
//!
//! Sessions take a snapshot of the mutable collections at `begin`, buffer
//! their writes, and validate at `commit` that no row they touched was
//! committed by another session after the snapshot. First committer wins;
//! the loser gets [`StorageError::Conflict`] and retries. This mirrors the
//! write-conflict behavior of snapshot-isolated document stores.
//!
//! The event log is held behind an `Arc`: it is immutable once seeded, so
//! snapshots share it instead of copying it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{
    Cursor, Event, ProjectionEntry, Result, RowKey, StorageError, StoreSession, Tracker,
    TransactionalStore,
};

/// A buffered write, applied to the shared state only on commit.
#[derive(Debug, Clone)]
enum WriteOp {
    InsertCursor(Cursor),
    UpdateCursor { lane: u32, last_consumed: u64 },
    InsertEntry(ProjectionEntry),
    SetTracker(u64),
}

impl WriteOp {
    fn row(&self) -> RowKey {
        match self {
            WriteOp::InsertCursor(cursor) => RowKey::Cursor(cursor.lane),
            WriteOp::UpdateCursor { lane, .. } => RowKey::Cursor(*lane),
            WriteOp::InsertEntry(entry) => RowKey::Entry(entry.sequence),
            WriteOp::SetTracker(_) => RowKey::Tracker,
        }
    }
}

#[derive(Default)]
struct Shared {
    events: Arc<BTreeMap<u64, Event>>,
    cursors: HashMap<u32, Cursor>,
    entries: BTreeMap<u64, ProjectionEntry>,
    tracker: Option<Tracker>,
    /// Commit sequence at which each row was last written.
    versions: HashMap<RowKey, u64>,
    commit_seq: u64,
}

/// In-memory transactional store.
#[derive(Default)]
pub struct MemoryStore {
    shared: Arc<RwLock<Shared>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all three collections, as the original demo does before a run.
    pub async fn reset(&self) {
        *self.shared.write().await = Shared::default();
    }

    /// Bulk-create the event log: dense sequences `0..count`, each with an
    /// opaque payload and a creation timestamp.
    pub async fn seed_events(&self, count: u64) {
        let mut events = BTreeMap::new();
        for sequence in 0..count {
            events.insert(
                sequence,
                Event {
                    sequence,
                    payload: Uuid::new_v4().to_string(),
                    created_at: Utc::now(),
                },
            );
        }
        self.shared.write().await.events = Arc::new(events);
    }

    /// Create the tracker singleton with no recorded sequence.
    pub async fn create_tracker(&self) {
        self.shared.write().await.tracker = Some(Tracker::default());
    }

    pub async fn event_count(&self) -> u64 {
        self.shared.read().await.events.len() as u64
    }

    pub async fn cursor(&self, lane: u32) -> Option<Cursor> {
        self.shared.read().await.cursors.get(&lane).copied()
    }

    pub async fn entry(&self, sequence: u64) -> Option<ProjectionEntry> {
        self.shared.read().await.entries.get(&sequence).cloned()
    }

    /// Sequences of all committed projection entries, ascending.
    pub async fn entry_sequences(&self) -> Vec<u64> {
        self.shared.read().await.entries.keys().copied().collect()
    }

    pub async fn tracker_last_processed(&self) -> Option<u64> {
        self.shared
            .read()
            .await
            .tracker
            .and_then(|tracker| tracker.last_processed)
    }

    /// Projection document count, the tracker singleton included. This is
    /// the number the run report compares against `total_events + 1`.
    pub async fn projection_size(&self) -> u64 {
        let shared = self.shared.read().await;
        shared.entries.len() as u64 + u64::from(shared.tracker.is_some())
    }
}

#[async_trait]
impl TransactionalStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreSession>> {
        let shared = self.shared.read().await;
        Ok(Box::new(MemorySession {
            shared: Arc::clone(&self.shared),
            snapshot_seq: shared.commit_seq,
            events: Arc::clone(&shared.events),
            cursors: shared.cursors.clone(),
            tracker: shared.tracker,
            reads: HashSet::new(),
            writes: Vec::new(),
            inserted_entries: HashSet::new(),
        }))
    }
}

/// One open transaction against a [`MemoryStore`].
///
/// Reads come from the snapshot with the session's own writes overlaid;
/// the tracker write is blind (nothing reads it back), so only write-write
/// races on it conflict.
struct MemorySession {
    shared: Arc<RwLock<Shared>>,
    snapshot_seq: u64,
    events: Arc<BTreeMap<u64, Event>>,
    cursors: HashMap<u32, Cursor>,
    tracker: Option<Tracker>,
    reads: HashSet<RowKey>,
    writes: Vec<WriteOp>,
    inserted_entries: HashSet<u64>,
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn find_event(&mut self, sequence: u64) -> Result<Option<Event>> {
        // The log is immutable; no read tracking needed.
        Ok(self.events.get(&sequence).cloned())
    }

    async fn find_cursor(&mut self, lane: u32) -> Result<Option<Cursor>> {
        self.reads.insert(RowKey::Cursor(lane));
        Ok(self.cursors.get(&lane).copied())
    }

    async fn insert_cursor(&mut self, cursor: Cursor) -> Result<()> {
        if self.cursors.contains_key(&cursor.lane) {
            return Err(StorageError::CursorExists { lane: cursor.lane });
        }
        self.cursors.insert(cursor.lane, cursor);
        self.writes.push(WriteOp::InsertCursor(cursor));
        Ok(())
    }

    async fn update_cursor(&mut self, lane: u32, last_consumed: u64) -> Result<()> {
        let cursor = self
            .cursors
            .get_mut(&lane)
            .ok_or(StorageError::CursorMissing { lane })?;
        cursor.last_consumed = last_consumed;
        self.writes.push(WriteOp::UpdateCursor {
            lane,
            last_consumed,
        });
        Ok(())
    }

    async fn insert_entry(&mut self, entry: ProjectionEntry) -> Result<()> {
        if !self.inserted_entries.insert(entry.sequence) {
            return Err(StorageError::DuplicateEntry {
                sequence: entry.sequence,
            });
        }
        self.writes.push(WriteOp::InsertEntry(entry));
        Ok(())
    }

    async fn set_tracker(&mut self, last_processed: u64) -> Result<()> {
        if self.tracker.is_none() {
            return Err(StorageError::TrackerMissing);
        }
        self.tracker = Some(Tracker {
            last_processed: Some(last_processed),
        });
        self.writes.push(WriteOp::SetTracker(last_processed));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut shared = this.shared.write().await;

        // Validate every row we read or wrote against versions committed
        // after our snapshot. Failing here is the conflict signal the lane
        // loop retries on.
        let written: HashSet<RowKey> = this.writes.iter().map(WriteOp::row).collect();
        for row in written.iter().chain(this.reads.iter()) {
            if let Some(&version) = shared.versions.get(row) {
                if version > this.snapshot_seq {
                    return Err(StorageError::Conflict { row: *row });
                }
            }
        }

        // Unique-index check: an entry present before our snapshot means a
        // duplicate insert, not a race.
        for op in &this.writes {
            if let WriteOp::InsertEntry(entry) = op {
                if shared.entries.contains_key(&entry.sequence) {
                    return Err(StorageError::DuplicateEntry {
                        sequence: entry.sequence,
                    });
                }
            }
        }

        if this.writes.is_empty() {
            return Ok(());
        }

        shared.commit_seq += 1;
        let commit_seq = shared.commit_seq;
        for op in this.writes {
            shared.versions.insert(op.row(), commit_seq);
            match op {
                WriteOp::InsertCursor(cursor) => {
                    shared.cursors.insert(cursor.lane, cursor);
                }
                WriteOp::UpdateCursor {
                    lane,
                    last_consumed,
                } => {
                    if let Some(cursor) = shared.cursors.get_mut(&lane) {
                        cursor.last_consumed = last_consumed;
                    }
                }
                WriteOp::InsertEntry(entry) => {
                    shared.entries.insert(entry.sequence, entry);
                }
                WriteOp::SetTracker(last_processed) => {
                    if let Some(tracker) = shared.tracker.as_mut() {
                        tracker.last_processed = Some(last_processed);
                    }
                }
            }
        }

        debug!(commit_seq, "transaction committed");
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        // Buffered writes die with the session; nothing was published.
        debug!(buffered = self.writes.len(), "transaction aborted");
        Ok(())
    }
}
