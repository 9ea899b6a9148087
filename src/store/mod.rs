//! Storage interfaces and domain records.
//!
//! Three collections back the drain: the event log (immutable once seeded),
//! one cursor row per lane, and the projection (derived entries plus the
//! tracker singleton). All consumption-path access goes through a
//! [`StoreSession`], so a whole step commits or vanishes as one unit.

use std::fmt;

use chrono::{DateTime, Utc};

mod memory;
mod session;

pub use memory::MemoryStore;
pub use session::{StoreSession, TransactionalStore};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Another transaction committed a write to this row after our snapshot.
    #[error("write conflict on {row}")]
    Conflict { row: RowKey },

    #[error("projection entry already exists for sequence {sequence}")]
    DuplicateEntry { sequence: u64 },

    #[error("cursor already exists for lane {lane}")]
    CursorExists { lane: u32 },

    #[error("no cursor to update for lane {lane}")]
    CursorMissing { lane: u32 },

    #[error("tracker document has not been created")]
    TrackerMissing,
}

impl StorageError {
    /// Conflicts are recovered by aborting and retrying the step; everything
    /// else ends the lane.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

/// Identity of a mutable row, for conflict reporting and version tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKey {
    /// A lane's cursor row.
    Cursor(u32),
    /// A projection entry, keyed by event sequence.
    Entry(u64),
    /// The tracker singleton.
    Tracker,
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Cursor(lane) => write!(f, "cursor[lane={lane}]"),
            RowKey::Entry(sequence) => write!(f, "entry[sequence={sequence}]"),
            RowKey::Tracker => write!(f, "tracker"),
        }
    }
}

/// One event in the pre-populated log. Immutable after seeding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Dense, zero-based, unique. The only field the consumption step reads.
    pub sequence: u64,
    /// Opaque payload, passed through to the projection unchanged.
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// A lane's private progress record: the highest sequence it has consumed.
///
/// Absent until the lane's first success. Owned exclusively by its lane;
/// nothing at the storage layer enforces this, the partition arithmetic
/// keeps lanes on disjoint rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub lane: u32,
    pub last_consumed: u64,
}

/// Derived output: a consumed event plus its processing timestamp.
/// Created exactly once per event, never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionEntry {
    pub sequence: u64,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

impl ProjectionEntry {
    pub fn from_event(event: Event, processed_at: DateTime<Utc>) -> Self {
        Self {
            sequence: event.sequence,
            payload: event.payload,
            created_at: event.created_at,
            processed_at,
        }
    }
}

/// Shared singleton recording the most recently committed entry's sequence.
///
/// Every lane overwrites it; the value reflects the most recent commit, not
/// a monotonic watermark. Created empty before the run starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tracker {
    pub last_processed: Option<u64>,
}
