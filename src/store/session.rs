//! Transactional session traits.

use async_trait::async_trait;

use super::{Cursor, Event, ProjectionEntry, Result};

/// Entry point to atomic store access.
///
/// Implementations:
/// - `MemoryStore`: in-memory optimistic-concurrency backend
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// Open a session. Reads observe a consistent snapshot of all three
    /// collections as of this call; writes buffer until `commit`.
    async fn begin(&self) -> Result<Box<dyn StoreSession>>;
}

/// One open transaction against the event log, cursor rows, and projection.
///
/// All operations act on the session's snapshot plus its own buffered
/// writes. Nothing is visible to other sessions until `commit` succeeds,
/// and `commit` itself may fail with [`StorageError::Conflict`] when a row
/// in the write set was committed by someone else after the snapshot.
/// Callers treat that exactly like any other aborted attempt.
///
/// [`StorageError::Conflict`]: super::StorageError::Conflict
#[async_trait]
pub trait StoreSession: Send {
    /// Point lookup in the event log. The log is read-only here.
    async fn find_event(&mut self, sequence: u64) -> Result<Option<Event>>;

    /// Look up a lane's cursor row.
    async fn find_cursor(&mut self, lane: u32) -> Result<Option<Cursor>>;

    /// Create a lane's cursor row. Fails if it already exists.
    async fn insert_cursor(&mut self, cursor: Cursor) -> Result<()>;

    /// Advance an existing cursor row. Fails if it does not exist.
    async fn update_cursor(&mut self, lane: u32, last_consumed: u64) -> Result<()>;

    /// Append a projection entry. The sequence is unique within the
    /// projection; a duplicate is rejected.
    async fn insert_entry(&mut self, entry: ProjectionEntry) -> Result<()>;

    /// Overwrite the tracker singleton's last-processed sequence.
    async fn set_tracker(&mut self, last_processed: u64) -> Result<()>;

    /// Publish the buffered writes atomically.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard the buffered writes.
    async fn abort(self: Box<Self>) -> Result<()>;
}
