//! Persistent record store contract.
//!
//! The controller only needs an ordered, crash-consistent log of opaque
//! record bodies:
//!
//! - a record that was acknowledged never reappears after a restart
//! - a record that was appended but not acknowledged always reappears
//! - `peek_oldest` yields records in strict append order
//!
//! Implementations are shared between the tick path and administrative
//! callers, so they must be safe to call through `&self` from any thread.

mod memory;

pub use memory::MemoryRecordStore;

use std::fmt;
use thiserror::Error;

/// Store-assigned record identifier.
///
/// Identifiers increase monotonically and are never reused, including across
/// `format()`, so acknowledging an erased record cannot hit a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: RecordId,
    pub body: Vec<u8>,
}

/// Usage metadata maintained by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageStats {
    /// Number of unacknowledged records.
    pub record_count: usize,
}

/// Record store error type.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store has reached its configured capacity.
    #[error("record store is full ({capacity} records)")]
    Full { capacity: usize },

    /// Persisted data failed validation.
    #[error("record store is corrupt: {0}")]
    Corrupt(String),

    /// The store has not been initialized or cannot be reached.
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    /// Error raised by the underlying storage engine.
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wrap a storage engine error.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable append/peek/acknowledge log of encoded records.
pub trait RecordStore: Send + Sync {
    /// Load existing persisted records and validate them.
    fn load(&self) -> StoreResult<()>;

    /// Discard every record and leave an empty, usable store.
    fn format(&self) -> StoreResult<()>;

    /// Durably append a record body.
    fn append(&self, body: &[u8]) -> StoreResult<RecordId>;

    /// Return the oldest unacknowledged record without removing it.
    fn peek_oldest(&self) -> StoreResult<Option<StoredRecord>>;

    /// Remove a record.
    ///
    /// Returns `false` when the record no longer exists (for example because
    /// the store was formatted after the record was read).
    fn acknowledge(&self, record: &StoredRecord) -> StoreResult<bool>;

    /// Usage metadata. Must not scan the stored records.
    fn usage_stats(&self) -> UsageStats;
}
