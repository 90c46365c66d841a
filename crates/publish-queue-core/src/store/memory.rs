//! In-memory record store.
//!
//! Not durable across process restarts. Used by tests, demos and RAM-only
//! devices. Load, format and peek failures can be injected to exercise the
//! setup fallback and read backoff paths.

use super::{RecordId, RecordStore, StoreError, StoreResult, StoredRecord, UsageStats};
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Debug, Default)]
struct MemoryInner {
    records: VecDeque<StoredRecord>,
    next_id: u64,
    fail_load: bool,
    fail_format: bool,
    fail_peek: bool,
}

/// Bounded in-memory record store.
#[derive(Debug)]
pub struct MemoryRecordStore {
    inner: Mutex<MemoryInner>,
    capacity: usize,
}

impl MemoryRecordStore {
    /// Default capacity in records.
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Create an empty store with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Create an empty store holding at most `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                next_id: 1,
                ..Default::default()
            }),
            capacity,
        }
    }

    /// Make subsequent `load()` calls fail.
    pub fn fail_load(&self, fail: bool) {
        self.inner.lock().fail_load = fail;
    }

    /// Make subsequent `format()` calls fail.
    pub fn fail_format(&self, fail: bool) {
        self.inner.lock().fail_format = fail;
    }

    /// Make subsequent `peek_oldest()` calls fail.
    pub fn fail_peek(&self, fail: bool) {
        self.inner.lock().fail_peek = fail;
    }

    /// Snapshot of the stored record bodies, oldest first.
    pub fn bodies(&self) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .records
            .iter()
            .map(|r| r.body.clone())
            .collect()
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for MemoryRecordStore {
    fn load(&self) -> StoreResult<()> {
        if self.inner.lock().fail_load {
            return Err(StoreError::Corrupt("injected load failure".to_string()));
        }
        Ok(())
    }

    fn format(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.fail_format {
            return Err(StoreError::Unavailable(
                "injected format failure".to_string(),
            ));
        }
        inner.records.clear();
        Ok(())
    }

    fn append(&self, body: &[u8]) -> StoreResult<RecordId> {
        let mut inner = self.inner.lock();
        if inner.records.len() >= self.capacity {
            return Err(StoreError::Full {
                capacity: self.capacity,
            });
        }
        let id = RecordId(inner.next_id);
        inner.next_id += 1;
        inner.records.push_back(StoredRecord {
            id,
            body: body.to_vec(),
        });
        Ok(id)
    }

    fn peek_oldest(&self) -> StoreResult<Option<StoredRecord>> {
        let inner = self.inner.lock();
        if inner.fail_peek {
            return Err(StoreError::Unavailable("injected peek failure".to_string()));
        }
        Ok(inner.records.front().cloned())
    }

    fn acknowledge(&self, record: &StoredRecord) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        match inner.records.iter().position(|r| r.id == record.id) {
            Some(pos) => {
                inner.records.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn usage_stats(&self) -> UsageStats {
        UsageStats {
            record_count: self.inner.lock().records.len(),
        }
    }
}
