//! SQLite record store.

use parking_lot::Mutex;
use publish_queue_core::{RecordId, RecordStore, StoreError, StoreResult, StoredRecord, UsageStats};
use rusqlite::{params, Connection, OptionalExtension};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

struct Inner {
    conn: Connection,
    record_count: usize,
    /// `PRAGMA data_version` at the last recount. Changes when another
    /// connection commits to the same file.
    data_version: Option<i64>,
}

impl Inner {
    fn new(conn: Connection) -> Self {
        Self {
            conn,
            record_count: 0,
            data_version: None,
        }
    }

    fn recount(&mut self) -> rusqlite::Result<()> {
        self.data_version = Some(data_version(&self.conn)?);
        self.record_count = count_rows(&self.conn)?;
        Ok(())
    }

    /// Recount only if another connection has committed since the last count.
    fn refresh(&mut self) -> rusqlite::Result<()> {
        let version = data_version(&self.conn)?;
        if self.data_version != Some(version) {
            let count = count_rows(&self.conn)?;
            if self.data_version.is_some() {
                debug!(from = self.record_count, to = count, "Record count changed externally");
            }
            self.record_count = count;
            self.data_version = Some(version);
        }
        Ok(())
    }
}

/// Durable record store in a single SQLite table.
///
/// The record count is cached and only recounted when another connection
/// (for example another `pubq` process) has written to the same file, so
/// `usage_stats` is a single pragma read in the common case.
pub struct SqliteRecordStore {
    /// `None` for in-memory stores.
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
    max_records: Option<usize>,
}

impl SqliteRecordStore {
    /// Opens the store at the given path.
    ///
    /// Creates the parent directory, database and schema if they don't exist.
    /// An existing file that is not a usable database does not fail here:
    /// `load()` reports it and `format()` rebuilds it.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StoreError::backend)?;
            }
        }

        let conn = connect(path).map_err(StoreError::backend)?;
        let store = Self {
            path: Some(path.to_path_buf()),
            inner: Mutex::new(Inner::new(conn)),
            max_records: None,
        };

        {
            let mut inner = store.inner.lock();
            let ready = prepare(&inner.conn, true).and_then(|()| inner.recount());
            match ready {
                Ok(()) => info!(
                    path = %path.display(),
                    records = inner.record_count,
                    "Opened record store"
                ),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "Record store is not usable until formatted"
                ),
            }
        }
        Ok(store)
    }

    /// Creates an in-memory store.
    ///
    /// Useful for testing.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::backend)?;
        let mut inner = Inner::new(conn);
        prepare(&inner.conn, false).map_err(StoreError::backend)?;
        inner.recount().map_err(StoreError::backend)?;
        Ok(Self {
            path: None,
            inner: Mutex::new(inner),
            max_records: None,
        })
    }

    /// Limit the number of unacknowledged records.
    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = Some(max_records);
        self
    }

    /// Replace an unusable database file with an empty one.
    fn rebuild(&self, inner: &mut Inner, path: &Path) -> StoreResult<()> {
        let placeholder = Connection::open_in_memory().map_err(StoreError::backend)?;
        let old = std::mem::replace(&mut inner.conn, placeholder);
        if let Err((_, e)) = old.close() {
            warn!(error = %e, "Failed to close record store cleanly");
        }

        for file in [path.to_path_buf(), sidecar(path, "-wal"), sidecar(path, "-shm")] {
            match std::fs::remove_file(&file) {
                Ok(()) => debug!(file = %file.display(), "Removed record store file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::backend(e)),
            }
        }

        inner.conn = connect(path).map_err(StoreError::backend)?;
        prepare(&inner.conn, true).map_err(StoreError::backend)?;
        info!(path = %path.display(), "Rebuilt record store");
        Ok(())
    }
}

fn connect(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

/// Journal settings and schema.
fn prepare(conn: &Connection, durable: bool) -> rusqlite::Result<()> {
    if durable {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
        ",
        )?;
    }
    init_schema(conn)
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS queued_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            body BLOB NOT NULL,
            created_at INTEGER NOT NULL
        );
        "#,
    )
}

fn count_rows(conn: &Connection) -> rusqlite::Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM queued_records", [], |row| {
        row.get(0)
    })?;
    Ok(usize::try_from(count).unwrap_or(0))
}

fn data_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("PRAGMA data_version", [], |row| row.get(0))
}

fn clear_rows(conn: &mut Connection) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;
    init_schema(&tx)?;
    let removed = tx.execute("DELETE FROM queued_records", [])?;
    tx.commit()?;
    Ok(removed)
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

impl RecordStore for SqliteRecordStore {
    fn load(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();

        let check: String = inner
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(StoreError::backend)?;
        if check != "ok" {
            warn!(result = %check, "Record store failed integrity check");
            return Err(StoreError::Corrupt(check));
        }

        prepare(&inner.conn, self.path.is_some()).map_err(StoreError::backend)?;
        inner.recount().map_err(StoreError::backend)?;
        debug!(records = inner.record_count, "Loaded record store");
        Ok(())
    }

    /// Deletes every record, keeping the id sequence. A file that cannot be
    /// cleared in place is deleted and recreated.
    fn format(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();

        let cleared = prepare(&inner.conn, self.path.is_some())
            .and_then(|()| clear_rows(&mut inner.conn));
        match (cleared, &self.path) {
            (Ok(removed), _) => info!(removed, "Formatted record store"),
            (Err(e), Some(path)) => {
                warn!(error = %e, "Record store cannot be cleared, recreating");
                self.rebuild(&mut inner, path)?;
            }
            (Err(e), None) => return Err(StoreError::backend(e)),
        }

        inner.recount().map_err(StoreError::backend)?;
        Ok(())
    }

    fn append(&self, body: &[u8]) -> StoreResult<RecordId> {
        let mut inner = self.inner.lock();
        inner.refresh().map_err(StoreError::backend)?;

        if let Some(max) = self.max_records {
            if inner.record_count >= max {
                return Err(StoreError::Full { capacity: max });
            }
        }

        let now = chrono::Utc::now().timestamp_millis();
        inner
            .conn
            .execute(
                "INSERT INTO queued_records (body, created_at) VALUES (?1, ?2)",
                params![body, now],
            )
            .map_err(StoreError::backend)?;
        let id = RecordId(inner.conn.last_insert_rowid() as u64);

        inner.record_count += 1;
        Ok(id)
    }

    fn peek_oldest(&self) -> StoreResult<Option<StoredRecord>> {
        let inner = self.inner.lock();
        inner
            .conn
            .query_row(
                "SELECT id, body FROM queued_records ORDER BY id LIMIT 1",
                [],
                |row| {
                    Ok(StoredRecord {
                        id: RecordId(row.get::<_, i64>(0)? as u64),
                        body: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::backend)
    }

    fn acknowledge(&self, record: &StoredRecord) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        inner.refresh().map_err(StoreError::backend)?;

        let removed = inner
            .conn
            .execute(
                "DELETE FROM queued_records WHERE id = ?1",
                params![record.id.0 as i64],
            )
            .map_err(StoreError::backend)?;

        if removed == 0 {
            return Ok(false);
        }
        inner.record_count = inner.record_count.saturating_sub(removed);
        Ok(true)
    }

    fn usage_stats(&self) -> UsageStats {
        let mut inner = self.inner.lock();
        if let Err(e) = inner.refresh() {
            debug!(error = %e, "Failed to refresh record count");
        }
        UsageStats {
            record_count: inner.record_count,
        }
    }
}
