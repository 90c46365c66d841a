//! # publish-queue-store
//!
//! SQLite-backed [`RecordStore`](publish_queue_core::RecordStore).
//!
//! - Every append is committed before it returns
//! - WAL journal with `synchronous = FULL`, so a committed append or
//!   acknowledge survives power loss
//! - Record ids come from an AUTOINCREMENT column and are never reused,
//!   unless `format` has to recreate an unreadable file
//! - Several processes may share one file; each handle's record count
//!   follows the others' commits

mod sqlite;

pub use sqlite::SqliteRecordStore;
