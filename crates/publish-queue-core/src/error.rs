//! Error types for the publish queue.

use crate::codec::CodecError;
use crate::store::StoreError;
use thiserror::Error;

/// Publish queue error type.
#[derive(Error, Debug)]
pub enum QueueError {
    /// `setup()` was called without a record store.
    #[error("no record store configured")]
    StoreNotConfigured,

    /// A required collaborator is missing.
    #[error("no {0} configured")]
    NotConfigured(&'static str),

    /// The publisher cannot deliver completions from a background context.
    #[error("publisher does not deliver completions in the background")]
    ThreadingDisabled,

    /// An operation needs a successful `setup()` first.
    #[error("publish queue is not set up")]
    NotSetUp,

    #[error("event name is empty")]
    EmptyEventName,

    #[error("event name is {len} bytes, limit is {max}")]
    EventNameTooLong { len: usize, max: usize },

    #[error("payload is {len} bytes, limit is {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using QueueError.
pub type QueueResult<T> = Result<T, QueueError>;
