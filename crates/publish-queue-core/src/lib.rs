//! # publish-queue-core
//!
//! Durable store-and-forward publish queue for intermittently connected
//! devices. Events are persisted before anything touches the network and are
//! removed only after the transport reports a successful publish.
//!
//! ## Guarantees
//!
//! - **At-least-once** - a record leaves the store only on publish success
//! - **Strict FIFO** - the oldest valid record is always published next
//! - **One in flight** - never more than one outstanding publish
//! - **Invalid records are dropped** - undecodable records are discarded, never retried
//!
//! ## Architecture
//!
//! ```text
//! enqueue:  event → codec → RecordStore::append
//! tick:     RecordStore::peek_oldest → codec → Publisher::publish
//! complete: CompletionNotifier → acknowledge | backoff
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use publish_queue_core::{
//!     ConnectivityFlag, MemoryRecordStore, PublishFlags, PublishQueue, RecordingPublisher,
//! };
//!
//! let store = Arc::new(MemoryRecordStore::new());
//! let publisher = Arc::new(RecordingPublisher::new());
//! let link = ConnectivityFlag::new(false);
//!
//! let queue = PublishQueue::new()
//!     .with_store(store)
//!     .with_publisher(publisher)
//!     .with_connectivity(Arc::new(link.clone()));
//! queue.setup().unwrap();
//!
//! queue.enqueue("testEvent", "1", PublishFlags::WITH_ACK).unwrap();
//! assert_eq!(queue.num_events(), 1);
//! ```

pub mod clock;
pub mod codec;
pub mod config;
pub mod connectivity;
pub mod controller;
pub mod error;
pub mod event;
pub mod machine;
pub mod store;
pub mod transport;

#[cfg(test)]
mod tests;

pub use clock::{ManualClock, MonotonicClock, SystemClock};
pub use codec::{CodecError, CodecResult};
pub use config::QueueConfig;
pub use connectivity::{Connectivity, ConnectivityFlag};
pub use controller::{PublishQueue, QueueMetrics, SetupOutcome, SystemEvent};
pub use error::{QueueError, QueueResult};
pub use event::{PublishFlags, QueuedEvent};
pub use machine::{DrainInput, DrainMachine, DrainState, QueueState};
pub use store::{
    MemoryRecordStore, RecordId, RecordStore, StoreError, StoreResult, StoredRecord, UsageStats,
};
pub use transport::{
    CompletionNotifier, PublishCompleteHandler, PublishCompletion, Publisher, RecordingPublisher,
};
