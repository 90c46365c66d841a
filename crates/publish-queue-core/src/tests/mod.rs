//! Controller tests.
//!
//! - `ordering.rs`    - FIFO delivery and the single in-flight publish
//! - `retry.rs`       - Failure backoff, unaccepted publishes, at-least-once removal
//! - `sleep.rs`       - Sleep-readiness and pause/resume
//! - `invalid.rs`     - Corrupt and nameless records
//! - `lifecycle.rs`   - Setup preconditions, clear, stale completions, install
//! - `concurrency.rs` - Completions and enqueues from other threads

mod ordering;

use crate::clock::ManualClock;
use crate::config::QueueConfig;
use crate::connectivity::ConnectivityFlag;
use crate::controller::PublishQueue;
use crate::event::PublishFlags;
use crate::store::MemoryRecordStore;
use crate::transport::{PublishCompletion, RecordingPublisher};
use parking_lot::Mutex;
use std::sync::Arc;

pub(crate) const AFTER_CONNECT: u64 = 2_000;
pub(crate) const BETWEEN_PUBLISH: u64 = 1_000;
pub(crate) const AFTER_FAILURE: u64 = 30_000;

/// A queue wired to in-memory collaborators and a manual clock.
pub(crate) struct Harness {
    pub store: Arc<MemoryRecordStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub link: ConnectivityFlag,
    pub clock: ManualClock,
    pub completions: Arc<Mutex<Vec<PublishCompletion>>>,
    pub queue: PublishQueue,
}

impl Harness {
    /// Set up, offline.
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryRecordStore::new()))
    }

    pub fn with_store(store: Arc<MemoryRecordStore>) -> Self {
        let harness = Self::unconfigured(store);
        harness.queue.setup().unwrap();
        harness
    }

    /// Built but not set up.
    pub fn unconfigured(store: Arc<MemoryRecordStore>) -> Self {
        let publisher = Arc::new(RecordingPublisher::new());
        let link = ConnectivityFlag::new(false);
        let clock = ManualClock::new(0);
        let completions = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&completions);
        let queue = PublishQueue::new()
            .with_store(store.clone())
            .with_publisher(publisher.clone())
            .with_connectivity(Arc::new(link.clone()))
            .with_clock(Arc::new(clock.clone()))
            .with_config(QueueConfig::default())
            .with_publish_complete_handler(move |c: &PublishCompletion| {
                sink.lock().push(c.clone())
            });

        Self {
            store,
            publisher,
            link,
            clock,
            completions,
            queue,
        }
    }

    /// Set up, online, with the post-connect hold already elapsed.
    pub fn online() -> Self {
        let harness = Self::new();
        harness.connect();
        harness
    }

    /// Bring the link up and wait out the post-connect hold.
    pub fn connect(&self) {
        self.link.set_online(true);
        self.queue.tick();
        self.clock.advance(AFTER_CONNECT);
    }

    pub fn enqueue(&self, name: &str, payload: &str) {
        self.queue
            .enqueue(name, payload, PublishFlags::WITH_ACK)
            .unwrap();
    }

    pub fn advance_and_tick(&self, ms: u64) {
        self.clock.advance(ms);
        self.queue.tick();
    }

    /// Names of every publish request so far.
    pub fn published_names(&self) -> Vec<String> {
        self.publisher
            .requests()
            .into_iter()
            .map(|event| event.name)
            .collect()
    }

    pub fn completion_outcomes(&self) -> Vec<bool> {
        self.completions.lock().iter().map(|c| c.succeeded).collect()
    }
}

/// Offline enqueue, then delivery once the link comes up.
#[test]
fn offline_event_is_delivered_after_connect() {
    let h = Harness::new();

    h.enqueue("testEvent", "1");
    assert_eq!(h.queue.num_events(), 1);

    // Offline: nothing goes out
    h.advance_and_tick(60_000);
    assert!(h.publisher.requests().is_empty());
    assert!(!h.queue.can_sleep());

    h.link.set_online(true);
    h.queue.tick();
    assert!(h.publisher.requests().is_empty());

    // Within one hold interval exactly one publish
    h.advance_and_tick(AFTER_CONNECT);
    let requests = h.publisher.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].name, "testEvent");
    assert_eq!(requests[0].payload, "1");
    assert_eq!(requests[0].flags, PublishFlags::WITH_ACK);

    // Still counted while in flight
    assert_eq!(h.queue.num_events(), 1);

    assert!(h.publisher.complete_next(true));
    h.queue.tick();
    assert_eq!(h.queue.num_events(), 0);
    assert_eq!(h.completion_outcomes(), vec![true]);

    let completion = h.completions.lock()[0].clone();
    assert_eq!(completion.name, "testEvent");
    assert_eq!(completion.payload, "1");

    let metrics = h.queue.metrics();
    assert_eq!(metrics.enqueued, 1);
    assert_eq!(metrics.published, 1);
    assert_eq!(metrics.publish_failures, 0);
    assert!(!metrics.in_flight);
}
