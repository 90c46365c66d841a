//! Transport publisher contract and completion plumbing.
//!
//! A publisher accepts one event at a time together with a one-shot
//! [`CompletionNotifier`]. The notifier may be fired from any thread, after
//! `publish` has returned.

use crate::event::{PublishFlags, QueuedEvent};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use tracing::warn;

type NotifyFn = Box<dyn FnOnce(bool) + Send + 'static>;

/// One-shot completion signal for an accepted publish.
///
/// Dropping a notifier without calling [`notify`](Self::notify) or
/// [`cancel`](Self::cancel) reports a failed publish.
pub struct CompletionNotifier {
    attempt: u64,
    callback: Option<NotifyFn>,
}

impl CompletionNotifier {
    pub fn new<F>(attempt: u64, callback: F) -> Self
    where
        F: FnOnce(bool) + Send + 'static,
    {
        Self {
            attempt,
            callback: Some(Box::new(callback)),
        }
    }

    /// Publish attempt this notifier belongs to.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Report the outcome of the publish.
    pub fn notify(mut self, succeeded: bool) {
        if let Some(callback) = self.callback.take() {
            callback(succeeded);
        }
    }

    /// Discard the notifier without reporting anything.
    ///
    /// Used by publishers that refuse a request: the caller already knows the
    /// outcome from the `false` return of `publish`.
    pub fn cancel(mut self) {
        self.callback = None;
    }
}

impl Drop for CompletionNotifier {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            warn!(
                attempt = self.attempt,
                "Completion notifier dropped without a result, reporting failure"
            );
            callback(false);
        }
    }
}

impl fmt::Debug for CompletionNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionNotifier")
            .field("attempt", &self.attempt)
            .field("armed", &self.callback.is_some())
            .finish()
    }
}

/// Asynchronous cloud publisher.
pub trait Publisher: Send + Sync {
    /// Start publishing `event`.
    ///
    /// Returns `false` if the request was not accepted, in which case the
    /// notifier must not be fired.
    fn publish(&self, event: QueuedEvent, notifier: CompletionNotifier) -> bool;

    /// Whether completions are delivered from a background context.
    ///
    /// The controller refuses to set up when this is `false`.
    fn background_delivery(&self) -> bool {
        true
    }
}

/// Outcome of a completed publish attempt, handed to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishCompletion {
    pub succeeded: bool,
    pub name: String,
    pub payload: String,
    pub flags: PublishFlags,
}

/// Application hook invoked once per completed publish attempt.
pub trait PublishCompleteHandler: Send + Sync {
    fn on_publish_complete(&self, completion: &PublishCompletion);
}

impl<F> PublishCompleteHandler for F
where
    F: Fn(&PublishCompletion) + Send + Sync,
{
    fn on_publish_complete(&self, completion: &PublishCompletion) {
        self(completion)
    }
}

#[derive(Default)]
struct RecordingInner {
    requests: Vec<QueuedEvent>,
    pending: VecDeque<CompletionNotifier>,
    refusing: bool,
    refused: usize,
    max_outstanding: usize,
}

/// Publisher that records requests and completes them on demand.
///
/// Useful for tests and for exercising the controller without a network.
pub struct RecordingPublisher {
    inner: Mutex<RecordingInner>,
    background: bool,
}

impl RecordingPublisher {
    /// Publisher reporting background completion delivery.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RecordingInner::default()),
            background: true,
        }
    }

    /// Publisher that reports no background completion delivery.
    pub fn foreground() -> Self {
        Self {
            background: false,
            ..Self::new()
        }
    }

    /// Accept or refuse subsequent publish requests.
    pub fn set_accepting(&self, accepting: bool) {
        self.inner.lock().refusing = !accepting;
    }

    /// Every accepted request, in order.
    pub fn requests(&self) -> Vec<QueuedEvent> {
        self.inner.lock().requests.clone()
    }

    /// Number of refused requests.
    pub fn refused(&self) -> usize {
        self.inner.lock().refused
    }

    /// Accepted requests whose notifier has not fired yet.
    pub fn outstanding(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Highest number of simultaneously outstanding requests observed.
    pub fn max_outstanding(&self) -> usize {
        self.inner.lock().max_outstanding
    }

    /// Fire the oldest outstanding notifier.
    ///
    /// Returns `false` if nothing was outstanding.
    pub fn complete_next(&self, succeeded: bool) -> bool {
        let notifier = self.inner.lock().pending.pop_front();
        match notifier {
            Some(notifier) => {
                notifier.notify(succeeded);
                true
            }
            None => false,
        }
    }

    /// Take ownership of every outstanding notifier.
    pub fn take_pending(&self) -> Vec<CompletionNotifier> {
        self.inner.lock().pending.drain(..).collect()
    }
}

impl Default for RecordingPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, event: QueuedEvent, notifier: CompletionNotifier) -> bool {
        let mut inner = self.inner.lock();
        if inner.refusing {
            inner.refused += 1;
            drop(inner);
            notifier.cancel();
            return false;
        }
        inner.requests.push(event);
        inner.pending.push_back(notifier);
        inner.max_outstanding = inner.max_outstanding.max(inner.pending.len());
        true
    }

    fn background_delivery(&self) -> bool {
        self.background
    }
}
