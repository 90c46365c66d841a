//! Drain/retry controller.
//!
//! `PublishQueue` owns the drain state machine and every piece of state the
//! tick path shares with publish completions. All of it lives behind one
//! `parking_lot::Mutex`; each entry point takes the lock once and releases it
//! before calling into the publisher or the application's completion handler.
//!
//! ```text
//! enqueue ──► codec::encode ──► RecordStore::append
//!
//! tick ──► ConnectWaiting ──► Waiting ──► peek_oldest ──► Publisher::publish
//!                                  ▲                          │
//!                                  └── acknowledge / backoff ◄┘ CompletionNotifier
//! ```

use crate::clock::{MonotonicClock, SystemClock};
use crate::codec;
use crate::config::QueueConfig;
use crate::connectivity::Connectivity;
use crate::event::{PublishFlags, QueuedEvent};
use crate::machine::{DrainInput, DrainMachine, DrainState, Hold, QueueState};
use crate::store::{RecordStore, StoredRecord};
use crate::transport::{CompletionNotifier, PublishCompleteHandler, PublishCompletion, Publisher};
use crate::{QueueError, QueueResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, trace, warn};

static GLOBAL: OnceLock<PublishQueue> = OnceLock::new();

/// How `setup()` brought the record store up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupOutcome {
    /// Existing records were loaded.
    Loaded,
    /// Loading failed; the store was formatted and starts empty.
    Formatted,
    /// Loading and formatting both failed. The controller runs, but store
    /// operations are expected to fail.
    Degraded,
}

impl SetupOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, SetupOutcome::Degraded)
    }
}

/// Platform notifications forwarded by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    /// The device is about to reset.
    Reset,
    /// The cloud session is being torn down.
    CloudDisconnecting,
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub state: QueueState,
    pub num_events: usize,
    pub in_flight: bool,
    pub paused: bool,
    pub can_sleep: bool,
    pub enqueued: u64,
    pub enqueue_failures: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub discarded: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    enqueued: u64,
    enqueue_failures: u64,
    published: u64,
    publish_failures: u64,
    discarded: u64,
}

/// The record currently being published.
struct InFlight {
    attempt: u64,
    /// `None` once `clear_queues` erased the record.
    record: Option<StoredRecord>,
    event: QueuedEvent,
    /// Set by the completion notifier.
    outcome: Option<bool>,
}

struct ControllerState {
    machine: DrainMachine,
    paused: bool,
    can_sleep: bool,
    hold: Hold,
    in_flight: Option<InFlight>,
    next_attempt: u64,
    counters: Counters,
}

impl ControllerState {
    fn new() -> Self {
        Self {
            machine: DrainMachine::new(),
            paused: false,
            can_sleep: false,
            hold: Hold::default(),
            in_flight: None,
            next_attempt: 0,
            counters: Counters::default(),
        }
    }

    fn current(&self) -> DrainState {
        self.machine.state().clone()
    }

    fn transition(&mut self, input: DrainInput) {
        let from = self.current();
        match self.machine.consume(&input) {
            Ok(_) => trace!(?from, ?input, to = ?self.machine.state(), "Drain transition"),
            Err(_) => error!(state = ?from, ?input, "Illegal drain transition ignored"),
        }
    }
}

/// Durable store-and-forward publish queue.
///
/// Built in two phases: collaborators are attached with the `with_*`
/// builders, then [`setup`](Self::setup) validates them and brings the store
/// up. [`tick`](Self::tick) must be called periodically from one control
/// thread.
pub struct PublishQueue {
    config: QueueConfig,
    store: Option<Arc<dyn RecordStore>>,
    publisher: Option<Arc<dyn Publisher>>,
    connectivity: Option<Arc<dyn Connectivity>>,
    clock: Arc<dyn MonotonicClock>,
    handler: Option<Arc<dyn PublishCompleteHandler>>,
    setup_done: AtomicBool,
    state: Arc<Mutex<ControllerState>>,
}

impl Default for PublishQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishQueue {
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
            store: None,
            publisher: None,
            connectivity: None,
            clock: Arc::new(SystemClock::new()),
            handler: None,
            setup_done: AtomicBool::new(false),
            state: Arc::new(Mutex::new(ControllerState::new())),
        }
    }

    /// Attach the record store. The store owns its region (file, capacity).
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn MonotonicClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register the application's publish-complete hook.
    pub fn with_publish_complete_handler<H>(mut self, handler: H) -> Self
    where
        H: PublishCompleteHandler + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Install this queue as the process-wide instance.
    ///
    /// Only the first call succeeds; later calls hand the rejected queue back.
    pub fn install(self) -> Result<&'static PublishQueue, PublishQueue> {
        let mut candidate = Some(self);
        let installed = GLOBAL.get_or_init(|| candidate.take().unwrap_or_default());
        match candidate {
            None => Ok(installed),
            Some(rejected) => Err(rejected),
        }
    }

    /// The process-wide instance, if one was installed.
    pub fn global() -> Option<&'static PublishQueue> {
        GLOBAL.get()
    }

    /// Validate collaborators and bring the record store up.
    ///
    /// A store that fails to load is formatted. If formatting fails too the
    /// queue still runs and reports [`SetupOutcome::Degraded`].
    pub fn setup(&self) -> QueueResult<SetupOutcome> {
        let publisher = self
            .publisher
            .as_ref()
            .ok_or(QueueError::NotConfigured("publisher"))?;
        if !publisher.background_delivery() {
            error!("Publisher does not deliver completions in the background");
            return Err(QueueError::ThreadingDisabled);
        }
        let store = self.store.as_ref().ok_or(QueueError::StoreNotConfigured)?;
        if self.connectivity.is_none() {
            return Err(QueueError::NotConfigured("connectivity"));
        }
        self.config.validate()?;

        let outcome = match store.load() {
            Ok(()) => SetupOutcome::Loaded,
            Err(load_err) => {
                warn!(error = %load_err, "Failed to load record store, formatting");
                match store.format() {
                    Ok(()) => SetupOutcome::Formatted,
                    Err(format_err) => {
                        error!(error = %format_err, "Failed to format record store");
                        SetupOutcome::Degraded
                    }
                }
            }
        };

        self.setup_done.store(true, Ordering::SeqCst);
        info!(
            ?outcome,
            num_events = self.num_events(),
            "Publish queue set up"
        );
        Ok(outcome)
    }

    /// Advance the drain state machine. Never blocks on the network.
    ///
    /// Does nothing until `setup()` has succeeded.
    pub fn tick(&self) {
        if !self.setup_done.load(Ordering::SeqCst) {
            return;
        }
        let (Some(store), Some(publisher), Some(connectivity)) =
            (&self.store, &self.publisher, &self.connectivity)
        else {
            return;
        };

        let start = {
            let mut state = self.state.lock();
            let now = self.clock.now_ms();
            match state.current() {
                DrainState::ConnectWaiting => {
                    self.connect_waiting(&mut state, store.as_ref(), connectivity.as_ref(), now);
                    None
                }
                DrainState::Waiting => {
                    self.waiting(&mut state, store.as_ref(), connectivity.as_ref(), now)
                }
                DrainState::PublishPending => {
                    self.publish_pending(&mut state, store.as_ref(), now);
                    None
                }
            }
        };

        if let Some((attempt, event)) = start {
            self.start_publish(publisher.as_ref(), attempt, event);
        }
    }

    fn connect_waiting(
        &self,
        state: &mut ControllerState,
        store: &dyn RecordStore,
        connectivity: &dyn Connectivity,
        now: u64,
    ) {
        state.can_sleep = state.paused || store.usage_stats().record_count == 0;
        if connectivity.is_online() {
            state
                .hold
                .restart(now, self.config.wait_after_connect_ms);
            state.transition(DrainInput::Connected);
            info!(
                hold_ms = self.config.wait_after_connect_ms,
                "Cloud connected"
            );
        }
    }

    /// Returns the attempt to start, if a valid record is ready.
    fn waiting(
        &self,
        state: &mut ControllerState,
        store: &dyn RecordStore,
        connectivity: &dyn Connectivity,
        now: u64,
    ) -> Option<(u64, QueuedEvent)> {
        if !connectivity.is_online() {
            state.transition(DrainInput::Disconnected);
            info!("Cloud disconnected");
            return None;
        }
        if state.paused {
            state.can_sleep = true;
            return None;
        }
        if !state.hold.elapsed(now) {
            state.can_sleep = store.usage_stats().record_count == 0;
            return None;
        }

        let record = match store.peek_oldest() {
            Ok(Some(record)) => record,
            Ok(None) => {
                state.can_sleep = true;
                return None;
            }
            Err(e) => {
                error!(error = %e, "Failed to read oldest record");
                state.hold.restart(now, self.config.wait_after_failure_ms);
                state.can_sleep = store.usage_stats().record_count == 0;
                return None;
            }
        };

        match codec::decode(&record.body) {
            Ok(event) => {
                state.next_attempt += 1;
                let attempt = state.next_attempt;
                trace!(record_id = %record.id, attempt, "Starting publish");
                state.in_flight = Some(InFlight {
                    attempt,
                    record: Some(record),
                    event: event.clone(),
                    outcome: None,
                });
                state.can_sleep = false;
                state.hold.entered_ms = now;
                state.transition(DrainInput::PublishStarted);
                Some((attempt, event))
            }
            Err(e) => {
                error!(record_id = %record.id, error = %e, "Discarding invalid record");
                if let Err(ack_err) = store.acknowledge(&record) {
                    error!(record_id = %record.id, error = %ack_err, "Failed to remove invalid record");
                }
                state.counters.discarded += 1;
                state.hold.restart(now, self.config.wait_after_failure_ms);
                state.transition(DrainInput::RecordDiscarded);
                state.can_sleep = true;
                None
            }
        }
    }

    fn publish_pending(&self, state: &mut ControllerState, store: &dyn RecordStore, now: u64) {
        let outcome = match state.in_flight.as_ref() {
            Some(in_flight) => in_flight.outcome,
            None => {
                error!("Publish pending without an in-flight record");
                state.hold.restart(now, self.config.wait_after_failure_ms);
                state.transition(DrainInput::PublishFailed);
                return;
            }
        };
        let Some(succeeded) = outcome else {
            return;
        };
        let Some(in_flight) = state.in_flight.take() else {
            return;
        };

        if succeeded {
            match &in_flight.record {
                Some(record) => match store.acknowledge(record) {
                    Ok(true) => {
                        debug!(name = %in_flight.event.name, record_id = %record.id, "Event published")
                    }
                    Ok(false) => {
                        warn!(record_id = %record.id, "Published record was already removed")
                    }
                    Err(e) => {
                        error!(record_id = %record.id, error = %e, "Failed to remove published record")
                    }
                },
                None => debug!(
                    name = %in_flight.event.name,
                    attempt = in_flight.attempt,
                    "Event published after its record was cleared"
                ),
            }
            state.counters.published += 1;
            state.hold.restart(now, self.config.wait_between_publish_ms);
            state.transition(DrainInput::PublishSucceeded);
        } else {
            warn!(
                name = %in_flight.event.name,
                attempt = in_flight.attempt,
                backoff_ms = self.config.wait_after_failure_ms,
                "Publish failed, will retry"
            );
            state.counters.publish_failures += 1;
            state.hold.restart(now, self.config.wait_after_failure_ms);
            state.transition(DrainInput::PublishFailed);
        }
    }

    fn start_publish(&self, publisher: &dyn Publisher, attempt: u64, event: QueuedEvent) {
        let weak = Arc::downgrade(&self.state);
        let handler = self.handler.clone();
        let notifier = CompletionNotifier::new(attempt, move |succeeded| {
            if let Some(state) = weak.upgrade() {
                complete_attempt(&state, attempt, succeeded, handler.as_deref());
            }
        });

        debug!(name = %event.name, flags = %event.flags, attempt, "Publishing event");
        if !publisher.publish(event, notifier) {
            warn!(attempt, "Publisher did not accept the event");
            complete_attempt(&self.state, attempt, false, self.handler.as_deref());
        }
    }

    /// Queue an event for publishing.
    ///
    /// Only touches local storage; never waits on the network.
    pub fn enqueue(&self, name: &str, payload: &str, flags: PublishFlags) -> QueueResult<()> {
        self.publish_event(&QueuedEvent::new(name, payload, flags))
    }

    /// Queue an already built event.
    pub fn publish_event(&self, event: &QueuedEvent) -> QueueResult<()> {
        if !self.setup_done.load(Ordering::SeqCst) {
            return Err(QueueError::NotSetUp);
        }
        let store = self.store.as_ref().ok_or(QueueError::StoreNotConfigured)?;
        self.check_bounds(event)?;

        let body = codec::encode(event)?;
        let appended = store.append(&body);

        let mut state = self.state.lock();
        match appended {
            Ok(record_id) => {
                state.counters.enqueued += 1;
                if !state.paused {
                    state.can_sleep = false;
                }
                debug!(name = %event.name, %record_id, "Event queued");
                Ok(())
            }
            Err(e) => {
                state.counters.enqueue_failures += 1;
                error!(name = %event.name, error = %e, "Failed to queue event");
                Err(e.into())
            }
        }
    }

    fn check_bounds(&self, event: &QueuedEvent) -> QueueResult<()> {
        if event.name.is_empty() {
            return Err(QueueError::EmptyEventName);
        }
        if event.name.len() > self.config.max_name_len {
            return Err(QueueError::EventNameTooLong {
                len: event.name.len(),
                max: self.config.max_name_len,
            });
        }
        if event.payload.len() > self.config.max_payload_len {
            return Err(QueueError::PayloadTooLarge {
                len: event.payload.len(),
                max: self.config.max_payload_len,
            });
        }
        Ok(())
    }

    /// Erase every queued event.
    ///
    /// An in-flight publish keeps running, but its completion no longer
    /// removes anything.
    pub fn clear_queues(&self) -> QueueResult<()> {
        let store = self.store.as_ref().ok_or(QueueError::StoreNotConfigured)?;

        let mut state = self.state.lock();
        if let Err(e) = store.format() {
            error!(error = %e, "Failed to clear queue");
            return Err(e.into());
        }
        if let Some(in_flight) = state.in_flight.as_mut() {
            if in_flight.record.take().is_some() {
                info!(attempt = in_flight.attempt, "Erased the in-flight record");
            }
        }
        info!("Queue cleared");
        Ok(())
    }

    /// Stop or resume starting new publishes.
    ///
    /// A publish already in flight is allowed to finish.
    pub fn set_pause_publishing(&self, paused: bool) {
        let num_events = self.num_events();

        let mut state = self.state.lock();
        state.paused = paused;
        if !paused && num_events != 0 {
            state.can_sleep = false;
        }
        info!(paused, num_events, "Publishing pause changed");
    }

    pub fn pause_publishing(&self) -> bool {
        self.state.lock().paused
    }

    /// Whether the device may sleep without losing in-progress work.
    ///
    /// Returns the value computed by the last tick or administrative call.
    pub fn can_sleep(&self) -> bool {
        self.state.lock().can_sleep
    }

    /// Number of queued events, including the one in flight.
    pub fn num_events(&self) -> usize {
        self.store
            .as_ref()
            .map(|store| store.usage_stats().record_count)
            .unwrap_or(0)
    }

    pub fn state(&self) -> QueueState {
        QueueState::from(self.state.lock().machine.state())
    }

    pub fn metrics(&self) -> QueueMetrics {
        let num_events = self.num_events();

        let state = self.state.lock();
        QueueMetrics {
            state: QueueState::from(state.machine.state()),
            num_events,
            in_flight: state.in_flight.is_some(),
            paused: state.paused,
            can_sleep: state.can_sleep,
            enqueued: state.counters.enqueued,
            enqueue_failures: state.counters.enqueue_failures,
            published: state.counters.published,
            publish_failures: state.counters.publish_failures,
            discarded: state.counters.discarded,
        }
    }

    /// Record a platform lifecycle notification. Does not change state.
    pub fn on_system_event(&self, event: SystemEvent) {
        let num_events = self.num_events();

        let state = self.state.lock();
        let current = QueueState::from(state.machine.state());
        let in_flight = state.in_flight.as_ref().map(|f| f.attempt);
        match event {
            SystemEvent::Reset => {
                warn!(state = ?current, ?in_flight, num_events, "Device reset requested")
            }
            SystemEvent::CloudDisconnecting => {
                info!(state = ?current, ?in_flight, num_events, "Cloud disconnecting")
            }
        }
    }
}

/// Record the outcome of `attempt` and notify the application.
///
/// Outcomes for any attempt other than the current one, or for an attempt
/// that already completed, are ignored.
fn complete_attempt(
    state: &Mutex<ControllerState>,
    attempt: u64,
    succeeded: bool,
    handler: Option<&dyn PublishCompleteHandler>,
) {
    let completion = {
        let mut state = state.lock();
        match state.in_flight.as_mut() {
            Some(in_flight) if in_flight.attempt == attempt && in_flight.outcome.is_none() => {
                in_flight.outcome = Some(succeeded);
                PublishCompletion {
                    succeeded,
                    name: in_flight.event.name.clone(),
                    payload: in_flight.event.payload.clone(),
                    flags: in_flight.event.flags,
                }
            }
            Some(in_flight) if in_flight.attempt == attempt => {
                warn!(attempt, succeeded, "Duplicate publish completion ignored");
                return;
            }
            _ => {
                warn!(attempt, succeeded, "Stale publish completion ignored");
                return;
            }
        }
    };

    if let Some(handler) = handler {
        handler.on_publish_complete(&completion);
    }
}
