//! Drain state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐
//! │ ConnectWaiting  │ (initial)
//! └────────┬────────┘
//!          │ Connected            ▲
//!          ▼                      │ Disconnected
//! ┌─────────────────┐ ────────────┘
//! │     Waiting     │ ◄──┐ RecordDiscarded
//! └────────┬────────┘ ───┘
//!          │ PublishStarted       ▲
//!          ▼                      │ PublishSucceeded / PublishFailed
//! ┌─────────────────┐             │
//! │ PublishPending  │ ────────────┘
//! └─────────────────┘
//! ```
//!
//! Guards (online, paused, hold elapsed, record valid) are evaluated by the
//! controller; the table only fixes which moves are legal.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub drain_machine(ConnectWaiting)

    ConnectWaiting => {
        Connected => Waiting
    },
    Waiting => {
        Disconnected => ConnectWaiting,
        PublishStarted => PublishPending,
        // Invalid record removed, backoff restarted
        RecordDiscarded => Waiting
    },
    PublishPending => {
        PublishSucceeded => Waiting,
        PublishFailed => Waiting
    }
}

pub use drain_machine::Input as DrainInput;
pub use drain_machine::State as DrainState;
pub use drain_machine::StateMachine as DrainMachine;

/// Controller state for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Waiting for the cloud link.
    ConnectWaiting,
    /// Online, holding or looking for the next record.
    Waiting,
    /// A publish is outstanding.
    PublishPending,
}

impl From<&DrainState> for QueueState {
    fn from(state: &DrainState) -> Self {
        match state {
            DrainState::ConnectWaiting => QueueState::ConnectWaiting,
            DrainState::Waiting => QueueState::Waiting,
            DrainState::PublishPending => QueueState::PublishPending,
        }
    }
}

/// Time spent in the current state and how long to hold before acting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hold {
    pub entered_ms: u64,
    pub duration_ms: u64,
}

impl Hold {
    pub fn elapsed(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.entered_ms) >= self.duration_ms
    }

    /// Restart the timer at `now_ms` with a new duration.
    pub fn restart(&mut self, now_ms: u64, duration_ms: u64) {
        self.entered_ms = now_ms;
        self.duration_ms = duration_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_connect_waiting() {
        let machine = DrainMachine::new();
        assert_eq!(*machine.state(), DrainState::ConnectWaiting);
    }

    #[test]
    fn test_publish_cycle() {
        let mut machine = DrainMachine::new();
        machine.consume(&DrainInput::Connected).unwrap();
        assert_eq!(*machine.state(), DrainState::Waiting);

        machine.consume(&DrainInput::PublishStarted).unwrap();
        assert_eq!(*machine.state(), DrainState::PublishPending);

        machine.consume(&DrainInput::PublishFailed).unwrap();
        assert_eq!(*machine.state(), DrainState::Waiting);

        machine.consume(&DrainInput::PublishStarted).unwrap();
        machine.consume(&DrainInput::PublishSucceeded).unwrap();
        assert_eq!(*machine.state(), DrainState::Waiting);
    }

    #[test]
    fn test_discard_stays_waiting() {
        let mut machine = DrainMachine::new();
        machine.consume(&DrainInput::Connected).unwrap();
        machine.consume(&DrainInput::RecordDiscarded).unwrap();
        assert_eq!(*machine.state(), DrainState::Waiting);
    }

    #[test]
    fn test_disconnect_returns_to_connect_waiting() {
        let mut machine = DrainMachine::new();
        machine.consume(&DrainInput::Connected).unwrap();
        machine.consume(&DrainInput::Disconnected).unwrap();
        assert_eq!(*machine.state(), DrainState::ConnectWaiting);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut machine = DrainMachine::new();

        // Cannot publish before connecting
        assert!(machine.consume(&DrainInput::PublishStarted).is_err());
        assert_eq!(*machine.state(), DrainState::ConnectWaiting);

        // In-flight publish must complete before anything else
        machine.consume(&DrainInput::Connected).unwrap();
        machine.consume(&DrainInput::PublishStarted).unwrap();
        assert!(machine.consume(&DrainInput::Disconnected).is_err());
        assert!(machine.consume(&DrainInput::PublishStarted).is_err());
        assert_eq!(*machine.state(), DrainState::PublishPending);
    }

    #[test]
    fn test_queue_state_conversion() {
        assert_eq!(
            QueueState::from(&DrainState::PublishPending),
            QueueState::PublishPending
        );
        assert_eq!(
            QueueState::from(&DrainState::ConnectWaiting),
            QueueState::ConnectWaiting
        );
    }

    #[test]
    fn test_hold_elapsed() {
        let mut hold = Hold::default();
        hold.restart(1_000, 2_000);
        assert!(!hold.elapsed(1_000));
        assert!(!hold.elapsed(2_999));
        assert!(hold.elapsed(3_000));

        hold.restart(5_000, 0);
        assert!(hold.elapsed(5_000));
    }

    #[test]
    fn test_queue_state_serializes_snake_case() {
        let json = serde_json::to_string(&QueueState::PublishPending).unwrap();
        assert_eq!(json, "\"publish_pending\"");
    }
}
