//! Queued event and delivery flag types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Delivery flags carried with an event into the transport call.
///
/// `NO_ACK` and `WITH_ACK` are independent bits; both may be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublishFlags(u8);

impl PublishFlags {
    /// No delivery flags.
    pub const NONE: Self = Self(0);
    /// Ask the cloud not to acknowledge the publish.
    pub const NO_ACK: Self = Self(0b01);
    /// Require the cloud to acknowledge the publish before reporting success.
    pub const WITH_ACK: Self = Self(0b10);

    /// Returns the raw bit representation.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns true if every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if no flags are set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn no_ack(self) -> bool {
        self.contains(Self::NO_ACK)
    }

    pub fn with_ack(self) -> bool {
        self.contains(Self::WITH_ACK)
    }

    /// Sets the bits of `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl BitOr for PublishFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PublishFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.insert(rhs);
    }
}

impl fmt::Display for PublishFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.no_ack(), self.with_ack()) {
            (false, false) => f.write_str("NONE"),
            (true, false) => f.write_str("NO_ACK"),
            (false, true) => f.write_str("WITH_ACK"),
            (true, true) => f.write_str("NO_ACK|WITH_ACK"),
        }
    }
}

/// One pending unit of work: a named event with its payload.
///
/// Immutable once encoded into a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEvent {
    pub name: String,
    pub payload: String,
    pub flags: PublishFlags,
}

impl QueuedEvent {
    /// Create a new event.
    pub fn new(name: impl Into<String>, payload: impl Into<String>, flags: PublishFlags) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            flags,
        }
    }
}
