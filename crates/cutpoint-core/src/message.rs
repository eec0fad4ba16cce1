//! Messages exchanged over channels.

use crate::clock::VectorClock;
use crate::id::ProcessId;

/// An application value in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppMessage {
    /// The payload.
    pub value: i64,
    /// Remaining forwarding budget.
    pub hops: u32,
    /// Snapshot epoch of the sender at send time. An epoch ahead of the
    /// receiver's marks the sender as already recording.
    pub epoch: u64,
    /// Sender's vector clock at send time (Peterson-Kearns only).
    pub clock: Option<VectorClock>,
}

impl AppMessage {
    /// A bare value with no hop budget, epoch or clock.
    #[must_use]
    pub fn plain(value: i64) -> Self {
        Self {
            value,
            hops: 0,
            epoch: 0,
            clock: None,
        }
    }
}

/// Everything that travels over a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Application traffic.
    App(AppMessage),
    /// Chandy-Lamport cut delimiter.
    Marker {
        /// Snapshot epoch the marker belongs to.
        epoch: u64,
    },
    /// Lai-Yang pre-snapshot counter.
    Presnap {
        /// Snapshot epoch the counter belongs to.
        epoch: u64,
        /// Application messages the sender put on this channel before its
        /// cut.
        count: u64,
    },
}

impl Message {
    /// Returns `true` for markers and counters.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        !matches!(self, Self::App(_))
    }

    /// Returns the application payload, if any.
    #[must_use]
    pub const fn as_app(&self) -> Option<&AppMessage> {
        match self {
            Self::App(msg) => Some(msg),
            _ => None,
        }
    }
}

/// A message addressed from one process to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sending process.
    pub from: ProcessId,
    /// Receiving process.
    pub to: ProcessId,
    /// The message.
    pub message: Message,
}

impl Envelope {
    /// Creates an envelope.
    #[must_use]
    pub fn new(from: ProcessId, to: ProcessId, message: Message) -> Self {
        Self { from, to, message }
    }

    /// Whether the envelope travels over a self-loop.
    #[must_use]
    pub fn is_self_addressed(&self) -> bool {
        self.from == self.to
    }
}
