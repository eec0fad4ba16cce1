//! Local snapshot produced when a process completes an epoch.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clock::VectorClock;
use crate::config::ProtocolKind;
use crate::id::ProcessId;

/// Per-channel counters captured by Lai-Yang.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelCounters {
    /// Messages this process sent to the neighbor before its cut.
    pub sent: u64,
    /// Pre-cut messages received from the neighbor.
    pub received: u64,
    /// Pre-cut messages the neighbor announced.
    pub expected: u64,
}

/// The state one process captured for one epoch.
///
/// Emitted exactly once per (process, epoch) and never mutated after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSnapshot {
    /// Process that took the snapshot.
    pub process: ProcessId,
    /// Epoch number, starting at 1.
    pub epoch: u64,
    /// Protocol that produced it.
    pub protocol: ProtocolKind,
    /// Recorded application state.
    pub state: i64,
    /// Vector clock at checkpoint time (Peterson-Kearns only).
    pub clock: Option<VectorClock>,
    /// Recorded values per inbound channel.
    pub channel_states: BTreeMap<ProcessId, Vec<i64>>,
    /// Per-neighbor counters (Lai-Yang only).
    pub counters: BTreeMap<ProcessId, ChannelCounters>,
}

impl LocalSnapshot {
    /// Total number of recorded in-transit values across channels.
    #[must_use]
    pub fn in_transit_len(&self) -> usize {
        self.channel_states.values().map(Vec::len).sum()
    }
}
