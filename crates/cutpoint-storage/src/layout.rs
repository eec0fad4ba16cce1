//! Snapshot record layout.
//!
//! ## File Naming
//!
//! ```text
//! snapshots/
//! ├── snapshot_0_2024-03-17_12-50-04.123456789.json
//! ├── snapshot_1_2024-03-17_12-50-04.124001337.json
//! └── ...
//! ```
//!
//! The timestamp is the local ISO date-time of persistence with `:` turned
//! into `-` and `T` into `_`.
//!
//! ## Record Format
//!
//! ```json
//! {
//!   "Timestamp": "2024-03-17T12:50:04.123456789",
//!   "Process": "0",
//!   "Epoch": 1,
//!   "Protocol": "PetersonKearns",
//!   "State": 40,
//!   "VectorClock": { "0": 3, "1": 3 },
//!   "ChannelStates": { "1": [20, 20] }
//! }
//! ```
//!
//! `VectorClock` is only written by Peterson-Kearns and `Counters` only by
//! Lai-Yang. On read, `PersonalState` is accepted for `State` and
//! `InTransitMessages` for `ChannelStates`.

use std::collections::BTreeMap;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use cutpoint_core::{ChannelCounters, LocalSnapshot, ProcessId, ProtocolKind, VectorClock};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// File name of a snapshot record.
#[must_use]
pub fn snapshot_file_name(process: &ProcessId, timestamp: &str) -> String {
    format!(
        "snapshot_{process}_{}.json",
        timestamp.replace(':', "-").replace('T', "_")
    )
}

/// One persisted snapshot: immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnapshotRecord {
    /// Local ISO date-time at persistence.
    pub timestamp: String,
    /// Process that took the snapshot.
    pub process: ProcessId,
    /// Snapshot epoch.
    pub epoch: u64,
    /// Protocol that produced it.
    pub protocol: ProtocolKind,
    /// Recorded application state.
    #[serde(alias = "PersonalState")]
    pub state: i64,
    /// Vector clock at checkpoint time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_clock: Option<VectorClock>,
    /// Recorded in-transit values per inbound channel.
    #[serde(default, alias = "InTransitMessages")]
    pub channel_states: BTreeMap<ProcessId, Vec<i64>>,
    /// Per-neighbor counters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<ProcessId, ChannelCounters>,
}

impl SnapshotRecord {
    /// Wraps a snapshot with the given persistence time.
    #[must_use]
    pub fn new(snapshot: LocalSnapshot, at: NaiveDateTime) -> Self {
        Self {
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
            process: snapshot.process,
            epoch: snapshot.epoch,
            protocol: snapshot.protocol,
            state: snapshot.state,
            vector_clock: snapshot.clock,
            channel_states: snapshot.channel_states,
            counters: snapshot.counters,
        }
    }

    /// Wraps a snapshot stamped with the current local time.
    #[must_use]
    pub fn stamped_now(snapshot: LocalSnapshot) -> Self {
        Self::new(snapshot, Local::now().naive_local())
    }

    /// File name this record is stored under.
    #[must_use]
    pub fn file_name(&self) -> String {
        snapshot_file_name(&self.process, &self.timestamp)
    }
}
