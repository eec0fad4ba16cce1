//! Chandy-Lamport marker protocol.
//!
//! ```text
//!          InitiateSnapshot / first Marker(e)
//!   Idle ──────────────────────────────────────▶ Recording(e)
//!    ▲     record state, Marker(e) on every out       │
//!    │                                                │ Marker(e) on every in
//!    └────────────── persist, completed = e ◀─────────┘
//! ```
//!
//! Requires FIFO channels: an application message that arrives on a channel
//! before that channel's marker was sent before the sender's cut. Such a
//! message is processed as usual and also recorded as in transit, as long
//! as the receiver is recording and the marker has not arrived yet.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::channel::InboundChannel;
use crate::config::ProtocolKind;
use crate::engine::Verdict;
use crate::id::ProcessId;
use crate::message::{AppMessage, Message};
use crate::process::{Action, Node};
use crate::snapshot::LocalSnapshot;

#[derive(Debug)]
struct Recording {
    epoch: u64,
    state: i64,
}

/// Chandy-Lamport bookkeeping of one process.
#[derive(Debug, Default)]
pub struct ChandyLamport {
    recording: Option<Recording>,
    completed: u64,
}

impl ChandyLamport {
    pub(crate) fn restored(completed: u64) -> Self {
        Self {
            recording: None,
            completed,
        }
    }

    /// Whether the process is between its cut and completion.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Last completed epoch.
    #[must_use]
    pub fn completed_epoch(&self) -> u64 {
        self.completed
    }

    /// Epoch being recorded, if any.
    #[must_use]
    pub fn current_epoch(&self) -> Option<u64> {
        self.recording.as_ref().map(|r| r.epoch)
    }

    pub(crate) fn initiate(&mut self, node: &mut Node, out: &mut Vec<Action>) {
        if let Some(r) = &self.recording {
            debug!(process = %node.id, epoch = r.epoch, "already recording, trigger ignored");
            return;
        }
        self.start(node, self.completed + 1, out);
        self.check_complete(node, out);
    }

    fn start(&mut self, node: &mut Node, epoch: u64, out: &mut Vec<Action>) {
        debug!(process = %node.id, epoch, state = node.state, "recording local state");
        self.recording = Some(Recording {
            epoch,
            state: node.state,
        });
        for channel in node.incoming.values_mut() {
            channel.begin_marker_cut();
        }
        for to in node.outgoing_ids() {
            node.send_control(&to, Message::Marker { epoch }, out);
        }
    }

    pub(crate) fn on_marker(
        &mut self,
        node: &mut Node,
        from: &ProcessId,
        epoch: u64,
        out: &mut Vec<Action>,
    ) -> Verdict {
        let current = if let Some(r) = &self.recording {
            r.epoch
        } else if epoch <= self.completed {
            debug!(process = %node.id, %from, epoch, "late marker ignored");
            return Verdict::Accept;
        } else {
            self.start(node, epoch, out);
            epoch
        };

        if epoch < current {
            debug!(process = %node.id, %from, epoch, "late marker ignored");
            return Verdict::Accept;
        }
        if epoch > current {
            return Verdict::Hold;
        }

        if !node.inbound_mut(from, false).receive_marker() {
            debug!(process = %node.id, %from, epoch, "duplicate marker ignored");
        }
        self.check_complete(node, out);
        Verdict::Accept
    }

    pub(crate) fn on_app(&mut self, node: &mut Node, from: &ProcessId, msg: &AppMessage) -> Verdict {
        let recording = self.recording.is_some();
        let channel = node.inbound_mut(from, recording);
        if recording && !channel.marker_received() {
            channel.record(msg.value);
        }
        Verdict::Accept
    }

    pub(crate) fn on_neighbor_added(&self, node: &Node, to: &ProcessId, out: &mut Vec<Action>) {
        if let Some(r) = &self.recording {
            node.send_control(to, Message::Marker { epoch: r.epoch }, out);
        }
    }

    pub(crate) fn check_complete(&mut self, node: &mut Node, out: &mut Vec<Action>) {
        if self.recording.is_none()
            || !node.incoming.values().all(InboundChannel::marker_received)
        {
            return;
        }
        let Some(recording) = self.recording.take() else {
            return;
        };

        let snapshot = LocalSnapshot {
            process: node.id.clone(),
            epoch: recording.epoch,
            protocol: ProtocolKind::ChandyLamport,
            state: recording.state,
            clock: None,
            channel_states: node.take_channel_states(),
            counters: BTreeMap::new(),
        };
        self.completed = recording.epoch;
        info!(
            process = %node.id,
            epoch = recording.epoch,
            state = recording.state,
            in_transit = snapshot.in_transit_len(),
            "snapshot complete"
        );
        out.push(Action::Persist(snapshot));
    }
}
