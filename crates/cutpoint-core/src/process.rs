//! # Process
//!
//! A process is a single-threaded state machine. The host feeds it one
//! [`Input`] at a time and carries out the returned [`Action`]s:
//!
//! ```text
//!   Input ──▶ ┌──────────────────────────────┐ ──▶ Action::Send(envelope)
//!             │ Process                      │ ──▶ Action::Persist(snapshot)
//!             │  state, channels, workload   │ ──▶ Action::Stopped
//!             │  Protocol (CL | LY | PK)     │
//!             └──────────────────────────────┘
//! ```
//!
//! Topology changes (`AddNeighbor`, `RemoveNeighbor`, ...) are inputs like
//! any other, so they always land between two message-processing steps.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, warn};

use crate::channel::{InboundChannel, OutboundChannel};
use crate::clock::VectorClock;
use crate::config::{ProcessConfig, ProtocolKind, Workload};
use crate::engine::{Protocol, Verdict};
use crate::id::ProcessId;
use crate::message::{AppMessage, Envelope, Message};
use crate::snapshot::LocalSnapshot;

/// Something that happens to a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// An envelope arrived on an inbound channel.
    Deliver(Envelope),
    /// Local snapshot trigger.
    InitiateSnapshot,
    /// External input value, applied through the workload.
    Compute {
        /// Input value.
        value: i64,
    },
    /// Send a raw value to a neighbor.
    Send {
        /// Destination neighbor.
        to: ProcessId,
        /// Value to send.
        value: i64,
    },
    /// Open an outgoing channel.
    AddNeighbor(ProcessId),
    /// Close an outgoing channel.
    RemoveNeighbor(ProcessId),
    /// Register an incoming channel.
    AddInbound(ProcessId),
    /// Forget an incoming channel.
    RemoveInbound(ProcessId),
    /// Overwrite the application state, and the vector clock when given.
    SetState {
        /// New state.
        state: i64,
        /// New vector clock.
        clock: Option<VectorClock>,
    },
    /// Stop immediately, without flushing anything.
    Terminate,
}

/// Something the host must do on behalf of a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Put an envelope on its channel.
    Send(Envelope),
    /// Persist a completed snapshot.
    Persist(LocalSnapshot),
    /// The process terminated.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessStatus {
    Running,
    /// Every further input is ignored.
    Terminated,
}

/// Substrate shared by every protocol: state, channels, configuration.
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) id: ProcessId,
    pub(crate) state: i64,
    pub(crate) outgoing: BTreeMap<ProcessId, OutboundChannel>,
    pub(crate) incoming: BTreeMap<ProcessId, InboundChannel>,
    pub(crate) config: ProcessConfig,
}

impl Node {
    pub(crate) fn outgoing_ids(&self) -> Vec<ProcessId> {
        self.outgoing.keys().cloned().collect()
    }

    pub(crate) fn send_control(&self, to: &ProcessId, message: Message, out: &mut Vec<Action>) {
        out.push(Action::Send(Envelope::new(self.id.clone(), to.clone(), message)));
    }

    fn send_app(&mut self, to: &ProcessId, msg: AppMessage, out: &mut Vec<Action>) {
        if let Some(channel) = self.outgoing.get_mut(to) {
            channel.count_send();
        }
        out.push(Action::Send(Envelope::new(
            self.id.clone(),
            to.clone(),
            Message::App(msg),
        )));
    }

    /// Inbound channel from `from`, created on first use. A channel created
    /// while recording did not exist at the cut and starts closed.
    pub(crate) fn inbound_mut(&mut self, from: &ProcessId, recording: bool) -> &mut InboundChannel {
        self.incoming.entry(from.clone()).or_insert_with(|| {
            debug!(process = %self.id, %from, "inbound channel opened by first message");
            if recording {
                InboundChannel::opened_after_cut()
            } else {
                InboundChannel::default()
            }
        })
    }

    pub(crate) fn take_channel_states(&mut self) -> BTreeMap<ProcessId, Vec<i64>> {
        self.incoming
            .iter_mut()
            .map(|(id, channel)| (id.clone(), channel.take_recorded()))
            .collect()
    }
}

/// One simulated process.
#[derive(Debug)]
pub struct Process {
    node: Node,
    protocol: Protocol,
    status: ProcessStatus,
    /// Envelopes parked until the current epoch completes.
    held: BTreeMap<ProcessId, VecDeque<Envelope>>,
}

impl Process {
    /// Creates a process with state zero and no channels.
    #[must_use]
    pub fn new(id: ProcessId, config: ProcessConfig) -> Self {
        let protocol = Protocol::new(config.protocol, &id);
        Self::with_protocol(id, config, 0, protocol)
    }

    /// Respawns a process from a persisted snapshot.
    ///
    /// The next snapshot it takes continues after `epoch`.
    #[must_use]
    pub fn restore(
        id: ProcessId,
        config: ProcessConfig,
        state: i64,
        clock: Option<VectorClock>,
        epoch: u64,
    ) -> Self {
        let protocol = Protocol::restored(config.protocol, clock, epoch);
        Self::with_protocol(id, config, state, protocol)
    }

    fn with_protocol(id: ProcessId, config: ProcessConfig, state: i64, protocol: Protocol) -> Self {
        Self {
            node: Node {
                id,
                state,
                outgoing: BTreeMap::new(),
                incoming: BTreeMap::new(),
                config,
            },
            protocol,
            status: ProcessStatus::Running,
            held: BTreeMap::new(),
        }
    }

    /// Handles one input to completion and returns what the host must do.
    pub fn handle(&mut self, input: Input) -> Vec<Action> {
        let mut out = Vec::new();
        if self.status == ProcessStatus::Terminated {
            debug!(process = %self.node.id, ?input, "input for terminated process ignored");
            return out;
        }

        match input {
            Input::Deliver(envelope) => self.on_deliver(envelope, &mut out),
            Input::InitiateSnapshot => self.protocol.initiate(&mut self.node, &mut out),
            Input::Compute { value } => {
                let hops = self.node.config.relay_hops;
                self.apply(None, value, hops, &mut out);
            }
            Input::Send { to, value } => {
                if self.node.outgoing.contains_key(&to) {
                    let hops = self.node.config.relay_hops;
                    self.send_value(&to, value, hops, &mut out);
                } else {
                    warn!(process = %self.node.id, %to, value, "send to non-neighbor dropped");
                }
            }
            Input::AddNeighbor(to) => self.add_neighbor(to, &mut out),
            Input::RemoveNeighbor(to) => {
                self.node.outgoing.remove(&to);
            }
            Input::AddInbound(from) => {
                if from == self.node.id {
                    debug!(process = %self.node.id, "self-loop ignored");
                } else {
                    let recording = self.protocol.is_recording();
                    self.node.inbound_mut(&from, recording);
                }
            }
            Input::RemoveInbound(from) => {
                self.node.incoming.remove(&from);
                self.held.remove(&from);
                self.protocol.check_complete(&mut self.node, &mut out);
            }
            Input::SetState { state, clock } => {
                self.node.state = state;
                if let Some(clock) = clock {
                    if !self.protocol.set_clock(clock) {
                        debug!(process = %self.node.id, "protocol keeps no vector clock");
                    }
                }
            }
            Input::Terminate => {
                debug!(process = %self.node.id, "terminating");
                self.status = ProcessStatus::Terminated;
                self.held.clear();
                out.push(Action::Stopped);
                return out;
            }
        }

        self.release_held(&mut out);
        out
    }

    fn add_neighbor(&mut self, to: ProcessId, out: &mut Vec<Action>) {
        if to == self.node.id {
            debug!(process = %self.node.id, "self-loop ignored");
            return;
        }
        if self.node.outgoing.contains_key(&to) {
            return;
        }
        self.node.outgoing.insert(to.clone(), OutboundChannel::default());
        self.protocol.on_neighbor_added(&self.node, &to, out);
    }

    fn on_deliver(&mut self, envelope: Envelope, out: &mut Vec<Action>) {
        if envelope.is_self_addressed() && envelope.message.is_control() {
            debug!(process = %self.node.id, "self-originated control message dropped");
            return;
        }
        // Only FIFO channels park everything behind a held envelope; without
        // FIFO each envelope is judged on its own epoch.
        if self.protocol.kind().requires_fifo() {
            if let Some(queue) = self.held.get_mut(&envelope.from) {
                queue.push_back(envelope);
                return;
            }
        }

        let from = &envelope.from;
        let verdict = match &envelope.message {
            Message::App(msg) => self.protocol.on_app(&mut self.node, from, msg, out),
            Message::Marker { epoch } => self.protocol.on_marker(&mut self.node, from, *epoch, out),
            Message::Presnap { epoch, count } => {
                self.protocol
                    .on_presnap(&mut self.node, from, *epoch, *count, out)
            }
        };

        match verdict {
            Verdict::Hold => {
                debug!(process = %self.node.id, %from, "channel held until current epoch completes");
                self.held
                    .entry(envelope.from.clone())
                    .or_default()
                    .push_back(envelope);
            }
            Verdict::Accept => {
                if let Message::App(msg) = &envelope.message {
                    self.apply(Some(&envelope.from), msg.value, msg.hops, out);
                }
            }
        }
    }

    fn release_held(&mut self, out: &mut Vec<Action>) {
        while !self.protocol.is_recording() && !self.held.is_empty() {
            let held = std::mem::take(&mut self.held);
            for envelope in held.into_values().flatten() {
                self.on_deliver(envelope, out);
            }
        }
    }

    fn apply(&mut self, from: Option<&ProcessId>, value: i64, hops: u32, out: &mut Vec<Action>) {
        match self.node.config.workload {
            Workload::Accumulate => {
                self.node.state = self.node.state.saturating_add(value);
            }
            Workload::Relay => {
                self.node.state = value.saturating_mul(2);
                if hops > 0 {
                    let next = self
                        .node
                        .outgoing
                        .keys()
                        .find(|id| Some(*id) != from)
                        .cloned();
                    if let Some(to) = next {
                        self.send_value(&to, self.node.state, hops - 1, out);
                    }
                }
            }
            Workload::Flood => {
                self.node.state = value.saturating_mul(2);
                if hops > 0 {
                    for to in self.node.outgoing_ids() {
                        self.send_value(&to, self.node.state, hops - 1, out);
                    }
                }
            }
        }
    }

    fn send_value(&mut self, to: &ProcessId, value: i64, hops: u32, out: &mut Vec<Action>) {
        let msg = self.protocol.stamp(&self.node, value, hops);
        self.node.send_app(to, msg, out);
    }

    /// Process id.
    #[must_use]
    pub fn id(&self) -> &ProcessId {
        &self.node.id
    }

    /// Current application state.
    #[must_use]
    pub fn state(&self) -> i64 {
        self.node.state
    }

    /// Whether the process still handles inputs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == ProcessStatus::Running
    }

    /// Whether a snapshot is in progress.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.protocol.is_recording()
    }

    /// Last completed snapshot epoch.
    #[must_use]
    pub fn completed_epoch(&self) -> u64 {
        self.protocol.completed_epoch()
    }

    /// Epoch being recorded (Chandy-Lamport only).
    #[must_use]
    pub fn current_epoch(&self) -> Option<u64> {
        match &self.protocol {
            Protocol::ChandyLamport(p) => p.current_epoch(),
            Protocol::LaiYang(p) if p.is_recording() => Some(p.completed_epoch() + 1),
            _ => None,
        }
    }

    /// Protocol variant.
    #[must_use]
    pub fn protocol_kind(&self) -> ProtocolKind {
        self.protocol.kind()
    }

    /// Vector clock, for protocols that keep one.
    #[must_use]
    pub fn clock(&self) -> Option<&VectorClock> {
        self.protocol.clock()
    }

    /// Outgoing neighbors in id order.
    pub fn neighbors(&self) -> impl Iterator<Item = &ProcessId> {
        self.node.outgoing.keys()
    }

    /// Processes with a channel into this one.
    pub fn inbound(&self) -> impl Iterator<Item = &ProcessId> {
        self.node.incoming.keys()
    }

    /// Values recorded on the channel from `from` in the current cut.
    #[must_use]
    pub fn recorded(&self, from: &ProcessId) -> &[i64] {
        self.node
            .incoming
            .get(from)
            .map(InboundChannel::recorded)
            .unwrap_or_default()
    }

    /// Pre-cut messages still expected from `from` (Lai-Yang).
    #[must_use]
    pub fn expected_inbound(&self, from: &ProcessId) -> Option<u64> {
        self.node
            .incoming
            .get(from)
            .and_then(InboundChannel::expected_inbound)
    }

    #[cfg(test)]
    pub(crate) fn held_len(&self) -> usize {
        self.held.values().map(VecDeque::len).sum()
    }
}
