//! Deterministic single-threaded driver.
//!
//! [`ProcessGroup`] owns every process and the [`Network`] between them and
//! advances the run one delivery at a time. Each step hands exactly one
//! [`Input`] to one process, then carries out the returned [`Action`]s, so
//! topology changes and deliveries never interleave inside a handler.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info};

use cutpoint_core::{
    Action, CoreError, Envelope, Input, LocalSnapshot, Message, Process, ProcessConfig, ProcessId,
};
use cutpoint_storage::{LogEntry, MessageLog, SnapshotRecord, SnapshotStore};

use crate::network::{DeliveryOrder, Network};

/// Counters kept by a [`ProcessGroup`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Envelopes handed to a process.
    pub delivered: u64,
    /// Snapshot records written.
    pub persisted: u64,
    /// Snapshot records that failed to persist.
    pub persist_failures: u64,
    /// Log appends that failed.
    pub log_failures: u64,
    /// Sends addressed to a process that does not exist.
    pub dropped: u64,
}

/// A co-located group of processes and the channels between them.
pub struct ProcessGroup {
    config: ProcessConfig,
    processes: BTreeMap<ProcessId, Process>,
    network: Network,
    snapshots: Arc<dyn SnapshotStore>,
    log: Arc<dyn MessageLog>,
    stats: GroupStats,
    stopped: Vec<ProcessId>,
}

impl std::fmt::Debug for ProcessGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessGroup")
            .field("config", &self.config)
            .field("processes", &self.processes.keys().collect::<Vec<_>>())
            .field("pending", &self.network.pending())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl ProcessGroup {
    /// Creates an empty group.
    #[must_use]
    pub fn new(
        config: ProcessConfig,
        order: DeliveryOrder,
        seed: u64,
        snapshots: Arc<dyn SnapshotStore>,
        log: Arc<dyn MessageLog>,
    ) -> Self {
        Self {
            config,
            processes: BTreeMap::new(),
            network: Network::new(order, seed),
            snapshots,
            log,
            stats: GroupStats::default(),
            stopped: Vec::new(),
        }
    }

    /// Creates a fresh process with state zero and no channels.
    pub fn spawn(&mut self, id: ProcessId) {
        let process = Process::new(id.clone(), self.config);
        self.processes.insert(id, process);
    }

    /// Inserts an already built process, replacing any process with its id.
    pub fn insert(&mut self, process: Process) {
        self.processes.insert(process.id().clone(), process);
    }

    /// Opens the directed channel `from -> to`.
    ///
    /// The receiver learns about the channel first so that a marker sent
    /// on it is never delivered to an unknown inbound channel.
    ///
    /// # Errors
    ///
    /// Returns an error if either endpoint is unknown or terminated.
    pub fn connect(&mut self, from: &ProcessId, to: &ProcessId) -> Result<(), CoreError> {
        self.ensure_running(from)?;
        self.ensure_running(to)?;
        self.input(to, Input::AddInbound(from.clone()))?;
        self.input(from, Input::AddNeighbor(to.clone()))
    }

    /// Closes the directed channel `from -> to`. Missing endpoints are
    /// skipped.
    pub fn disconnect(&mut self, from: &ProcessId, to: &ProcessId) {
        if self.is_running(from) {
            self.dispatch_input(from, Input::RemoveNeighbor(to.clone()));
        }
        if self.is_running(to) {
            self.dispatch_input(to, Input::RemoveInbound(from.clone()));
        }
    }

    /// Hands one input to a process and carries out its actions.
    ///
    /// # Errors
    ///
    /// Returns an error if the process is unknown or terminated.
    pub fn input(&mut self, id: &ProcessId, input: Input) -> Result<(), CoreError> {
        self.ensure_running(id)?;
        self.dispatch_input(id, input);
        Ok(())
    }

    /// Delivers the next deliverable envelope. Returns `false` when nothing
    /// is deliverable.
    ///
    /// Envelopes addressed to a terminated process stay in the network.
    pub fn step(&mut self) -> bool {
        let processes = &self.processes;
        let Some(envelope) = self
            .network
            .next(|to| processes.get(to).is_some_and(Process::is_running))
        else {
            return false;
        };

        if let Message::App(msg) = &envelope.message {
            if let Some(clock) = &msg.clock {
                log_delivery(self.log.as_ref(), &envelope, msg.value, clock, &mut self.stats);
            }
        }
        self.deliver_direct(envelope);
        true
    }

    /// Steps until nothing is deliverable, at most `max_steps` times.
    /// Returns the number of deliveries, or `None` if the limit was hit.
    pub fn run_until_quiescent(&mut self, max_steps: usize) -> Option<usize> {
        for steps in 0..max_steps {
            if !self.step() {
                return Some(steps);
            }
        }
        if self.has_deliverable() {
            None
        } else {
            Some(max_steps)
        }
    }

    /// Delivers an envelope to its receiver without logging it.
    pub fn deliver_direct(&mut self, envelope: Envelope) {
        let to = envelope.to.clone();
        if self.is_running(&to) {
            self.stats.delivered += 1;
            self.dispatch_input(&to, Input::Deliver(envelope));
        } else {
            debug!(%to, "delivery to stopped process parked");
            self.network.send(envelope);
        }
    }

    /// Ids of processes stopped since the last call.
    pub fn take_stopped(&mut self) -> Vec<ProcessId> {
        std::mem::take(&mut self.stopped)
    }

    /// The process, if it exists (running or terminated).
    #[must_use]
    pub fn process(&self, id: &ProcessId) -> Option<&Process> {
        self.processes.get(id)
    }

    /// All processes in id order.
    pub fn processes(&self) -> impl Iterator<Item = &Process> {
        self.processes.values()
    }

    /// Returns `true` if the process exists and is running.
    #[must_use]
    pub fn is_running(&self, id: &ProcessId) -> bool {
        self.processes.get(id).is_some_and(Process::is_running)
    }

    /// Returns `true` if some pending envelope has a running receiver.
    #[must_use]
    pub fn has_deliverable(&self) -> bool {
        self.processes
            .values()
            .filter(|p| p.is_running())
            .any(|p| self.network.pending_to(p.id()) > 0)
    }

    /// The network.
    #[must_use]
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// The snapshot store.
    #[must_use]
    pub fn snapshots(&self) -> &Arc<dyn SnapshotStore> {
        &self.snapshots
    }

    /// The message log.
    #[must_use]
    pub fn log(&self) -> &Arc<dyn MessageLog> {
        &self.log
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> GroupStats {
        self.stats
    }

    /// Process configuration.
    #[must_use]
    pub fn config(&self) -> ProcessConfig {
        self.config
    }

    fn ensure_running(&self, id: &ProcessId) -> Result<(), CoreError> {
        match self.processes.get(id) {
            None => Err(CoreError::UnknownProcess(id.clone())),
            Some(p) if !p.is_running() => Err(CoreError::ProcessTerminated(id.clone())),
            Some(_) => Ok(()),
        }
    }

    fn dispatch_input(&mut self, id: &ProcessId, input: Input) {
        let Some(process) = self.processes.get_mut(id) else {
            return;
        };
        let actions = process.handle(input);
        for action in actions {
            match action {
                Action::Send(envelope) => {
                    if self.processes.contains_key(&envelope.to) {
                        self.network.send(envelope);
                    } else {
                        debug!(from = %envelope.from, to = %envelope.to, "send to unknown process dropped");
                        self.stats.dropped += 1;
                    }
                }
                Action::Persist(snapshot) => {
                    persist_snapshot(self.snapshots.as_ref(), snapshot, &mut self.stats);
                }
                Action::Stopped => {
                    info!(process = %id, "process stopped");
                    self.stopped.push(id.clone());
                }
            }
        }
    }
}

/// Writes a completed snapshot. A failure is logged and the epoch counts
/// as incomplete.
pub(crate) fn persist_snapshot(
    store: &dyn SnapshotStore,
    snapshot: LocalSnapshot,
    stats: &mut GroupStats,
) {
    let process = snapshot.process.clone();
    let epoch = snapshot.epoch;
    match store.append(&SnapshotRecord::stamped_now(snapshot)) {
        Ok(()) => stats.persisted += 1,
        Err(e) => {
            error!(%process, epoch, error = %e, "failed to persist snapshot");
            stats.persist_failures += 1;
        }
    }
}

/// Appends a delivery to the message log before it is applied.
pub(crate) fn log_delivery(
    log: &dyn MessageLog,
    envelope: &Envelope,
    value: i64,
    clock: &cutpoint_core::VectorClock,
    stats: &mut GroupStats,
) {
    let entry = LogEntry {
        from: envelope.from.clone(),
        to: envelope.to.clone(),
        value,
        clock: clock.clone(),
    };
    if let Err(e) = log.append(&entry) {
        error!(from = %entry.from, to = %entry.to, error = %e, "failed to log delivery");
        stats.log_failures += 1;
    }
}
