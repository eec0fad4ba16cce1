//! Checkpoint/recovery manager.
//!
//! The manager is the control surface of a simulation run. It builds the
//! process group from a [`Topology`], broadcasts snapshot triggers, applies
//! topology changes between delivery steps and drives recovery when a
//! process is terminated.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use cutpoint_core::{
    AppMessage, CoreError, Envelope, Input, Message, Process, ProcessId, VectorClock,
};
use cutpoint_storage::{MessageLog, SnapshotStore};

use crate::builder::SimulationBuilder;
use crate::config::SimConfig;
use crate::error::SimError;
use crate::recovery::RecoveryManager;
use crate::simulation::{GroupStats, ProcessGroup};
use crate::topology::Topology;

/// Outcome of recovering one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Recovered process.
    pub process: ProcessId,
    /// Epoch of the record it was restored from.
    pub epoch: u64,
    /// State in that record.
    pub restored_state: i64,
    /// Newer records skipped as unusable.
    pub fallbacks: usize,
    /// Log entries redelivered.
    pub replayed: usize,
    /// Log entries already reflected in the record.
    pub skipped: usize,
    /// State after replay.
    pub state_after: i64,
}

/// Builds, drives and recovers a process group.
#[derive(Debug)]
pub struct CheckpointRecoveryManager {
    config: SimConfig,
    group: ProcessGroup,
    topology: Topology,
}

impl CheckpointRecoveryManager {
    /// Creates a manager and builds `topology`.
    ///
    /// # Errors
    ///
    /// Returns an error if the topology cannot be built.
    pub fn new(
        config: SimConfig,
        topology: Topology,
        snapshots: Arc<dyn SnapshotStore>,
        log: Arc<dyn MessageLog>,
    ) -> Result<Self, SimError> {
        let group = ProcessGroup::new(
            config.process_config(),
            config.delivery_order(),
            config.seed,
            snapshots,
            log,
        );
        let mut manager = Self {
            config,
            group,
            topology: Topology::new(),
        };
        manager.build_topology(topology)?;
        Ok(manager)
    }

    /// Starts building a manager.
    #[must_use]
    pub fn builder() -> SimulationBuilder {
        SimulationBuilder::new()
    }

    /// Spawns every process of `topology` not yet present and opens its
    /// channels.
    ///
    /// # Errors
    ///
    /// Returns an error if an edge touches a terminated process.
    pub fn build_topology(&mut self, topology: Topology) -> Result<(), SimError> {
        for id in topology.nodes() {
            if self.group.process(id).is_none() {
                self.group.spawn(id.clone());
            }
            self.topology.add_node(id.clone());
        }
        for edge in topology.edges() {
            self.group.connect(&edge.from, &edge.to)?;
            self.topology
                .add_edge(edge.from.clone(), edge.to.clone(), edge.weight);
        }
        info!(
            processes = self.topology.len(),
            channels = self.topology.edges().len(),
            protocol = %self.config.protocol,
            "topology built"
        );
        Ok(())
    }

    /// Reads a graph file and builds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn build_from_graph_file(&mut self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let topology = Topology::from_file(path)?;
        self.build_topology(topology)
    }

    /// Triggers a snapshot at one process.
    ///
    /// # Errors
    ///
    /// Returns an error if the process is unknown or terminated.
    pub fn initiate_snapshot(&mut self, id: &ProcessId) -> Result<(), SimError> {
        self.group.input(id, Input::InitiateSnapshot)?;
        Ok(())
    }

    /// Triggers a snapshot at every running process. Returns how many were
    /// triggered.
    pub fn initiate_network_snapshot(&mut self) -> usize {
        let running: Vec<ProcessId> = self
            .group
            .processes()
            .filter(|p| p.is_running())
            .map(|p| p.id().clone())
            .collect();
        for id in &running {
            if let Err(e) = self.group.input(id, Input::InitiateSnapshot) {
                warn!(process = %id, error = %e, "snapshot trigger failed");
            }
        }
        info!(processes = running.len(), "network snapshot initiated");
        running.len()
    }

    /// Opens the channel `from -> to`.
    ///
    /// # Errors
    ///
    /// Returns an error if either process is unknown or terminated.
    pub fn add_neighbor(&mut self, from: &ProcessId, to: &ProcessId) -> Result<(), SimError> {
        self.group.connect(from, to)?;
        self.topology.add_edge(from.clone(), to.clone(), None);
        Ok(())
    }

    /// Closes the channel `from -> to`.
    pub fn remove_neighbor(&mut self, from: &ProcessId, to: &ProcessId) {
        self.group.disconnect(from, to);
        self.topology.remove_edge(from, to);
    }

    /// Applies the workload to `value` at `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process is unknown or terminated.
    pub fn compute(&mut self, id: &ProcessId, value: i64) -> Result<(), SimError> {
        self.group.input(id, Input::Compute { value })?;
        Ok(())
    }

    /// Sends a raw value on `from -> to`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sender is unknown or terminated.
    pub fn send(&mut self, from: &ProcessId, to: &ProcessId, value: i64) -> Result<(), SimError> {
        self.group.input(
            from,
            Input::Send {
                to: to.clone(),
                value,
            },
        )?;
        Ok(())
    }

    /// Overwrites a process's state and, if given, its vector clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the process is unknown or terminated.
    pub fn set_state(
        &mut self,
        id: &ProcessId,
        state: i64,
        clock: Option<VectorClock>,
    ) -> Result<(), SimError> {
        self.group.input(id, Input::SetState { state, clock })?;
        Ok(())
    }

    /// Stops a process immediately, without flushing anything.
    ///
    /// With automatic recovery enabled the process is recovered right away
    /// and the report is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the process is unknown or already terminated, or
    /// if automatic recovery fails.
    pub fn terminate_actor(&mut self, id: &ProcessId) -> Result<Option<RecoveryReport>, SimError> {
        self.group.input(id, Input::Terminate)?;

        let mut report = None;
        for stopped in self.group.take_stopped() {
            if self.config.auto_recover {
                let recovered = self.recover_actor(&stopped)?;
                if &stopped == id {
                    report = Some(recovered);
                }
            }
        }
        Ok(report)
    }

    /// Respawns a terminated process from its newest usable snapshot and
    /// replays the logged deliveries it has not seen.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::AlreadyRunning`] if the process is running, or a
    /// recovery error if no usable snapshot exists.
    pub fn recover_actor(&mut self, id: &ProcessId) -> Result<RecoveryReport, SimError> {
        if self.group.is_running(id) {
            return Err(SimError::AlreadyRunning(id.clone()));
        }
        if self.group.process(id).is_none() {
            return Err(CoreError::UnknownProcess(id.clone()).into());
        }

        let plan = RecoveryManager::new(self.group.snapshots().as_ref(), self.group.log().as_ref())
            .plan(id)?;
        let record = &plan.record;
        self.group.insert(Process::restore(
            id.clone(),
            self.group.config(),
            record.state,
            record.vector_clock.clone(),
            plan.latest_epoch,
        ));

        for from in self.topology.predecessors_of(id) {
            if self.group.is_running(&from) {
                self.group.connect(&from, id)?;
            }
        }
        for to in self.topology.neighbors_of(id) {
            if self.group.is_running(&to) {
                self.group.connect(id, &to)?;
            }
        }

        let replayed = plan.replay.len();
        for entry in plan.replay {
            let message = AppMessage {
                clock: Some(entry.clock),
                ..AppMessage::plain(entry.value)
            };
            self.group
                .deliver_direct(Envelope::new(entry.from, id.clone(), Message::App(message)));
        }

        let report = RecoveryReport {
            process: id.clone(),
            epoch: plan.record.epoch,
            restored_state: plan.record.state,
            fallbacks: plan.fallbacks,
            replayed,
            skipped: plan.skipped,
            state_after: self.state_of(id)?,
        };
        info!(
            process = %id,
            epoch = report.epoch,
            restored_state = report.restored_state,
            replayed,
            skipped = report.skipped,
            state = report.state_after,
            "process recovered"
        );
        Ok(report)
    }

    /// Delivers one envelope. Returns `false` when nothing is deliverable.
    pub fn step(&mut self) -> bool {
        self.group.step()
    }

    /// Delivers until nothing is deliverable. Returns the number of
    /// deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::StepLimit`] if the configured step limit is hit
    /// first.
    pub fn run_until_quiescent(&mut self) -> Result<usize, SimError> {
        let limit = self.config.max_steps;
        self.group
            .run_until_quiescent(limit)
            .ok_or(SimError::StepLimit(limit))
    }

    /// Current state of a running process.
    ///
    /// # Errors
    ///
    /// Returns an error if the process is unknown or terminated.
    pub fn state_of(&self, id: &ProcessId) -> Result<i64, SimError> {
        Ok(self.running(id)?.state())
    }

    /// Vector clock of a running process, if its protocol keeps one.
    ///
    /// # Errors
    ///
    /// Returns an error if the process is unknown or terminated.
    pub fn clock_of(&self, id: &ProcessId) -> Result<Option<VectorClock>, SimError> {
        Ok(self.running(id)?.clock().cloned())
    }

    /// Outgoing neighbors of a running process.
    ///
    /// # Errors
    ///
    /// Returns an error if the process is unknown or terminated.
    pub fn neighbors_of(&self, id: &ProcessId) -> Result<Vec<ProcessId>, SimError> {
        Ok(self.running(id)?.neighbors().cloned().collect())
    }

    /// Returns `true` if the process exists and is running.
    #[must_use]
    pub fn is_running(&self, id: &ProcessId) -> bool {
        self.group.is_running(id)
    }

    /// Returns `true` if the process is running and mid-snapshot.
    #[must_use]
    pub fn is_recording(&self, id: &ProcessId) -> bool {
        self.group
            .process(id)
            .is_some_and(|p| p.is_running() && p.is_recording())
    }

    /// The process, running or terminated.
    #[must_use]
    pub fn process(&self, id: &ProcessId) -> Option<&Process> {
        self.group.process(id)
    }

    /// The snapshot store.
    #[must_use]
    pub fn snapshots(&self) -> &Arc<dyn SnapshotStore> {
        self.group.snapshots()
    }

    /// The message log.
    #[must_use]
    pub fn log(&self) -> &Arc<dyn MessageLog> {
        self.group.log()
    }

    /// The topology as currently built.
    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The process group.
    #[must_use]
    pub fn group(&self) -> &ProcessGroup {
        &self.group
    }

    /// Group counters.
    #[must_use]
    pub fn stats(&self) -> GroupStats {
        self.group.stats()
    }

    /// Run configuration.
    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    fn running(&self, id: &ProcessId) -> Result<&Process, SimError> {
        match self.group.process(id) {
            None => Err(CoreError::UnknownProcess(id.clone()).into()),
            Some(p) if !p.is_running() => Err(CoreError::ProcessTerminated(id.clone()).into()),
            Some(p) => Ok(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use cutpoint_core::ProtocolKind;

    use super::*;

    fn pid(id: &str) -> ProcessId {
        ProcessId::from(id)
    }

    fn manager(protocol: ProtocolKind, topology: Topology) -> CheckpointRecoveryManager {
        CheckpointRecoveryManager::builder()
            .protocol(protocol)
            .topology(topology)
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_spawns_every_node() {
        let m = manager(ProtocolKind::ChandyLamport, Topology::ring(4));
        assert_eq!(m.group().processes().count(), 4);
        assert_eq!(m.neighbors_of(&pid("0")).unwrap(), vec![pid("1"), pid("3")]);
    }

    #[test]
    fn test_network_snapshot_triggers_all_running() {
        let mut m = manager(ProtocolKind::ChandyLamport, Topology::ring(3));
        assert_eq!(m.initiate_network_snapshot(), 3);
        m.run_until_quiescent().unwrap();
        for i in 0..3 {
            let id = ProcessId::from(i);
            assert_eq!(m.snapshots().list(&id).unwrap(), vec![1]);
            assert!(!m.is_recording(&id));
        }
    }

    #[test]
    fn test_network_snapshot_skips_terminated_process() {
        let mut m = manager(ProtocolKind::PetersonKearns, Topology::ring(2));
        // no snapshot yet, so the process stays down
        assert!(m.terminate_actor(&pid("1")).is_err());
        assert_eq!(m.initiate_network_snapshot(), 1);
        m.run_until_quiescent().unwrap();
        assert_eq!(m.snapshots().list(&pid("0")).unwrap(), vec![1]);
        assert!(m.snapshots().list(&pid("1")).unwrap().is_empty());
    }

    #[test]
    fn test_recover_running_process_is_rejected() {
        let mut m = manager(ProtocolKind::PetersonKearns, Topology::ring(2));
        let err = m.recover_actor(&pid("0")).unwrap_err();
        assert!(matches!(err, SimError::AlreadyRunning(_)));
    }

    #[test]
    fn test_terminate_without_snapshot_reports_error() {
        let mut m = manager(ProtocolKind::PetersonKearns, Topology::ring(2));
        let err = m.terminate_actor(&pid("1")).unwrap_err();
        assert!(matches!(
            err,
            SimError::Recovery(crate::RecoveryError::NoSnapshot(_))
        ));
        assert!(!m.is_running(&pid("1")));
        assert!(m.state_of(&pid("1")).is_err());
    }

    #[test]
    fn test_add_and_remove_neighbor() {
        let mut m = manager(ProtocolKind::LaiYang, Topology::cycle(&["a", "b"]));
        m.build_topology({
            let mut t = Topology::new();
            t.add_node(pid("c"));
            t
        })
        .unwrap();
        m.add_neighbor(&pid("a"), &pid("c")).unwrap();
        assert_eq!(m.neighbors_of(&pid("a")).unwrap(), vec![pid("b"), pid("c")]);

        m.remove_neighbor(&pid("a"), &pid("b"));
        assert_eq!(m.neighbors_of(&pid("a")).unwrap(), vec![pid("c")]);
        assert!(m.topology().predecessors_of(&pid("b")).is_empty());
    }

    #[test]
    fn test_set_state_overrides_clock() {
        let mut m = manager(ProtocolKind::PetersonKearns, Topology::ring(2));
        let clock: VectorClock = "{0: 9}".parse().unwrap();
        m.set_state(&pid("0"), 11, Some(clock.clone())).unwrap();
        assert_eq!(m.state_of(&pid("0")).unwrap(), 11);
        assert_eq!(m.clock_of(&pid("0")).unwrap(), Some(clock));
    }
}
