//! Async host: one tokio task per process.
//!
//! Each process runs in its own task with exclusive ownership of its
//! state and an unbounded `mpsc` inbox. Sends are routed through a shared
//! table of inbox senders. Per-channel order is the order the sender's
//! task emitted them, so channels are FIFO; interleaving across channels
//! is up to the scheduler.
//!
//! The host counts inputs in flight. When the count drops to zero no
//! process has anything left to do and [`AsyncHost::wait_quiescent`]
//! returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use cutpoint_core::{
    Action, CoreError, Envelope, Input, Message, Process, ProcessConfig, ProcessId,
};
use cutpoint_storage::{MessageLog, SnapshotStore};

use crate::simulation::{log_delivery, persist_snapshot, GroupStats};
use crate::topology::Topology;

struct Shared {
    routes: RwLock<HashMap<ProcessId, mpsc::UnboundedSender<Input>>>,
    snapshots: Arc<dyn SnapshotStore>,
    log: Arc<dyn MessageLog>,
    in_flight: AtomicUsize,
    idle: Notify,
    stats: Mutex<GroupStats>,
}

impl Shared {
    fn submit(&self, to: &ProcessId, input: Input) -> bool {
        let routes = self.routes.read();
        let Some(inbox) = routes.get(to) else {
            return false;
        };
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if inbox.send(input).is_err() {
            self.done();
            return false;
        }
        true
    }

    fn route(&self, envelope: Envelope) {
        let to = envelope.to.clone();
        if !self.submit(&to, Input::Deliver(envelope)) {
            warn!(%to, "dead letter: receiver is not running");
            self.stats.lock().dropped += 1;
        }
    }

    fn done(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Runs processes as concurrent tokio tasks.
pub struct AsyncHost {
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<Process>>,
}

impl std::fmt::Debug for AsyncHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncHost")
            .field("tasks", &self.tasks.len())
            .field("in_flight", &self.shared.in_flight.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl AsyncHost {
    /// Creates a host with no processes.
    #[must_use]
    pub fn new(snapshots: Arc<dyn SnapshotStore>, log: Arc<dyn MessageLog>) -> Self {
        Self {
            shared: Arc::new(Shared {
                routes: RwLock::new(HashMap::new()),
                snapshots,
                log,
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                stats: Mutex::new(GroupStats::default()),
            }),
            tasks: Vec::new(),
        }
    }

    /// Spawns one task per process of `topology` and opens its channels.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if an edge cannot be opened.
    pub fn from_topology(
        config: ProcessConfig,
        topology: &Topology,
        snapshots: Arc<dyn SnapshotStore>,
        log: Arc<dyn MessageLog>,
    ) -> Result<Self, CoreError> {
        let mut host = Self::new(snapshots, log);
        for id in topology.nodes() {
            host.spawn(Process::new(id.clone(), config));
        }
        for edge in topology.edges() {
            host.connect(&edge.from, &edge.to)?;
        }
        Ok(host)
    }

    /// Spawns a task owning `process`.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(&mut self, mut process: Process) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = process.id().clone();
        self.shared.routes.write().insert(id.clone(), tx);
        let shared = Arc::clone(&self.shared);

        let join = tokio::spawn(async move {
            debug!(process = %id, "process task started");
            while let Some(input) = rx.recv().await {
                if let Input::Deliver(envelope) = &input {
                    if let Message::App(msg) = &envelope.message {
                        if let Some(clock) = &msg.clock {
                            let mut stats = shared.stats.lock();
                            log_delivery(shared.log.as_ref(), envelope, msg.value, clock, &mut stats);
                        }
                    }
                    shared.stats.lock().delivered += 1;
                }

                let mut stopped = false;
                for action in process.handle(input) {
                    match action {
                        Action::Send(envelope) => shared.route(envelope),
                        Action::Persist(snapshot) => {
                            let mut stats = shared.stats.lock();
                            persist_snapshot(shared.snapshots.as_ref(), snapshot, &mut stats);
                        }
                        Action::Stopped => stopped = true,
                    }
                }

                if stopped {
                    shared.routes.write().remove(&id);
                    rx.close();
                    while rx.try_recv().is_ok() {
                        shared.stats.lock().dropped += 1;
                        shared.done();
                    }
                    shared.done();
                    break;
                }
                shared.done();
            }
            debug!(process = %id, "process task finished");
            process
        });
        self.tasks.push(join);
    }

    /// Queues an input for a process.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownProcess`] if no running task owns `id`.
    pub fn submit(&self, id: &ProcessId, input: Input) -> Result<(), CoreError> {
        if self.shared.submit(id, input) {
            Ok(())
        } else {
            Err(CoreError::UnknownProcess(id.clone()))
        }
    }

    /// Opens the channel `from -> to`.
    ///
    /// # Errors
    ///
    /// Returns an error if either process has no running task.
    pub fn connect(&self, from: &ProcessId, to: &ProcessId) -> Result<(), CoreError> {
        self.submit(to, Input::AddInbound(from.clone()))?;
        self.submit(from, Input::AddNeighbor(to.clone()))
    }

    /// Waits until no input is in flight. Returns `false` on timeout.
    pub async fn wait_quiescent(&self, timeout: Duration) -> bool {
        let shared = &self.shared;
        let wait = async {
            loop {
                let notified = shared.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if shared.in_flight.load(Ordering::SeqCst) == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> GroupStats {
        *self.shared.stats.lock()
    }

    /// Closes every inbox and returns the processes once their tasks end.
    pub async fn shutdown(self) -> Vec<Process> {
        self.shared.routes.write().clear();
        let mut processes = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            match task.await {
                Ok(process) => processes.push(process),
                Err(e) => warn!(error = %e, "process task failed"),
            }
        }
        processes
    }
}

#[cfg(test)]
mod tests {
    use cutpoint_core::ProtocolKind;
    use cutpoint_storage::{InMemoryMessageLog, InMemorySnapshotStore};

    use super::*;

    fn pid(id: &str) -> ProcessId {
        ProcessId::from(id)
    }

    fn host(
        protocol: ProtocolKind,
        topology: &Topology,
    ) -> (AsyncHost, Arc<InMemorySnapshotStore>, Arc<InMemoryMessageLog>) {
        let store = Arc::new(InMemorySnapshotStore::new());
        let log = Arc::new(InMemoryMessageLog::new());
        let host = AsyncHost::from_topology(
            ProcessConfig::for_protocol(protocol),
            topology,
            store.clone(),
            log.clone(),
        )
        .unwrap();
        (host, store, log)
    }

    #[tokio::test]
    async fn test_chandy_lamport_ring_completes() {
        let (host, store, _) = host(ProtocolKind::ChandyLamport, &Topology::ring(3));
        host.submit(&pid("0"), Input::InitiateSnapshot).unwrap();
        assert!(host.wait_quiescent(Duration::from_secs(5)).await);

        for i in 0..3 {
            assert_eq!(store.list(&ProcessId::from(i)).unwrap(), vec![1]);
        }
        let processes = host.shutdown().await;
        assert_eq!(processes.len(), 3);
        assert!(processes.iter().all(|p| !p.is_recording()));
    }

    #[tokio::test]
    async fn test_lai_yang_cycle_completes() {
        let (host, store, _) = host(ProtocolKind::LaiYang, &Topology::cycle(&["a", "b", "c", "d"]));
        host.submit(&pid("a"), Input::Compute { value: 10 }).unwrap();
        host.submit(&pid("a"), Input::InitiateSnapshot).unwrap();
        assert!(host.wait_quiescent(Duration::from_secs(5)).await);

        let record = store.list_latest(&pid("a")).unwrap().unwrap();
        assert_eq!(record.state, 20);
        assert_eq!(store.len(), 4);
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_clocked_deliveries_are_logged() {
        let (host, _, log) = host(ProtocolKind::PetersonKearns, &Topology::ring(2));
        host.submit(&pid("0"), Input::Send { to: pid("1"), value: 7 }).unwrap();
        assert!(host.wait_quiescent(Duration::from_secs(5)).await);

        assert_eq!(log.len(), 1);
        let processes = host.shutdown().await;
        let receiver = processes.iter().find(|p| p.id() == &pid("1")).unwrap();
        assert_eq!(receiver.state(), 7);
    }

    #[tokio::test]
    async fn test_sends_to_stopped_process_are_dead_letters() {
        let (host, _, _) = host(ProtocolKind::PetersonKearns, &Topology::ring(2));
        host.submit(&pid("1"), Input::Terminate).unwrap();
        assert!(host.wait_quiescent(Duration::from_secs(5)).await);

        assert!(host.submit(&pid("1"), Input::InitiateSnapshot).is_err());
        host.submit(&pid("0"), Input::Send { to: pid("1"), value: 7 }).unwrap();
        assert!(host.wait_quiescent(Duration::from_secs(5)).await);
        assert_eq!(host.stats().dropped, 1);

        let processes = host.shutdown().await;
        assert_eq!(processes.len(), 2);
    }
}
