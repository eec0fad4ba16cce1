//! Fluent builder for [`CheckpointRecoveryManager`] construction.

use std::path::PathBuf;
use std::sync::Arc;

use cutpoint_core::{ProtocolKind, Workload};
use cutpoint_storage::{
    FileMessageLog, FileSystemSnapshotStore, InMemoryMessageLog, InMemorySnapshotStore,
    MessageLog, SnapshotStore,
};

use crate::config::SimConfig;
use crate::error::SimError;
use crate::manager::CheckpointRecoveryManager;
use crate::network::DeliveryOrder;
use crate::topology::Topology;

/// Fluent builder for a [`CheckpointRecoveryManager`].
///
/// # Example
///
/// ```rust,ignore
/// let manager = CheckpointRecoveryManager::builder()
///     .protocol(ProtocolKind::LaiYang)
///     .seed(42)
///     .snapshot_dir("./snapshots")
///     .topology(Topology::ring(4))
///     .build()?;
/// ```
#[derive(Default)]
pub struct SimulationBuilder {
    config: SimConfig,
    topology: Topology,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    log: Option<Arc<dyn MessageLog>>,
}

impl SimulationBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the snapshot protocol.
    #[must_use]
    pub fn protocol(mut self, protocol: ProtocolKind) -> Self {
        self.config.protocol = protocol;
        self
    }

    /// Overrides the protocol's default workload.
    #[must_use]
    pub fn workload(mut self, workload: Workload) -> Self {
        self.config.workload = Some(workload);
        self
    }

    /// Overrides the protocol's default delivery order.
    #[must_use]
    pub fn delivery(mut self, order: DeliveryOrder) -> Self {
        self.config.delivery = Some(order);
        self
    }

    /// Sets the shuffle seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Sets the hop budget of originated values.
    #[must_use]
    pub fn relay_hops(mut self, hops: u32) -> Self {
        self.config.relay_hops = hops;
        self
    }

    /// Sets the step limit of `run_until_quiescent`.
    #[must_use]
    pub fn max_steps(mut self, steps: usize) -> Self {
        self.config.max_steps = steps;
        self
    }

    /// Persists snapshots as JSON files under `dir`.
    #[must_use]
    pub fn snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.snapshot_dir = Some(dir.into());
        self
    }

    /// Appends the message log to the file at `path`.
    #[must_use]
    pub fn message_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.message_log = Some(path.into());
        self
    }

    /// Enables or disables recovery on termination.
    #[must_use]
    pub fn auto_recover(mut self, enabled: bool) -> Self {
        self.config.auto_recover = enabled;
        self
    }

    /// Uses a custom snapshot store. Takes precedence over
    /// [`snapshot_dir`](Self::snapshot_dir).
    #[must_use]
    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    /// Uses a custom message log. Takes precedence over
    /// [`message_log_path`](Self::message_log_path).
    #[must_use]
    pub fn message_log(mut self, log: Arc<dyn MessageLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Sets the initial topology.
    #[must_use]
    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Builds the manager and its topology.
    ///
    /// # Errors
    ///
    /// Returns an error if the topology cannot be built.
    pub fn build(self) -> Result<CheckpointRecoveryManager, SimError> {
        let snapshots: Arc<dyn SnapshotStore> = match (self.snapshots, &self.config.snapshot_dir) {
            (Some(store), _) => store,
            (None, Some(dir)) => Arc::new(FileSystemSnapshotStore::new(dir.clone())),
            (None, None) => Arc::new(InMemorySnapshotStore::new()),
        };
        let log: Arc<dyn MessageLog> = match (self.log, &self.config.message_log) {
            (Some(log), _) => log,
            (None, Some(path)) => Arc::new(FileMessageLog::new(path.clone())),
            (None, None) => Arc::new(InMemoryMessageLog::new()),
        };
        CheckpointRecoveryManager::new(self.config, self.topology, snapshots, log)
    }
}
