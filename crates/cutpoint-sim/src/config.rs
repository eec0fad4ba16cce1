//! Configuration for a simulation run.

use std::path::PathBuf;

use cutpoint_core::{ProcessConfig, ProtocolKind, Workload};

use crate::network::DeliveryOrder;

/// Configuration for a [`CheckpointRecoveryManager`](crate::CheckpointRecoveryManager).
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Snapshot protocol every process runs.
    pub protocol: ProtocolKind,
    /// State update rule (`None` = the protocol's default).
    pub workload: Option<Workload>,
    /// Delivery order (`None` = FIFO for Chandy-Lamport, shuffled otherwise).
    pub delivery: Option<DeliveryOrder>,
    /// Seed for shuffled delivery.
    pub seed: u64,
    /// Hop budget of values processes originate.
    pub relay_hops: u32,
    /// Upper bound on deliveries in one `run_until_quiescent` call.
    pub max_steps: usize,
    /// Directory for snapshot files (`None` = in-memory only).
    pub snapshot_dir: Option<PathBuf>,
    /// Message log file (`None` = in-memory only).
    pub message_log: Option<PathBuf>,
    /// Recover a process as soon as its termination is detected.
    pub auto_recover: bool,
}

impl SimConfig {
    /// Configuration handed to every process.
    #[must_use]
    pub fn process_config(&self) -> ProcessConfig {
        ProcessConfig {
            protocol: self.protocol,
            workload: self
                .workload
                .unwrap_or_else(|| self.protocol.default_workload()),
            relay_hops: self.relay_hops,
        }
    }

    /// Effective delivery order.
    #[must_use]
    pub fn delivery_order(&self) -> DeliveryOrder {
        self.delivery.unwrap_or(if self.protocol.requires_fifo() {
            DeliveryOrder::Fifo
        } else {
            DeliveryOrder::Shuffled
        })
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolKind::ChandyLamport,
            workload: None,
            delivery: None,
            seed: 0,
            relay_hops: 0,
            max_steps: 1_000_000,
            snapshot_dir: None,
            message_log: None,
            auto_recover: true,
        }
    }
}
