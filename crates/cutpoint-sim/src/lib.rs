//! # Cutpoint Simulation
//!
//! Runs groups of [`cutpoint_core::Process`]es and drives snapshot and
//! checkpoint-recovery scenarios end to end.
//!
//! ## Architecture
//!
//! ```text
//!   Topology ──▶ CheckpointRecoveryManager
//!                   │  InitiateSnapshot / AddNeighbor / Terminate / Recover
//!                   ▼
//!                ProcessGroup ──── step() ────▶ Network (FIFO | seeded shuffle)
//!                   │    ▲                          │
//!                   │    └──── Deliver(envelope) ◀──┘
//!                   ├──▶ SnapshotStore  (Action::Persist)
//!                   └──▶ MessageLog     (clocked deliveries)
//! ```
//!
//! [`ProcessGroup`] is a deterministic single-threaded scheduler: every run
//! with the same seed and inputs produces the same interleaving.
//! [`runtime::AsyncHost`] runs the same processes as tokio tasks instead.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod builder;
pub mod config;
pub mod error;
pub mod manager;
pub mod network;
pub mod recovery;
pub mod runtime;
pub mod simulation;
pub mod topology;

pub use builder::SimulationBuilder;
pub use config::SimConfig;
pub use error::{RecoveryError, SimError, TopologyError};
pub use manager::{CheckpointRecoveryManager, RecoveryReport};
pub use network::{DeliveryOrder, Network};
pub use recovery::{replay_plan, RecoveryManager, RecoveryPlan};
pub use runtime::AsyncHost;
pub use simulation::{GroupStats, ProcessGroup};
pub use topology::{Edge, Topology};

/// Result type for simulation operations.
pub type Result<T> = std::result::Result<T, SimError>;
