//! Error types for the simulation facade.

use cutpoint_core::{CoreError, ProcessId};
use cutpoint_storage::StoreError;

/// Errors from reading a topology description.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// The graph file could not be read.
    #[error("cannot read graph file {path}: {source}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A line with an edge operator does not describe an edge.
    #[error("invalid edge on line {line}: {text}")]
    InvalidEdge {
        /// 1-based line number.
        line: usize,
        /// The offending line.
        text: String,
    },
}

/// Errors from recovering a terminated process.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// The store has no snapshot for this process.
    #[error("no snapshot found for process {0}")]
    NoSnapshot(ProcessId),

    /// Every snapshot of this process was unreadable or incomplete.
    #[error("all {count} snapshots of process {process} are malformed")]
    AllSnapshotsMalformed {
        /// Process id.
        process: ProcessId,
        /// Number of records tried.
        count: usize,
    },

    /// The store itself failed.
    #[error("snapshot store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from simulation operations.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// Addressing error from the process model.
    Core(#[from] CoreError),

    /// Storage error.
    Store(#[from] StoreError),

    /// Topology input error.
    Topology(#[from] TopologyError),

    /// Recovery failed.
    Recovery(#[from] RecoveryError),

    /// The process is running, so there is nothing to recover.
    AlreadyRunning(ProcessId),

    /// The run did not go quiescent within the step limit.
    StepLimit(usize),
}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Core(e) => write!(f, "Process error: {e}"),
            Self::Store(e) => write!(f, "Storage error: {e}"),
            Self::Topology(e) => write!(f, "Topology error: {e}"),
            Self::Recovery(e) => write!(f, "Recovery error: {e}"),
            Self::AlreadyRunning(id) => write!(f, "Process '{id}' is already running"),
            Self::StepLimit(steps) => {
                write!(f, "No quiescence after {steps} delivery steps")
            }
        }
    }
}
