//! Storage errors.

use cutpoint_core::ProcessId;

/// Errors from snapshot and message log persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted record or log line is missing a field or cannot be
    /// parsed.
    #[error("malformed record at {location}: {reason}")]
    Malformed {
        /// File path or log line.
        location: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A record for this (process, epoch) was already written.
    #[error("snapshot for process {process} epoch {epoch} already exists")]
    Duplicate {
        /// Process id.
        process: ProcessId,
        /// Epoch number.
        epoch: u64,
    },
}
