//! Core error types.

use crate::id::ProcessId;

/// Errors raised by the process and clock model.
///
/// Protocol bookkeeping never fails: late, duplicate or self-originated
/// control messages are dropped and counts are clamped. These errors cover
/// addressing mistakes by the host and malformed external input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// No process with this id exists in the group.
    #[error("unknown process: {0}")]
    UnknownProcess(ProcessId),

    /// The process exists but has been terminated.
    #[error("process {0} is terminated")]
    ProcessTerminated(ProcessId),

    /// A vector clock in textual form could not be parsed.
    #[error("invalid vector clock '{input}': {reason}")]
    InvalidClock {
        /// The text that failed to parse.
        input: String,
        /// What was wrong with it.
        reason: String,
    },
}
