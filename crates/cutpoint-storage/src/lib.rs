//! # Cutpoint Storage
//!
//! Durable side of the simulation: one immutable JSON record per process
//! per snapshot epoch, and the append-only message log replayed during
//! Peterson-Kearns recovery.
//!
//! Both are traits ([`SnapshotStore`], [`MessageLog`]) with a file-backed
//! and an in-memory implementation, so tests can swap disks for memory.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod layout;
pub mod message_log;
pub mod snapshot_store;

pub use error::StoreError;
pub use layout::{snapshot_file_name, SnapshotRecord};
pub use message_log::{FileMessageLog, InMemoryMessageLog, LogEntry, MessageLog};
pub use snapshot_store::{FileSystemSnapshotStore, InMemorySnapshotStore, SnapshotStore};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
