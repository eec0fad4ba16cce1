//! # Cutpoint Core
//!
//! Process, channel and protocol model for simulating distributed snapshots
//! and checkpoint recovery.
//!
//! A [`Process`] owns an integer application state, its directed channels
//! and one [`Protocol`] variant. Processes never touch each other: every
//! interaction is an [`Input`] handed to [`Process::handle`], which returns
//! the [`Action`]s the host must carry out (send an envelope, persist a
//! completed snapshot, reap a stopped process).
//!
//! ## Module Overview
//!
//! - [`id`]: process identity
//! - [`clock`]: vector clocks and the replay dominance test
//! - [`message`]: application and control messages, envelopes
//! - [`channel`]: per-direction channel bookkeeping
//! - [`engine`]: Chandy-Lamport, Lai-Yang and Peterson-Kearns engines
//! - [`process`]: the process state machine
//! - [`snapshot`]: the local snapshot produced on completion

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod id;
pub mod message;
pub mod process;
pub mod snapshot;

pub use clock::{should_replay, VectorClock};
pub use config::{ProcessConfig, ProtocolKind, Workload};
pub use engine::Protocol;
pub use error::CoreError;
pub use id::ProcessId;
pub use message::{AppMessage, Envelope, Message};
pub use process::{Action, Input, Process};
pub use snapshot::{ChannelCounters, LocalSnapshot};

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
