//! # Snapshot Protocols
//!
//! One [`Protocol`] value per process, tagged by algorithm. All three
//! variants run on the same substrate (state, channels, workload) owned by
//! [`Process`](crate::Process); a variant only keeps its own bookkeeping.
//!
//! ## Module Overview
//!
//! - [`chandy_lamport`]: markers over FIFO channels
//! - [`lai_yang`]: piggybacked epochs and pre-cut counters, any order
//! - [`peterson_kearns`]: independent checkpoints with vector clocks
//!
//! ## Epochs
//!
//! Every control message carries the epoch it belongs to. A control message
//! from an epoch the process already completed is late and dropped. One from
//! a newer epoch while the process is still recording is answered with
//! [`Verdict::Hold`]: the process parks the envelope until the current epoch
//! completes. On FIFO channels everything behind it on that channel waits
//! too.

pub mod chandy_lamport;
pub mod lai_yang;
pub mod peterson_kearns;

pub use chandy_lamport::ChandyLamport;
pub use lai_yang::LaiYang;
pub use peterson_kearns::PetersonKearns;

use tracing::debug;

use crate::clock::VectorClock;
use crate::config::ProtocolKind;
use crate::id::ProcessId;
use crate::message::AppMessage;
use crate::process::{Action, Node};

/// What the process should do with a delivered envelope after the protocol
/// has seen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Bookkeeping done; application messages proceed to the workload.
    Accept,
    /// The envelope belongs to a later epoch; park it.
    Hold,
}

/// Snapshot protocol state of one process.
#[derive(Debug)]
pub enum Protocol {
    /// Chandy-Lamport.
    ChandyLamport(ChandyLamport),
    /// Lai-Yang.
    LaiYang(LaiYang),
    /// Peterson-Kearns.
    PetersonKearns(PetersonKearns),
}

impl Protocol {
    /// Fresh protocol state for process `id`.
    #[must_use]
    pub fn new(kind: ProtocolKind, id: &ProcessId) -> Self {
        match kind {
            ProtocolKind::ChandyLamport => Self::ChandyLamport(ChandyLamport::default()),
            ProtocolKind::LaiYang => Self::LaiYang(LaiYang::default()),
            ProtocolKind::PetersonKearns => Self::PetersonKearns(PetersonKearns::new(id)),
        }
    }

    /// Protocol state resumed from a persisted epoch.
    #[must_use]
    pub fn restored(kind: ProtocolKind, clock: Option<VectorClock>, epoch: u64) -> Self {
        match kind {
            ProtocolKind::ChandyLamport => Self::ChandyLamport(ChandyLamport::restored(epoch)),
            ProtocolKind::LaiYang => Self::LaiYang(LaiYang::restored(epoch)),
            ProtocolKind::PetersonKearns => {
                Self::PetersonKearns(PetersonKearns::restored(clock.unwrap_or_default(), epoch))
            }
        }
    }

    /// Which variant this is.
    #[must_use]
    pub const fn kind(&self) -> ProtocolKind {
        match self {
            Self::ChandyLamport(_) => ProtocolKind::ChandyLamport,
            Self::LaiYang(_) => ProtocolKind::LaiYang,
            Self::PetersonKearns(_) => ProtocolKind::PetersonKearns,
        }
    }

    /// Whether a snapshot is in progress.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        match self {
            Self::ChandyLamport(p) => p.is_recording(),
            Self::LaiYang(p) => p.is_recording(),
            Self::PetersonKearns(_) => false,
        }
    }

    /// Last epoch this process completed, zero if none.
    #[must_use]
    pub fn completed_epoch(&self) -> u64 {
        match self {
            Self::ChandyLamport(p) => p.completed_epoch(),
            Self::LaiYang(p) => p.completed_epoch(),
            Self::PetersonKearns(p) => p.epoch(),
        }
    }

    /// Vector clock, for protocols that keep one.
    #[must_use]
    pub fn clock(&self) -> Option<&VectorClock> {
        match self {
            Self::PetersonKearns(p) => Some(p.clock()),
            _ => None,
        }
    }

    pub(crate) fn initiate(&mut self, node: &mut Node, out: &mut Vec<Action>) {
        match self {
            Self::ChandyLamport(p) => p.initiate(node, out),
            Self::LaiYang(p) => p.initiate(node, out),
            Self::PetersonKearns(p) => p.initiate(node, out),
        }
    }

    pub(crate) fn on_app(
        &mut self,
        node: &mut Node,
        from: &ProcessId,
        msg: &AppMessage,
        out: &mut Vec<Action>,
    ) -> Verdict {
        match self {
            Self::ChandyLamport(p) => p.on_app(node, from, msg),
            Self::LaiYang(p) => p.on_app(node, from, msg, out),
            Self::PetersonKearns(p) => p.on_app(node, from, msg),
        }
    }

    pub(crate) fn on_marker(
        &mut self,
        node: &mut Node,
        from: &ProcessId,
        epoch: u64,
        out: &mut Vec<Action>,
    ) -> Verdict {
        if let Self::ChandyLamport(p) = self {
            p.on_marker(node, from, epoch, out)
        } else {
            debug!(process = %node.id, %from, epoch, protocol = %self.kind(), "marker ignored");
            Verdict::Accept
        }
    }

    pub(crate) fn on_presnap(
        &mut self,
        node: &mut Node,
        from: &ProcessId,
        epoch: u64,
        count: u64,
        out: &mut Vec<Action>,
    ) -> Verdict {
        if let Self::LaiYang(p) = self {
            p.on_presnap(node, from, epoch, count, out)
        } else {
            debug!(process = %node.id, %from, epoch, protocol = %self.kind(), "presnap ignored");
            Verdict::Accept
        }
    }

    /// Builds the outgoing application message for `value`.
    pub(crate) fn stamp(&mut self, node: &Node, value: i64, hops: u32) -> AppMessage {
        match self {
            Self::ChandyLamport(_) => AppMessage {
                hops,
                ..AppMessage::plain(value)
            },
            Self::LaiYang(p) => p.stamp(value, hops),
            Self::PetersonKearns(p) => p.stamp(node, value, hops),
        }
    }

    pub(crate) fn on_neighbor_added(&mut self, node: &Node, to: &ProcessId, out: &mut Vec<Action>) {
        match self {
            Self::ChandyLamport(p) => p.on_neighbor_added(node, to, out),
            Self::LaiYang(p) => p.on_neighbor_added(node, to, out),
            Self::PetersonKearns(p) => p.on_neighbor_added(to),
        }
    }

    /// Re-evaluates the completion condition, e.g. after a channel was
    /// removed.
    pub(crate) fn check_complete(&mut self, node: &mut Node, out: &mut Vec<Action>) {
        match self {
            Self::ChandyLamport(p) => p.check_complete(node, out),
            Self::LaiYang(p) => p.check_complete(node, out),
            Self::PetersonKearns(_) => {}
        }
    }

    /// Replaces the vector clock. Returns `false` for protocols without one.
    pub(crate) fn set_clock(&mut self, clock: VectorClock) -> bool {
        match self {
            Self::PetersonKearns(p) => {
                p.set_clock(clock);
                true
            }
            _ => false,
        }
    }
}
