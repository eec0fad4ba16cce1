//! Per-process configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which snapshot protocol a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolKind {
    /// Marker-based consistent snapshot over FIFO channels.
    ChandyLamport,
    /// Counter-based consistent snapshot over non-FIFO channels.
    LaiYang,
    /// Independent vector-clock checkpoints with log replay on recovery.
    PetersonKearns,
}

impl ProtocolKind {
    /// Whether the protocol needs per-channel FIFO delivery.
    #[must_use]
    pub const fn requires_fifo(self) -> bool {
        matches!(self, Self::ChandyLamport)
    }

    /// The workload a process of this kind runs unless told otherwise.
    #[must_use]
    pub const fn default_workload(self) -> Workload {
        match self {
            Self::ChandyLamport => Workload::Relay,
            Self::LaiYang => Workload::Flood,
            Self::PetersonKearns => Workload::Accumulate,
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ChandyLamport => "chandy-lamport",
            Self::LaiYang => "lai-yang",
            Self::PetersonKearns => "peterson-kearns",
        })
    }
}

impl FromStr for ProtocolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "chandy-lamport" | "cl" => Ok(Self::ChandyLamport),
            "lai-yang" | "ly" => Ok(Self::LaiYang),
            "peterson-kearns" | "pk" => Ok(Self::PetersonKearns),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}

/// How a process updates its state from an incoming value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Workload {
    /// `state = 2 * value`, forwarded to the first neighbor that is not the
    /// sender.
    Relay,
    /// `state = 2 * value`, forwarded to every neighbor.
    Flood,
    /// `state += value`, never forwarded.
    Accumulate,
}

/// Configuration shared by every process of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessConfig {
    /// Snapshot protocol.
    pub protocol: ProtocolKind,
    /// State update rule.
    pub workload: Workload,
    /// Hop budget attached to values this process originates. A value
    /// received with budget `n > 0` may be forwarded with budget `n - 1`.
    pub relay_hops: u32,
}

impl ProcessConfig {
    /// Configuration for `protocol` with its default workload.
    #[must_use]
    pub fn for_protocol(protocol: ProtocolKind) -> Self {
        Self {
            protocol,
            workload: protocol.default_workload(),
            relay_hops: 0,
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self::for_protocol(ProtocolKind::ChandyLamport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parse_aliases() {
        assert_eq!("cl".parse::<ProtocolKind>(), Ok(ProtocolKind::ChandyLamport));
        assert_eq!("Lai_Yang".parse::<ProtocolKind>(), Ok(ProtocolKind::LaiYang));
        assert_eq!(
            "peterson-kearns".parse::<ProtocolKind>(),
            Ok(ProtocolKind::PetersonKearns)
        );
        assert!("raft".parse::<ProtocolKind>().is_err());
    }

    #[test]
    fn test_default_workloads() {
        assert_eq!(
            ProcessConfig::for_protocol(ProtocolKind::LaiYang).workload,
            Workload::Flood
        );
        assert_eq!(ProcessConfig::default().workload, Workload::Relay);
        assert!(ProtocolKind::ChandyLamport.requires_fifo());
        assert!(!ProtocolKind::PetersonKearns.requires_fifo());
    }
}
