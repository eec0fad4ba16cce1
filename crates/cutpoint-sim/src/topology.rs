//! Topology input.
//!
//! Accepts the adjacency text of a DOT-like graph file:
//!
//! ```text
//! digraph G {
//!     "0" -> "1" [weight=3];
//!     "1" -- "2" ["weight"="1"];
//! }
//! ```
//!
//! Any line containing `->` or `--` is an edge: first token source, third
//! token destination, quotes stripped. `--` adds both directions. Other
//! lines are ignored. A weight that does not parse is logged and dropped.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::warn;

use cutpoint_core::ProcessId;

use crate::error::TopologyError;

/// A directed edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Source process.
    pub from: ProcessId,
    /// Destination process.
    pub to: ProcessId,
    /// Edge weight, if given.
    pub weight: Option<i64>,
}

/// Processes and the directed channels between them.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: BTreeSet<ProcessId>,
    edges: Vec<Edge>,
}

impl Topology {
    /// Empty topology.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bidirectional ring `0 -- 1 -- ... -- n-1 -- 0`.
    #[must_use]
    pub fn ring(n: usize) -> Self {
        let mut topology = Self::new();
        for i in 0..n {
            topology.add_node(ProcessId::from(i));
        }
        if n > 1 {
            for i in 0..n {
                let next = (i + 1) % n;
                topology.add_undirected(ProcessId::from(i), ProcessId::from(next), None);
            }
        }
        topology
    }

    /// Directed cycle through `ids` in order.
    #[must_use]
    pub fn cycle(ids: &[&str]) -> Self {
        let mut topology = Self::new();
        for (i, id) in ids.iter().enumerate() {
            let next = ids[(i + 1) % ids.len()];
            topology.add_edge(ProcessId::from(*id), ProcessId::from(next), None);
        }
        topology
    }

    /// Parses adjacency text.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::InvalidEdge`] for a line with an edge
    /// operator but fewer than three tokens or a misplaced operator.
    pub fn parse(text: &str) -> Result<Self, TopologyError> {
        let mut topology = Self::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.starts_with("//") || line.starts_with('#') {
                continue;
            }
            let directed = line.contains("->");
            if !directed && !line.contains("--") {
                continue;
            }

            let invalid = || TopologyError::InvalidEdge {
                line: index + 1,
                text: raw.to_string(),
            };
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 3 || !matches!(tokens[1], "->" | "--") {
                return Err(invalid());
            }
            let from = node_name(tokens[0]);
            let to = node_name(tokens[2]);
            if from.is_empty() || to.is_empty() {
                return Err(invalid());
            }

            let weight = parse_weight(line, index + 1);
            if tokens[1] == "->" {
                topology.add_edge(ProcessId::new(from), ProcessId::new(to), weight);
            } else {
                topology.add_undirected(ProcessId::new(from), ProcessId::new(to), weight);
            }
        }
        Ok(topology)
    }

    /// Reads and parses a graph file.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::Io`] if the file cannot be read, or a parse
    /// error from [`Topology::parse`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TopologyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Adds an isolated process.
    pub fn add_node(&mut self, id: ProcessId) {
        self.nodes.insert(id);
    }

    /// Adds a directed edge and both endpoints.
    pub fn add_edge(&mut self, from: ProcessId, to: ProcessId, weight: Option<i64>) {
        self.nodes.insert(from.clone());
        self.nodes.insert(to.clone());
        if !self.edges.iter().any(|e| e.from == from && e.to == to) {
            self.edges.push(Edge { from, to, weight });
        }
    }

    /// Adds edges in both directions.
    pub fn add_undirected(&mut self, a: ProcessId, b: ProcessId, weight: Option<i64>) {
        self.add_edge(a.clone(), b.clone(), weight);
        self.add_edge(b, a, weight);
    }

    /// Removes the directed edge `from -> to`.
    pub fn remove_edge(&mut self, from: &ProcessId, to: &ProcessId) {
        self.edges.retain(|e| !(&e.from == from && &e.to == to));
    }

    /// All processes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &ProcessId> {
        self.nodes.iter()
    }

    /// All edges in insertion order.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Outgoing neighbors of `id`.
    #[must_use]
    pub fn neighbors_of(&self, id: &ProcessId) -> BTreeSet<ProcessId> {
        self.edges
            .iter()
            .filter(|e| &e.from == id)
            .map(|e| e.to.clone())
            .collect()
    }

    /// Processes with an edge into `id`.
    #[must_use]
    pub fn predecessors_of(&self, id: &ProcessId) -> BTreeSet<ProcessId> {
        self.edges
            .iter()
            .filter(|e| &e.to == id)
            .map(|e| e.from.clone())
            .collect()
    }

    /// The `{process -> neighbor set}` mapping.
    #[must_use]
    pub fn neighbor_map(&self) -> BTreeMap<ProcessId, BTreeSet<ProcessId>> {
        self.nodes
            .iter()
            .map(|id| (id.clone(), self.neighbors_of(id)))
            .collect()
    }

    /// Number of processes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if there are no processes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn node_name(token: &str) -> &str {
    let token = token.split('[').next().unwrap_or(token);
    token.trim_end_matches(';').trim_matches('"')
}

fn parse_weight(line: &str, line_no: usize) -> Option<i64> {
    let start = line.find("weight")?;
    let rest = line[start + "weight".len()..].trim_start_matches('"').trim_start();
    let rest = rest.strip_prefix('=')?.trim_start().trim_start_matches('"');
    let digits: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    match digits.parse::<i64>() {
        Ok(weight) => Some(weight),
        Err(e) => {
            warn!(line = line_no, error = %e, "edge weight ignored");
            None
        }
    }
}
