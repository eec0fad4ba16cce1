//! Process identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a process, unique within one run.
///
/// Identifiers order lexicographically, which keeps every map keyed by
/// process deterministic. They appear verbatim in snapshot file names and
/// message log lines, so they should not contain `,`, `:`, `{` or `}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    /// Creates an identifier from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ProcessId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<usize> for ProcessId {
    fn from(index: usize) -> Self {
        Self(index.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trips_the_raw_id() {
        let id = ProcessId::new("NodeA");
        assert_eq!(id.to_string(), "NodeA");
        assert_eq!(id.as_str(), "NodeA");
    }

    #[test]
    fn test_numeric_ids_are_strings() {
        assert_eq!(ProcessId::from(3usize), ProcessId::from("3"));
    }

    #[test]
    fn test_orders_lexicographically() {
        let mut ids = vec![ProcessId::from("b"), ProcessId::from("a"), ProcessId::from("c")];
        ids.sort();
        assert_eq!(ids, vec![ProcessId::from("a"), ProcessId::from("b"), ProcessId::from("c")]);
    }
}
