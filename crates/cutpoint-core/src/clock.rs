//! Vector clocks.
//!
//! A [`VectorClock`] maps process ids to logical counters. Entries never
//! decrease: [`VectorClock::tick`] bumps one entry and
//! [`VectorClock::merge`] takes the pointwise maximum, so merge is
//! idempotent, commutative and associative.
//!
//! ## Dominance
//!
//! Clock `a` dominates `b` when no entry of `b` exceeds the matching entry
//! of `a` (missing entries count as zero). Recovery replays a logged message
//! only when its send-time clock is *not* dominated by the checkpoint's
//! clock, see [`should_replay`].
//!
//! The textual form is `{a: 1, b: 2}`, as written to the message log.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::ProcessId;

/// Per-process logical counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(BTreeMap<ProcessId, u64>);

impl VectorClock {
    /// Creates an empty clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `id`, zero when absent.
    #[must_use]
    pub fn get(&self, id: &ProcessId) -> u64 {
        self.0.get(id).copied().unwrap_or(0)
    }

    /// Increments the entry for `id` and returns the new value.
    pub fn tick(&mut self, id: &ProcessId) -> u64 {
        let entry = self.0.entry(id.clone()).or_insert(0);
        *entry = entry.saturating_add(1);
        *entry
    }

    /// Ensures an entry exists for `id` without changing an existing one.
    pub fn observe(&mut self, id: &ProcessId) {
        self.0.entry(id.clone()).or_insert(0);
    }

    /// Raises `id` to at least `value`.
    pub fn raise(&mut self, id: &ProcessId, value: u64) {
        let entry = self.0.entry(id.clone()).or_insert(0);
        *entry = (*entry).max(value);
    }

    /// Merges `other` into `self` by pointwise maximum.
    pub fn merge(&mut self, other: &VectorClock) {
        for (id, &value) in &other.0 {
            self.raise(id, value);
        }
    }

    /// Returns the pointwise maximum of `self` and `other`.
    #[must_use]
    pub fn merged(&self, other: &VectorClock) -> VectorClock {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Returns `true` if no entry of `other` exceeds the matching entry of
    /// `self`.
    #[must_use]
    pub fn dominates(&self, other: &VectorClock) -> bool {
        other.0.iter().all(|(id, &value)| value <= self.get(id))
    }

    /// Iterates entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&ProcessId, u64)> {
        self.0.iter().map(|(id, &v)| (id, v))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the clock has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Decides whether a logged message must be redelivered after recovering
/// from a checkpoint taken at `snapshot`.
///
/// True iff some component of `message` exceeds the checkpoint's entry for
/// the same process (absent entries count as zero).
#[must_use]
pub fn should_replay(message: &VectorClock, snapshot: &VectorClock) -> bool {
    message.iter().any(|(id, value)| value > snapshot.get(id))
}

impl FromIterator<(ProcessId, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (ProcessId, u64)>>(iter: I) -> Self {
        let mut clock = Self::new();
        for (id, value) in iter {
            clock.raise(&id, value);
        }
        clock
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (id, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{id}: {value}")?;
        }
        f.write_str("}")
    }
}

impl FromStr for VectorClock {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| CoreError::InvalidClock {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let body = s
            .trim()
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(|| invalid("missing braces"))?;

        let mut clock = VectorClock::new();
        for pair in body.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (id, value) = pair
                .split_once(['=', ':'])
                .ok_or_else(|| invalid("entry without separator"))?;
            let id = id.trim().trim_matches('"');
            if id.is_empty() {
                return Err(invalid("empty process id"));
            }
            let value = value
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid("entry value is not a non-negative integer"))?;
            clock.raise(&ProcessId::new(id), value);
        }
        Ok(clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vc(entries: &[(&str, u64)]) -> VectorClock {
        entries
            .iter()
            .map(|(id, v)| (ProcessId::from(*id), *v))
            .collect()
    }

    fn samples() -> Vec<VectorClock> {
        vec![
            VectorClock::new(),
            vc(&[("a", 1)]),
            vc(&[("a", 3), ("b", 1)]),
            vc(&[("b", 4), ("c", 2)]),
            vc(&[("a", 0), ("c", 7)]),
        ]
    }

    #[test]
    fn test_tick_increments_own_entry() {
        let mut clock = VectorClock::new();
        let a = ProcessId::from("a");
        assert_eq!(clock.tick(&a), 1);
        assert_eq!(clock.tick(&a), 2);
        assert_eq!(clock.get(&a), 2);
        assert_eq!(clock.get(&ProcessId::from("b")), 0);
    }

    #[test]
    fn test_merge_is_idempotent() {
        for clock in samples() {
            assert_eq!(clock.merged(&clock), clock);
        }
    }

    #[test]
    fn test_merge_is_commutative() {
        let clocks = samples();
        for a in &clocks {
            for b in &clocks {
                assert_eq!(a.merged(b), b.merged(a));
            }
        }
    }

    #[test]
    fn test_merge_never_decreases_entries() {
        let clocks = samples();
        for a in &clocks {
            for b in &clocks {
                let m = a.merged(b);
                assert!(m.dominates(a));
                assert!(m.dominates(b));
            }
        }
    }

    #[test]
    fn test_dominance_treats_missing_as_zero() {
        assert!(vc(&[("a", 1)]).dominates(&VectorClock::new()));
        assert!(vc(&[("a", 1)]).dominates(&vc(&[("b", 0)])));
        assert!(!vc(&[("a", 1)]).dominates(&vc(&[("b", 1)])));
    }

    #[test]
    fn test_should_replay_skips_dominated_entries() {
        let snapshot = vc(&[("a", 3), ("b", 3)]);
        assert!(!should_replay(&vc(&[("a", 1)]), &snapshot));
        assert!(!should_replay(&vc(&[("a", 3), ("b", 3)]), &snapshot));
        assert!(!should_replay(&VectorClock::new(), &snapshot));
    }

    #[test]
    fn test_should_replay_detects_any_prevailing_component() {
        let snapshot = vc(&[("a", 3), ("b", 3)]);
        assert!(should_replay(&vc(&[("b", 4)]), &snapshot));
        assert!(should_replay(&vc(&[("a", 1), ("c", 1)]), &snapshot));
    }

    #[test]
    fn test_should_replay_is_negation_of_dominance() {
        let clocks = samples();
        for m in &clocks {
            for s in &clocks {
                assert_eq!(should_replay(m, s), !s.dominates(m));
            }
        }
    }

    #[test]
    fn test_display_and_parse() {
        let clock = vc(&[("0", 2), ("1", 5)]);
        assert_eq!(clock.to_string(), "{0: 2, 1: 5}");
        assert_eq!("{0: 2, 1: 5}".parse::<VectorClock>().unwrap(), clock);
        assert_eq!("{}".parse::<VectorClock>().unwrap(), VectorClock::new());
    }

    #[test]
    fn test_parse_accepts_equals_separator() {
        let parsed: VectorClock = "{0=2, 1=5}".parse().unwrap();
        assert_eq!(parsed, vc(&[("0", 2), ("1", 5)]));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("0: 2".parse::<VectorClock>().is_err());
        assert!("{0 2}".parse::<VectorClock>().is_err());
        assert!("{0: -1}".parse::<VectorClock>().is_err());
        assert!("{: 1}".parse::<VectorClock>().is_err());
    }
}
