//! Checkpoint loading and replay planning.
//!
//! Recovery of a terminated process takes three steps:
//!
//! 1. Load its newest usable snapshot record. Records that cannot be read,
//!    or Peterson-Kearns records without a vector clock, are skipped in
//!    favour of the next older one.
//! 2. Respawn it from the recorded state and clock (done by the caller).
//! 3. Replay, in log order, every logged delivery to it whose send-time
//!    clock is not dominated by the recovered clock.

use tracing::{debug, warn};

use cutpoint_core::{should_replay, ProcessId, ProtocolKind, VectorClock};
use cutpoint_storage::{LogEntry, MessageLog, SnapshotRecord, SnapshotStore};

use crate::error::RecoveryError;

/// What recovering one process involves.
#[derive(Debug, Clone)]
pub struct RecoveryPlan {
    /// Record to restore from.
    pub record: SnapshotRecord,
    /// Newer records that were skipped as unusable.
    pub fallbacks: usize,
    /// Highest epoch the store holds for the process, usable or not. The
    /// respawned process continues after it so no epoch is reused.
    pub latest_epoch: u64,
    /// Log entries to redeliver, in log order.
    pub replay: Vec<LogEntry>,
    /// Log entries to the process already reflected in the record.
    pub skipped: usize,
}

/// Reads the store and log to plan recoveries.
pub struct RecoveryManager<'a> {
    snapshots: &'a dyn SnapshotStore,
    log: &'a dyn MessageLog,
}

impl<'a> RecoveryManager<'a> {
    /// Creates a manager over the given store and log.
    #[must_use]
    pub fn new(snapshots: &'a dyn SnapshotStore, log: &'a dyn MessageLog) -> Self {
        Self { snapshots, log }
    }

    /// Loads the newest usable record for `process`.
    ///
    /// Returns the record and the number of newer records skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError::NoSnapshot`] if the process has no record,
    /// [`RecoveryError::AllSnapshotsMalformed`] if none is usable, or a
    /// store error if the store cannot be listed.
    pub fn load_checkpoint(
        &self,
        process: &ProcessId,
    ) -> Result<(SnapshotRecord, usize), RecoveryError> {
        let epochs = self.snapshots.list(process)?;
        self.newest_usable(process, &epochs)
    }

    fn newest_usable(
        &self,
        process: &ProcessId,
        epochs: &[u64],
    ) -> Result<(SnapshotRecord, usize), RecoveryError> {
        if epochs.is_empty() {
            warn!(%process, "no snapshot found, recovery aborted");
            return Err(RecoveryError::NoSnapshot(process.clone()));
        }

        for (skipped, &epoch) in epochs.iter().rev().enumerate() {
            match self.snapshots.read(process, epoch) {
                Ok(Some(record)) if is_usable(&record) => return Ok((record, skipped)),
                Ok(Some(_)) => {
                    warn!(%process, epoch, "snapshot record has no vector clock, skipped");
                }
                Ok(None) => {
                    warn!(%process, epoch, "snapshot record vanished, skipped");
                }
                Err(e) => {
                    warn!(%process, epoch, error = %e, "malformed snapshot record skipped");
                }
            }
        }

        Err(RecoveryError::AllSnapshotsMalformed {
            process: process.clone(),
            count: epochs.len(),
        })
    }

    /// Plans the recovery of `process`.
    ///
    /// # Errors
    ///
    /// Returns an error if no usable record exists or the log cannot be
    /// read.
    pub fn plan(&self, process: &ProcessId) -> Result<RecoveryPlan, RecoveryError> {
        let epochs = self.snapshots.list(process)?;
        let (record, fallbacks) = self.newest_usable(process, &epochs)?;
        let latest_epoch = epochs.last().map_or(record.epoch, |&e| e.max(record.epoch));

        let (replay, skipped) = match &record.vector_clock {
            Some(clock) => {
                let entries = self.log.entries()?;
                replay_plan(&entries, process, clock)
            }
            None => (Vec::new(), 0),
        };
        debug!(
            %process,
            epoch = record.epoch,
            latest_epoch,
            replay = replay.len(),
            skipped,
            "recovery planned"
        );

        Ok(RecoveryPlan {
            record,
            fallbacks,
            latest_epoch,
            replay,
            skipped,
        })
    }
}

fn is_usable(record: &SnapshotRecord) -> bool {
    record.protocol != ProtocolKind::PetersonKearns || record.vector_clock.is_some()
}

/// Splits the log entries addressed to `process` into those to replay, in
/// log order, and a count of those dominated by `snapshot_clock`.
#[must_use]
pub fn replay_plan(
    entries: &[LogEntry],
    process: &ProcessId,
    snapshot_clock: &VectorClock,
) -> (Vec<LogEntry>, usize) {
    let mut skipped = 0;
    let replay = entries
        .iter()
        .filter(|entry| &entry.to == process)
        .filter(|entry| {
            let newer = should_replay(&entry.clock, snapshot_clock);
            if !newer {
                skipped += 1;
            }
            newer
        })
        .cloned()
        .collect();
    (replay, skipped)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::NaiveDate;
    use cutpoint_core::LocalSnapshot;
    use cutpoint_storage::{InMemoryMessageLog, InMemorySnapshotStore};

    use super::*;

    fn pid(id: &str) -> ProcessId {
        ProcessId::from(id)
    }

    fn clock(text: &str) -> VectorClock {
        text.parse().unwrap()
    }

    fn entry(from: &str, to: &str, value: i64, vc: &str) -> LogEntry {
        LogEntry {
            from: pid(from),
            to: pid(to),
            value,
            clock: clock(vc),
        }
    }

    fn record(process: &str, epoch: u64, state: i64, vc: Option<&str>) -> SnapshotRecord {
        let snapshot = LocalSnapshot {
            process: pid(process),
            epoch,
            protocol: ProtocolKind::PetersonKearns,
            state,
            clock: vc.map(clock),
            channel_states: BTreeMap::new(),
            counters: BTreeMap::new(),
        };
        let at = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, u32::try_from(epoch).unwrap()))
            .unwrap();
        SnapshotRecord::new(snapshot, at)
    }

    #[test]
    fn test_replay_plan_keeps_log_order_and_filters_receiver() {
        let entries = vec![
            entry("b", "a", 1, "{b: 1}"),
            entry("a", "b", 2, "{a: 5}"),
            entry("c", "a", 3, "{c: 4}"),
            entry("b", "a", 4, "{b: 3}"),
        ];
        let (replay, skipped) = replay_plan(&entries, &pid("a"), &clock("{a: 2, b: 2}"));
        let values: Vec<i64> = replay.iter().map(|e| e.value).collect();
        assert_eq!(values, vec![3, 4]);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn test_no_snapshot_aborts() {
        let store = InMemorySnapshotStore::new();
        let log = InMemoryMessageLog::new();
        let err = RecoveryManager::new(&store, &log)
            .load_checkpoint(&pid("a"))
            .unwrap_err();
        assert!(matches!(err, RecoveryError::NoSnapshot(p) if p == pid("a")));
    }

    #[test]
    fn test_record_without_clock_falls_back_to_older() {
        let store = InMemorySnapshotStore::new();
        let log = InMemoryMessageLog::new();
        store.append(&record("a", 1, 7, Some("{a: 2}"))).unwrap();
        store.append(&record("a", 2, 9, None)).unwrap();

        let plan = RecoveryManager::new(&store, &log).plan(&pid("a")).unwrap();
        assert_eq!(plan.record.epoch, 1);
        assert_eq!(plan.record.state, 7);
        assert_eq!(plan.fallbacks, 1);
        assert_eq!(plan.latest_epoch, 2);
    }

    #[test]
    fn test_all_records_unusable() {
        let store = InMemorySnapshotStore::new();
        let log = InMemoryMessageLog::new();
        store.append(&record("a", 1, 7, None)).unwrap();

        let err = RecoveryManager::new(&store, &log).plan(&pid("a")).unwrap_err();
        assert!(matches!(err, RecoveryError::AllSnapshotsMalformed { count: 1, .. }));
    }

    #[test]
    fn test_plan_replays_undominated_entries() {
        let store = InMemorySnapshotStore::new();
        let log = InMemoryMessageLog::new();
        store.append(&record("a", 1, 7, Some("{a: 3, b: 2}"))).unwrap();
        log.append(&entry("b", "a", 1, "{b: 1}")).unwrap();
        log.append(&entry("b", "a", 5, "{b: 3}")).unwrap();

        let plan = RecoveryManager::new(&store, &log).plan(&pid("a")).unwrap();
        assert_eq!(plan.replay.len(), 1);
        assert_eq!(plan.replay[0].value, 5);
        assert_eq!(plan.skipped, 1);
    }
}
