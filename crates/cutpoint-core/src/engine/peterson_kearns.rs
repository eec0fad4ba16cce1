//! Peterson-Kearns independent checkpointing.
//!
//! Checkpoints are local and uncoordinated: a trigger persists the current
//! state, the full vector clock and the values received per channel since
//! the previous checkpoint. Consistency is restored at recovery time by
//! replaying logged messages the checkpoint's clock does not dominate.

use std::collections::BTreeMap;

use tracing::info;

use crate::clock::VectorClock;
use crate::config::ProtocolKind;
use crate::engine::Verdict;
use crate::id::ProcessId;
use crate::message::AppMessage;
use crate::process::{Action, Node};
use crate::snapshot::LocalSnapshot;

/// Peterson-Kearns bookkeeping of one process.
#[derive(Debug)]
pub struct PetersonKearns {
    clock: VectorClock,
    epoch: u64,
}

impl PetersonKearns {
    pub(crate) fn new(id: &ProcessId) -> Self {
        let mut clock = VectorClock::new();
        clock.observe(id);
        Self { clock, epoch: 0 }
    }

    pub(crate) fn restored(clock: VectorClock, epoch: u64) -> Self {
        Self { clock, epoch }
    }

    /// Current vector clock.
    #[must_use]
    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    /// Number of checkpoints taken.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn set_clock(&mut self, clock: VectorClock) {
        self.clock = clock;
    }

    pub(crate) fn stamp(&mut self, node: &Node, value: i64, hops: u32) -> AppMessage {
        self.clock.tick(&node.id);
        AppMessage {
            value,
            hops,
            epoch: self.epoch,
            clock: Some(self.clock.clone()),
        }
    }

    pub(crate) fn on_app(&mut self, node: &mut Node, from: &ProcessId, msg: &AppMessage) -> Verdict {
        if let Some(sent) = &msg.clock {
            self.clock.merge(sent);
        }
        self.clock.tick(&node.id);
        node.inbound_mut(from, false).record(msg.value);
        Verdict::Accept
    }

    pub(crate) fn on_neighbor_added(&mut self, to: &ProcessId) {
        self.clock.observe(to);
    }

    pub(crate) fn initiate(&mut self, node: &mut Node, out: &mut Vec<Action>) {
        self.epoch += 1;
        let snapshot = LocalSnapshot {
            process: node.id.clone(),
            epoch: self.epoch,
            protocol: ProtocolKind::PetersonKearns,
            state: node.state,
            clock: Some(self.clock.clone()),
            channel_states: node.take_channel_states(),
            counters: BTreeMap::new(),
        };
        info!(
            process = %node.id,
            epoch = self.epoch,
            state = node.state,
            clock = %self.clock,
            "checkpoint taken"
        );
        out.push(Action::Persist(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use crate::process::{Action, Input, Process};
    use crate::{Envelope, Message, ProcessConfig, ProcessId, ProtocolKind, VectorClock};

    fn pid(id: &str) -> ProcessId {
        ProcessId::from(id)
    }

    fn pair() -> (Process, Process) {
        let config = ProcessConfig::for_protocol(ProtocolKind::PetersonKearns);
        let mut a = Process::new(pid("a"), config);
        let mut b = Process::new(pid("b"), config);
        a.handle(Input::AddNeighbor(pid("b")));
        b.handle(Input::AddNeighbor(pid("a")));
        (a, b)
    }

    fn sent(actions: Vec<Action>) -> Envelope {
        actions
            .into_iter()
            .find_map(|a| match a {
                Action::Send(e) => Some(e),
                _ => None,
            })
            .expect("a send")
    }

    #[test]
    fn test_send_ticks_and_piggybacks_clock() {
        let (mut a, _) = pair();
        let env = sent(a.handle(Input::Send {
            to: pid("b"),
            value: 10,
        }));
        let clock = env.message.as_app().and_then(|m| m.clock.clone()).unwrap();
        assert_eq!(clock.get(&pid("a")), 1);
        assert_eq!(a.clock().unwrap().get(&pid("a")), 1);
    }

    #[test]
    fn test_receive_merges_then_ticks() {
        let (mut a, mut b) = pair();
        let env = sent(a.handle(Input::Send {
            to: pid("b"),
            value: 10,
        }));
        b.handle(Input::Deliver(env));
        let clock = b.clock().unwrap();
        assert_eq!(clock.get(&pid("a")), 1);
        assert_eq!(clock.get(&pid("b")), 1);
        assert_eq!(b.state(), 10);
    }

    #[test]
    fn test_checkpoint_persists_clock_and_receive_log() {
        let (mut a, mut b) = pair();
        for v in [1, 2] {
            let env = sent(a.handle(Input::Send { to: pid("b"), value: v }));
            b.handle(Input::Deliver(env));
        }
        let snapshot = b
            .handle(Input::InitiateSnapshot)
            .into_iter()
            .find_map(|x| match x {
                Action::Persist(s) => Some(s),
                _ => None,
            })
            .unwrap();
        assert_eq!(snapshot.state, 3);
        assert_eq!(snapshot.channel_states[&pid("a")], vec![1, 2]);
        assert_eq!(snapshot.clock.as_ref().unwrap().get(&pid("a")), 2);
        assert_eq!(snapshot.epoch, 1);
        assert!(!b.is_recording());
    }

    #[test]
    fn test_set_state_replaces_state_and_clock() {
        let (mut a, _) = pair();
        let clock: VectorClock = "{a: 4, b: 2}".parse().unwrap();
        a.handle(Input::SetState {
            state: 99,
            clock: Some(clock.clone()),
        });
        assert_eq!(a.state(), 99);
        assert_eq!(a.clock(), Some(&clock));
    }

    #[test]
    fn test_markers_are_ignored() {
        let (mut a, _) = pair();
        let actions = a.handle(Input::Deliver(Envelope::new(
            pid("b"),
            pid("a"),
            Message::Marker { epoch: 1 },
        )));
        assert!(actions.is_empty());
    }
}
