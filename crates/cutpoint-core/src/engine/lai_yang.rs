//! Lai-Yang counter protocol.
//!
//! No FIFO assumption. Every application message carries the sender's epoch,
//! so a receiver can tell whether it was sent before the sender's cut
//! (pre-cut) or after it (post-cut):
//!
//! 1. On its cut a process records its state and sends `Presnap(e, n)` on
//!    every outgoing channel, `n` being the application messages it put on
//!    that channel since its previous cut.
//! 2. A process that is not recording cuts as soon as it sees either a
//!    `Presnap` or an application message of a newer epoch, before
//!    applying that message. Epochs are cut one at a time: a message more
//!    than one epoch ahead is held until the epochs before it complete.
//! 3. While recording, every pre-cut message is counted and recorded as in
//!    transit. A channel is closed once the count announced by its sender
//!    has arrived.
//! 4. The epoch completes when every inbound channel is closed.
//!
//! The expected count of a channel (`announced - received`) never
//! increases once announced and is clamped at zero.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::config::ProtocolKind;
use crate::engine::Verdict;
use crate::id::ProcessId;
use crate::message::{AppMessage, Message};
use crate::process::{Action, Node};
use crate::snapshot::{ChannelCounters, LocalSnapshot};

#[derive(Debug)]
struct Recording {
    state: i64,
    sent: BTreeMap<ProcessId, u64>,
}

/// Lai-Yang bookkeeping of one process.
#[derive(Debug, Default)]
pub struct LaiYang {
    /// Number of cuts taken; stamped on outgoing application messages.
    epoch: u64,
    recording: Option<Recording>,
}

impl LaiYang {
    pub(crate) fn restored(epoch: u64) -> Self {
        Self {
            epoch,
            recording: None,
        }
    }

    /// Whether the process has cut but not yet closed every channel.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Last completed epoch.
    #[must_use]
    pub fn completed_epoch(&self) -> u64 {
        if self.is_recording() {
            self.epoch - 1
        } else {
            self.epoch
        }
    }

    pub(crate) fn stamp(&self, value: i64, hops: u32) -> AppMessage {
        AppMessage {
            value,
            hops,
            epoch: self.epoch,
            clock: None,
        }
    }

    pub(crate) fn initiate(&mut self, node: &mut Node, out: &mut Vec<Action>) {
        if self.is_recording() {
            debug!(process = %node.id, epoch = self.epoch, "already recording, trigger ignored");
            return;
        }
        self.cut(node, self.epoch + 1, out);
        self.check_complete(node, out);
    }

    fn cut(&mut self, node: &mut Node, epoch: u64, out: &mut Vec<Action>) {
        debug!(process = %node.id, epoch, state = node.state, "recording local state");
        self.epoch = epoch;
        for channel in node.incoming.values_mut() {
            channel.begin_counter_cut();
        }
        let sent: BTreeMap<ProcessId, u64> = node
            .outgoing
            .iter_mut()
            .map(|(to, channel)| (to.clone(), channel.take_sent()))
            .collect();
        for (to, &count) in &sent {
            node.send_control(to, Message::Presnap { epoch, count }, out);
        }
        self.recording = Some(Recording {
            state: node.state,
            sent,
        });
    }

    pub(crate) fn on_presnap(
        &mut self,
        node: &mut Node,
        from: &ProcessId,
        epoch: u64,
        count: u64,
        out: &mut Vec<Action>,
    ) -> Verdict {
        if !self.is_recording() {
            if epoch <= self.epoch {
                debug!(process = %node.id, %from, epoch, "late presnap ignored");
                return Verdict::Accept;
            }
            self.cut(node, self.epoch + 1, out);
        }
        if epoch < self.epoch {
            debug!(process = %node.id, %from, epoch, "late presnap ignored");
            return Verdict::Accept;
        }
        if epoch > self.epoch {
            debug!(process = %node.id, %from, epoch, current = self.epoch, "presnap overtook an earlier epoch");
            return Verdict::Hold;
        }

        let me = node.id.clone();
        let channel = node.inbound_mut(from, false);
        if channel.announced().is_some() {
            debug!(process = %me, %from, epoch, count, "duplicate presnap");
        }
        channel.announce(count);
        self.check_complete(node, out);
        Verdict::Accept
    }

    pub(crate) fn on_app(
        &mut self,
        node: &mut Node,
        from: &ProcessId,
        msg: &AppMessage,
        out: &mut Vec<Action>,
    ) -> Verdict {
        if !self.is_recording() {
            if msg.epoch <= self.epoch {
                if msg.epoch == self.epoch {
                    node.inbound_mut(from, false).count_pre_cut();
                } else {
                    debug!(process = %node.id, %from, msg_epoch = msg.epoch, "stale message");
                }
                return Verdict::Accept;
            }
            debug!(process = %node.id, %from, epoch = msg.epoch, "sender is recording, cascading");
            self.cut(node, self.epoch + 1, out);
        }

        if msg.epoch > self.epoch {
            return Verdict::Hold;
        }
        let channel = node.inbound_mut(from, true);
        if msg.epoch == self.epoch {
            channel.count_post_cut();
        } else if channel.counter_closed() {
            warn!(
                process = %node.id,
                %from,
                value = msg.value,
                "pre-cut message on a closed channel, not recorded"
            );
        } else {
            channel.count_pre_cut();
            channel.record(msg.value);
        }
        self.check_complete(node, out);
        Verdict::Accept
    }

    pub(crate) fn on_neighbor_added(&mut self, node: &Node, to: &ProcessId, out: &mut Vec<Action>) {
        if let Some(recording) = &mut self.recording {
            recording.sent.insert(to.clone(), 0);
            node.send_control(
                to,
                Message::Presnap {
                    epoch: self.epoch,
                    count: 0,
                },
                out,
            );
        }
    }

    pub(crate) fn check_complete(&mut self, node: &mut Node, out: &mut Vec<Action>) {
        if self.recording.is_none() || !node.incoming.values().all(|c| c.counter_closed()) {
            return;
        }
        let Some(recording) = self.recording.take() else {
            return;
        };

        let mut counters: BTreeMap<ProcessId, ChannelCounters> = recording
            .sent
            .iter()
            .map(|(id, &sent)| {
                (
                    id.clone(),
                    ChannelCounters {
                        sent,
                        ..ChannelCounters::default()
                    },
                )
            })
            .collect();
        for (id, channel) in &node.incoming {
            let entry = counters.entry(id.clone()).or_default();
            entry.received = channel.pre_cut_received();
            entry.expected = channel.announced().unwrap_or(0);
        }

        let snapshot = LocalSnapshot {
            process: node.id.clone(),
            epoch: self.epoch,
            protocol: ProtocolKind::LaiYang,
            state: recording.state,
            clock: None,
            channel_states: node.take_channel_states(),
            counters,
        };
        for channel in node.incoming.values_mut() {
            channel.rotate_counters();
        }
        info!(
            process = %node.id,
            epoch = self.epoch,
            state = recording.state,
            in_transit = snapshot.in_transit_len(),
            "snapshot complete"
        );
        out.push(Action::Persist(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use crate::process::{Action, Input, Process};
    use crate::{
        AppMessage, Envelope, LocalSnapshot, Message, ProcessConfig, ProcessId, ProtocolKind,
        Workload,
    };

    fn pid(id: &str) -> ProcessId {
        ProcessId::from(id)
    }

    fn process_a() -> Process {
        let mut a = Process::new(pid("a"), ProcessConfig::for_protocol(ProtocolKind::LaiYang));
        a.handle(Input::AddNeighbor(pid("b")));
        a.handle(Input::AddInbound(pid("b")));
        a
    }

    fn presnap(epoch: u64, count: u64) -> Input {
        Input::Deliver(Envelope::new(pid("b"), pid("a"), Message::Presnap { epoch, count }))
    }

    fn value(v: i64, epoch: u64) -> Input {
        Input::Deliver(Envelope::new(
            pid("b"),
            pid("a"),
            Message::App(AppMessage {
                epoch,
                ..AppMessage::plain(v)
            }),
        ))
    }

    fn persisted(actions: Vec<Action>) -> Option<LocalSnapshot> {
        actions.into_iter().find_map(|a| match a {
            Action::Persist(s) => Some(s),
            _ => None,
        })
    }

    #[test]
    fn test_cut_sends_presnap_with_send_count() {
        let mut a = process_a();
        a.handle(Input::Send {
            to: pid("b"),
            value: 1,
        });
        a.handle(Input::Send {
            to: pid("b"),
            value: 2,
        });
        let actions = a.handle(Input::InitiateSnapshot);
        assert!(actions.iter().any(|x| matches!(
            x,
            Action::Send(e) if e.message == Message::Presnap { epoch: 1, count: 2 }
        )));
        assert!(a.is_recording());
    }

    #[test]
    fn test_expected_count_decreases_to_zero() {
        let mut a = process_a();
        a.handle(Input::InitiateSnapshot);
        a.handle(presnap(1, 3));
        let mut seen = vec![a.expected_inbound(&pid("b")).unwrap()];
        let mut snapshot = None;
        for v in [10, 20, 30] {
            snapshot = persisted(a.handle(value(v, 0))).or(snapshot);
            seen.push(a.expected_inbound(&pid("b")).unwrap_or(0));
        }
        assert_eq!(seen, vec![3, 2, 1, 0]);
        let snapshot = snapshot.expect("completed");
        assert_eq!(snapshot.channel_states[&pid("b")], vec![10, 20, 30]);
        assert_eq!(snapshot.counters[&pid("b")].expected, 3);
    }

    #[test]
    fn test_pre_cut_messages_received_before_cut_reduce_expectation() {
        let mut a = process_a();
        a.handle(value(1, 0));
        a.handle(Input::InitiateSnapshot);
        // b sent two pre-cut messages, one already arrived
        a.handle(presnap(1, 2));
        assert_eq!(a.expected_inbound(&pid("b")), Some(1));
        let snapshot = persisted(a.handle(value(2, 0))).expect("completed");
        assert_eq!(snapshot.channel_states[&pid("b")], vec![2]);
    }

    #[test]
    fn test_message_from_recording_sender_cascades_before_apply() {
        let mut a = process_a();
        a.handle(Input::Compute { value: 5 });
        assert_eq!(a.state(), 10);
        a.handle(value(7, 1));
        assert!(a.is_recording());
        assert_eq!(a.state(), 14);
        let snapshot = persisted(a.handle(presnap(1, 0))).expect("completed");
        assert_eq!(snapshot.state, 10);
        assert!(snapshot.channel_states[&pid("b")].is_empty());
    }

    #[test]
    fn test_presnap_triggers_cut() {
        let mut a = process_a();
        let actions = a.handle(presnap(1, 0));
        assert!(actions.iter().any(|x| matches!(
            x,
            Action::Send(e) if matches!(e.message, Message::Presnap { epoch: 1, .. })
        )));
        assert_eq!(a.completed_epoch(), 1);
    }

    #[test]
    fn test_late_presnap_is_ignored() {
        let mut a = process_a();
        a.handle(presnap(1, 0));
        assert!(a.handle(presnap(1, 0)).is_empty());
        assert!(!a.is_recording());
    }

    #[test]
    fn test_duplicate_presnap_keeps_the_larger_count() {
        let mut a = process_a();
        a.handle(Input::InitiateSnapshot);
        a.handle(presnap(1, 2));
        assert!(a.handle(presnap(1, 1)).is_empty());
        assert_eq!(a.expected_inbound(&pid("b")), Some(2));
        assert!(a.is_recording());
    }

    #[test]
    fn test_excess_pre_cut_message_is_clamped() {
        let mut a = process_a();
        a.handle(Input::AddInbound(pid("c")));
        a.handle(Input::InitiateSnapshot);
        a.handle(presnap(1, 0));
        a.handle(value(9, 0));
        assert_eq!(a.expected_inbound(&pid("b")), Some(0));
        assert!(a.recorded(&pid("b")).is_empty());
    }

    #[test]
    fn test_repeated_epochs_rotate_counters() {
        let mut a = process_a();
        a.handle(Input::InitiateSnapshot);
        a.handle(value(1, 1));
        assert!(persisted(a.handle(presnap(1, 0))).is_some());
        // the post-cut message of epoch 1 is pre-cut for epoch 2
        a.handle(Input::InitiateSnapshot);
        let snapshot = persisted(a.handle(presnap(2, 1))).expect("completed");
        assert_eq!(snapshot.counters[&pid("b")].received, 1);
        assert!(snapshot.channel_states[&pid("b")].is_empty());
        assert_eq!(a.completed_epoch(), 2);
    }

    #[test]
    fn test_newer_epoch_message_waits_for_earlier_epoch() {
        let mut a = process_a();
        // b already cut epochs 1 and 2
        a.handle(value(7, 2));
        assert!(a.is_recording());
        assert_eq!(a.current_epoch(), Some(1));
        assert_eq!(a.held_len(), 1);
        assert_eq!(a.state(), 0);

        let first = persisted(a.handle(presnap(1, 0))).expect("epoch 1 completed");
        assert_eq!(first.epoch, 1);
        assert_eq!(first.state, 0);
        // released into epoch 2 as a post-cut message
        assert_eq!(a.held_len(), 0);
        assert_eq!(a.current_epoch(), Some(2));
        assert_eq!(a.state(), 14);

        let second = persisted(a.handle(presnap(2, 0))).expect("epoch 2 completed");
        assert_eq!(second.epoch, 2);
        assert_eq!(second.state, 0);
    }

    #[test]
    fn test_overtaking_presnap_records_every_epoch_in_order() {
        let mut b = Process::new(pid("b"), ProcessConfig::for_protocol(ProtocolKind::LaiYang));
        b.handle(Input::AddNeighbor(pid("a")));
        let send = |v: i64| Input::Send {
            to: pid("a"),
            value: v,
        };
        let mut sent: Vec<Envelope> = Vec::new();
        for input in [send(100), Input::InitiateSnapshot, send(200), Input::InitiateSnapshot] {
            sent.extend(b.handle(input).into_iter().filter_map(|action| match action {
                Action::Send(e) => Some(e),
                _ => None,
            }));
        }
        assert_eq!(b.completed_epoch(), 2);
        let [v100, presnap1, v200, presnap2] = <[Envelope; 4]>::try_from(sent).expect("four envelopes");
        assert_eq!(presnap1.message, Message::Presnap { epoch: 1, count: 1 });
        assert_eq!(presnap2.message, Message::Presnap { epoch: 2, count: 1 });

        let config = ProcessConfig {
            workload: Workload::Accumulate,
            ..ProcessConfig::for_protocol(ProtocolKind::LaiYang)
        };
        let mut a = Process::new(pid("a"), config);
        a.handle(Input::AddInbound(pid("b")));
        let mut snapshots = Vec::new();
        for envelope in [presnap2, v100, v200, presnap1] {
            snapshots.extend(a.handle(Input::Deliver(envelope)).into_iter().filter_map(
                |action| match action {
                    Action::Persist(s) => Some(s),
                    _ => None,
                },
            ));
        }

        let epochs: Vec<u64> = snapshots.iter().map(|s| s.epoch).collect();
        assert_eq!(epochs, vec![1, 2]);
        assert_eq!(snapshots[0].state, 0);
        assert_eq!(snapshots[0].channel_states[&pid("b")], vec![100]);
        assert_eq!(snapshots[1].state, 300);
        assert!(snapshots[1].channel_states[&pid("b")].is_empty());
        assert_eq!(a.state(), 300);
        assert!(!a.is_recording());
    }
}
