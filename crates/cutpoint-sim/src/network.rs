//! In-memory channel model.
//!
//! Every directed pair `(from, to)` is a queue of envelopes tagged with a
//! global send sequence. [`DeliveryOrder::Fifo`] always delivers the oldest
//! deliverable envelope, which keeps every channel FIFO. [`DeliveryOrder::Shuffled`]
//! picks any deliverable envelope with a seeded RNG, so channels reorder but
//! runs stay reproducible.

use std::collections::{BTreeMap, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cutpoint_core::{Envelope, ProcessId};

/// How the network picks the next envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOrder {
    /// Global send order; per-channel FIFO.
    Fifo,
    /// Seeded random choice among all pending envelopes.
    Shuffled,
}

type ChannelKey = (ProcessId, ProcessId);

/// Reliable, exactly-once message transport between processes.
#[derive(Debug)]
pub struct Network {
    channels: BTreeMap<ChannelKey, VecDeque<(u64, Envelope)>>,
    next_seq: u64,
    order: DeliveryOrder,
    rng: StdRng,
}

impl Network {
    /// Creates an empty network.
    #[must_use]
    pub fn new(order: DeliveryOrder, seed: u64) -> Self {
        Self {
            channels: BTreeMap::new(),
            next_seq: 0,
            order,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Delivery order in use.
    #[must_use]
    pub fn order(&self) -> DeliveryOrder {
        self.order
    }

    /// Enqueues an envelope. Never blocks.
    pub fn send(&mut self, envelope: Envelope) {
        let key = (envelope.from.clone(), envelope.to.clone());
        let seq = self.next_seq;
        self.next_seq += 1;
        self.channels.entry(key).or_default().push_back((seq, envelope));
    }

    /// Total envelopes in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.channels.values().map(VecDeque::len).sum()
    }

    /// Envelopes in flight addressed to `to`.
    #[must_use]
    pub fn pending_to(&self, to: &ProcessId) -> usize {
        self.channels
            .iter()
            .filter(|((_, dst), _)| dst == to)
            .map(|(_, queue)| queue.len())
            .sum()
    }

    /// Removes and returns the next envelope whose receiver passes
    /// `deliverable`, or `None` if no such envelope is pending.
    pub fn next(&mut self, deliverable: impl Fn(&ProcessId) -> bool) -> Option<Envelope> {
        let key = match self.order {
            DeliveryOrder::Fifo => self
                .channels
                .iter()
                .filter(|((_, to), queue)| !queue.is_empty() && deliverable(to))
                .filter_map(|(key, queue)| queue.front().map(|(seq, _)| (*seq, key)))
                .min_by_key(|(seq, _)| *seq)
                .map(|(_, key)| (key.clone(), 0)),
            DeliveryOrder::Shuffled => {
                let candidates: Vec<(&ChannelKey, usize)> = self
                    .channels
                    .iter()
                    .filter(|((_, to), _)| deliverable(to))
                    .flat_map(|(key, queue)| (0..queue.len()).map(move |i| (key, i)))
                    .collect();
                if candidates.is_empty() {
                    None
                } else {
                    let (key, index) = candidates[self.rng.random_range(0..candidates.len())];
                    Some((key.clone(), index))
                }
            }
        };

        let (key, index) = key?;
        let queue = self.channels.get_mut(&key)?;
        let (_, envelope) = queue.remove(index)?;
        if queue.is_empty() {
            self.channels.remove(&key);
        }
        Some(envelope)
    }
}

#[cfg(test)]
mod tests {
    use cutpoint_core::{AppMessage, Message};

    use super::*;

    fn app(from: &str, to: &str, value: i64) -> Envelope {
        Envelope::new(
            ProcessId::from(from),
            ProcessId::from(to),
            Message::App(AppMessage::plain(value)),
        )
    }

    fn value_of(envelope: &Envelope) -> i64 {
        envelope.message.as_app().map_or(-1, |m| m.value)
    }

    #[test]
    fn test_fifo_delivers_in_send_order() {
        let mut network = Network::new(DeliveryOrder::Fifo, 0);
        network.send(app("a", "b", 1));
        network.send(app("c", "b", 2));
        network.send(app("a", "b", 3));

        let values: Vec<i64> = std::iter::from_fn(|| network.next(|_| true))
            .map(|e| value_of(&e))
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(network.pending(), 0);
    }

    #[test]
    fn test_undeliverable_receivers_stay_parked() {
        let mut network = Network::new(DeliveryOrder::Fifo, 0);
        network.send(app("a", "b", 1));
        network.send(app("a", "c", 2));

        let parked = ProcessId::from("b");
        let first = network.next(|to| to != &parked).unwrap();
        assert_eq!(value_of(&first), 2);
        assert!(network.next(|to| to != &parked).is_none());
        assert_eq!(network.pending_to(&parked), 1);
    }

    #[test]
    fn test_shuffled_is_reproducible_and_exactly_once() {
        let run = |seed| {
            let mut network = Network::new(DeliveryOrder::Shuffled, seed);
            for v in 0..20 {
                network.send(app("a", "b", v));
            }
            std::iter::from_fn(|| network.next(|_| true))
                .map(|e| value_of(&e))
                .collect::<Vec<_>>()
        };

        let first = run(7);
        assert_eq!(first, run(7));
        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }
}
