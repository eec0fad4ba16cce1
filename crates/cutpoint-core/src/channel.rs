//! Channel bookkeeping.
//!
//! A channel is a directed edge. The sending side only counts what it has
//! put on the wire since its last cut; the receiving side keeps the
//! recorded in-transit list plus the per-protocol closure state: a
//! marker-received flag (Chandy-Lamport) or the announced pre-cut count
//! (Lai-Yang).

/// Sending end of a directed channel.
#[derive(Debug, Clone, Default)]
pub struct OutboundChannel {
    sent: u64,
}

impl OutboundChannel {
    /// Application messages sent since the last cut.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub(crate) fn count_send(&mut self) {
        self.sent = self.sent.saturating_add(1);
    }

    /// Returns the send count up to now and restarts counting.
    pub(crate) fn take_sent(&mut self) -> u64 {
        std::mem::take(&mut self.sent)
    }
}

/// Receiving end of a directed channel.
#[derive(Debug, Clone, Default)]
pub struct InboundChannel {
    recorded: Vec<i64>,
    marker_received: bool,
    /// Pre-cut application messages received on this channel.
    pre_cut: u64,
    /// Post-cut application messages received while still recording.
    post_cut: u64,
    announced: Option<u64>,
}

impl InboundChannel {
    /// A channel created while its receiver is already recording. Nothing
    /// can be in transit on it for the current cut, so it starts closed.
    #[must_use]
    pub fn opened_after_cut() -> Self {
        Self {
            marker_received: true,
            announced: Some(0),
            ..Self::default()
        }
    }

    /// Values recorded as in transit for the current cut.
    #[must_use]
    pub fn recorded(&self) -> &[i64] {
        &self.recorded
    }

    /// Whether the Chandy-Lamport marker of the current epoch arrived.
    #[must_use]
    pub fn marker_received(&self) -> bool {
        self.marker_received
    }

    /// Pre-cut messages still expected on this channel, once the sender's
    /// count is known. Never negative.
    #[must_use]
    pub fn expected_inbound(&self) -> Option<u64> {
        self.announced.map(|a| a.saturating_sub(self.pre_cut))
    }

    /// Pre-cut application messages received so far.
    #[must_use]
    pub fn pre_cut_received(&self) -> u64 {
        self.pre_cut
    }

    /// Count announced by the sender's `Presnap`, if any.
    #[must_use]
    pub fn announced(&self) -> Option<u64> {
        self.announced
    }

    pub(crate) fn record(&mut self, value: i64) {
        self.recorded.push(value);
    }

    pub(crate) fn take_recorded(&mut self) -> Vec<i64> {
        std::mem::take(&mut self.recorded)
    }

    pub(crate) fn begin_marker_cut(&mut self) {
        self.recorded.clear();
        self.marker_received = false;
    }

    /// Sets the marker flag, returning `false` if it was already set.
    pub(crate) fn receive_marker(&mut self) -> bool {
        !std::mem::replace(&mut self.marker_received, true)
    }

    pub(crate) fn begin_counter_cut(&mut self) {
        self.recorded.clear();
    }

    pub(crate) fn count_pre_cut(&mut self) {
        self.pre_cut = self.pre_cut.saturating_add(1);
    }

    pub(crate) fn count_post_cut(&mut self) {
        self.post_cut = self.post_cut.saturating_add(1);
    }

    /// Sets or raises the announced count.
    pub(crate) fn announce(&mut self, count: u64) {
        self.announced = Some(self.announced.map_or(count, |a| a.max(count)));
    }

    /// Whether every announced pre-cut message has arrived.
    pub(crate) fn counter_closed(&self) -> bool {
        self.expected_inbound() == Some(0)
    }

    /// Starts the next epoch: post-cut traffic becomes pre-cut.
    pub(crate) fn rotate_counters(&mut self) {
        self.pre_cut = std::mem::take(&mut self.post_cut);
        self.announced = None;
    }
}
