//! Reliable delivery of control messages.
//!
//! Each tunnel keeps the messages the peer has not acknowledged yet and
//! resends them with exponential backoff (RFC 2661 5.8).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::sequence::seq_before;
use crate::core::constants::{INITIAL_RETRANSMIT_TIMEOUT, MAX_RETRANSMITS, MAX_RETRANSMIT_TIMEOUT};

/// Retransmission timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitPolicy {
    /// Timeout before the first retransmission.
    pub initial_timeout: Duration,
    /// Backoff ceiling.
    pub max_timeout: Duration,
    /// Retransmissions before giving up.
    pub max_retransmits: u32,
}

impl Default for RetransmitPolicy {
    fn default() -> Self {
        Self {
            initial_timeout: INITIAL_RETRANSMIT_TIMEOUT,
            max_timeout: MAX_RETRANSMIT_TIMEOUT,
            max_retransmits: MAX_RETRANSMITS,
        }
    }
}

/// What the queue wants done on a timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetransmitAction {
    /// Nothing is due.
    Idle,
    /// The pending messages must be sent again.
    Resend,
    /// Retries are exhausted; the tunnel is dead.
    GiveUp,
}

#[derive(Debug, Clone)]
struct Pending {
    ns: u16,
    datagram: Vec<u8>,
}

/// Unacknowledged control messages of one tunnel.
#[derive(Debug, Clone)]
pub struct RetransmitQueue {
    policy: RetransmitPolicy,
    pending: VecDeque<Pending>,
    retransmit_count: u32,
    current_timeout: Duration,
    deadline: Option<Instant>,
}

impl RetransmitQueue {
    /// Create an empty queue.
    pub fn new(policy: RetransmitPolicy) -> Self {
        Self {
            policy,
            pending: VecDeque::new(),
            retransmit_count: 0,
            current_timeout: policy.initial_timeout,
            deadline: None,
        }
    }

    /// Track a message that was just sent with sequence number `ns`.
    pub fn push(&mut self, ns: u16, datagram: Vec<u8>, now: Instant) {
        if self.pending.is_empty() {
            self.deadline = Some(now + self.current_timeout);
        }
        self.pending.push_back(Pending { ns, datagram });
    }

    /// Drop every message acknowledged by the peer's `nr`.
    ///
    /// Returns the number of messages released. Progress resets the backoff.
    pub fn on_ack(&mut self, nr: u16, now: Instant) -> usize {
        let before = self.pending.len();
        self.pending.retain(|pending| !seq_before(pending.ns, nr));
        let released = before - self.pending.len();

        if released > 0 {
            self.retransmit_count = 0;
            self.current_timeout = self.policy.initial_timeout;
            self.deadline = if self.pending.is_empty() {
                None
            } else {
                Some(now + self.current_timeout)
            };
        }
        released
    }

    /// Check whether a retransmission is due.
    pub fn poll(&mut self, now: Instant) -> RetransmitAction {
        let Some(deadline) = self.deadline else {
            return RetransmitAction::Idle;
        };
        if now < deadline {
            return RetransmitAction::Idle;
        }
        if self.retransmit_count >= self.policy.max_retransmits {
            return RetransmitAction::GiveUp;
        }

        self.retransmit_count += 1;
        self.current_timeout = (self.current_timeout * 2).min(self.policy.max_timeout);
        self.deadline = Some(now + self.current_timeout);
        RetransmitAction::Resend
    }

    /// Rewrite the Nr field of every pending message.
    ///
    /// Retransmissions must carry the current Nr, not the one at first send.
    pub fn refresh_nr(&mut self, nr: u16) {
        for pending in &mut self.pending {
            if pending.datagram.len() >= 12 {
                pending.datagram[10..12].copy_from_slice(&nr.to_be_bytes());
            }
        }
    }

    /// Pending datagrams, oldest first.
    pub fn datagrams(&self) -> impl Iterator<Item = &[u8]> {
        self.pending.iter().map(|pending| pending.datagram.as_slice())
    }

    /// Number of unacknowledged messages.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if everything has been acknowledged.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Retransmissions performed for the current head of the queue.
    pub fn retransmit_count(&self) -> u32 {
        self.retransmit_count
    }
}
