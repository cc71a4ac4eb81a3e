use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::net::SocketAddr;
use std::ops::Mul;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Per-flight retransmission budget.
///
/// Starts at the base timeout and doubles on every attempt until the
/// configured number of retries is used up.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    start_rto: Duration,
    retries: usize,
    rto: Duration,
    left: usize,
}

impl ExponentialBackoff {
    pub fn new(start_rto: Duration, retries: usize) -> Self {
        Self {
            start_rto,
            retries,
            rto: start_rto,
            left: retries,
        }
    }

    pub fn reset(&mut self) {
        self.rto = self.start_rto;
        self.left = self.retries;
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn attempt(&mut self) {
        let (n, overflow) = self.left.overflowing_sub(1);

        if overflow {
            return;
        }

        self.left = n;
        self.rto = self.rto.mul(2);
    }

    pub fn can_retry(&self) -> bool {
        self.left > 0
    }

    /// Number of retransmissions done so far.
    pub fn attempts(&self) -> usize {
        self.retries - self.left
    }
}

/// Token identifying one armed deadline.
///
/// A connection keeps the token of its current deadline. Cancelling a
/// deadline is just forgetting the token: a popped entry whose token no longer
/// matches the connection's is stale and ignored.
pub type TimerToken = u64;

/// Min-heap of retransmission deadlines shared by all connections.
///
/// One logical timer per pending flight, driven from a single
/// `handle_timeout` caller instead of one sleeping thread per connection.
#[derive(Debug, Default)]
pub struct RetransmitScheduler {
    inner: Mutex<SchedulerInner>,
}

#[derive(Debug, Default)]
struct SchedulerInner {
    heap: BinaryHeap<Reverse<(Instant, TimerToken, SocketAddr)>>,
    next_token: TimerToken,
}

impl RetransmitScheduler {
    pub fn new() -> Self {
        RetransmitScheduler::default()
    }

    /// Arm a deadline for `peer`, returning its token.
    pub fn schedule(&self, deadline: Instant, peer: SocketAddr) -> TimerToken {
        let mut inner = self.inner.lock();
        inner.next_token = inner.next_token.wrapping_add(1);
        let token = inner.next_token;
        inner.heap.push(Reverse((deadline, token, peer)));
        token
    }

    /// Pop every entry due at `now`.
    pub fn expired(&self, now: Instant) -> Vec<(TimerToken, SocketAddr)> {
        let mut inner = self.inner.lock();
        let mut out = Vec::new();
        while let Some(Reverse((deadline, token, peer))) = inner.heap.peek().copied() {
            if deadline > now {
                break;
            }
            inner.heap.pop();
            out.push((token, peer));
        }
        out
    }

    /// Earliest armed deadline, including ones that may since have been cancelled.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.lock().heap.peek().map(|Reverse((d, _, _))| *d)
    }

    /// Drop cancelled entries at the top of the heap.
    ///
    /// `is_live` tells whether a token is still the current one of its peer.
    pub fn prune(&self, mut is_live: impl FnMut(TimerToken, SocketAddr) -> bool) {
        let mut inner = self.inner.lock();
        while let Some(Reverse((_, token, peer))) = inner.heap.peek().copied() {
            if is_live(token, peer) {
                break;
            }
            inner.heap.pop();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }
}
