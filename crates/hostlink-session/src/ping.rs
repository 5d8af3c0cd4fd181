//! Ping/pong correlation.
//!
//! The protocol carries no request ids, so pongs are matched to pings purely
//! by order: the oldest outstanding ping takes the next pong.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{trace, warn};

struct PendingPing {
    sent_at: Instant,
    resolver: oneshot::Sender<Duration>,
}

/// FIFO of outstanding pings.
#[derive(Default)]
pub struct PongTracker {
    pending: RefCell<VecDeque<PendingPing>>,
}

impl PongTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a ping about to be sent and return the receiver for its round trip.
    pub fn begin(&self) -> oneshot::Receiver<Duration> {
        let (resolver, rx) = oneshot::channel();
        self.pending.borrow_mut().push_back(PendingPing {
            sent_at: Instant::now(),
            resolver,
        });
        rx
    }

    /// Drop the most recently recorded ping after its send failed.
    pub fn cancel_last(&self) {
        self.pending.borrow_mut().pop_back();
    }

    /// Resolve the oldest outstanding ping.
    ///
    /// Returns `false` if no ping was outstanding. A ping whose waiter has
    /// already given up still consumes the pong.
    pub fn on_pong(&self) -> bool {
        let Some(ping) = self.pending.borrow_mut().pop_front() else {
            warn!("received a pong with no ping outstanding");
            return false;
        };
        let elapsed = ping.sent_at.elapsed();
        trace!(?elapsed, "pong");
        if ping.resolver.send(elapsed).is_err() {
            trace!("pong arrived after its waiter left");
        }
        true
    }

    /// Forget every outstanding ping; their waiters see the session end.
    pub fn clear(&self) {
        self.pending.borrow_mut().clear();
    }

    /// Number of pings still waiting for a pong.
    pub fn outstanding(&self) -> usize {
        self.pending.borrow().len()
    }
}

impl std::fmt::Debug for PongTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PongTracker")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pongs_resolve_in_send_order() {
        let tracker = PongTracker::new();
        let mut first = tracker.begin();
        let mut second = tracker.begin();
        let mut third = tracker.begin();

        assert!(tracker.on_pong());
        assert!(first.try_recv().is_ok());
        assert!(second.try_recv().is_err());
        assert!(third.try_recv().is_err());

        assert!(tracker.on_pong());
        assert!(second.try_recv().is_ok());
        assert!(third.try_recv().is_err());

        assert!(tracker.on_pong());
        assert!(third.try_recv().is_ok());
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn stray_pong_is_reported() {
        let tracker = PongTracker::new();
        assert!(!tracker.on_pong());
    }

    #[test]
    fn abandoned_ping_still_consumes_its_pong() {
        let tracker = PongTracker::new();
        drop(tracker.begin());
        let mut live = tracker.begin();

        assert!(tracker.on_pong());
        assert!(live.try_recv().is_err());
        assert!(tracker.on_pong());
        assert!(live.try_recv().is_ok());
    }

    #[test]
    fn cancel_last_removes_newest() {
        let tracker = PongTracker::new();
        let mut kept = tracker.begin();
        let _dropped = tracker.begin();
        tracker.cancel_last();

        assert_eq!(tracker.outstanding(), 1);
        assert!(tracker.on_pong());
        assert!(kept.try_recv().is_ok());
    }
}
