//! Remaining-context bookkeeping.
//!
//! The estimate is decremented once per streamed chunk while a reply is being
//! generated and replaced wholesale by the engine's own estimate once the
//! generation completes. In between, readers see an approximation.
//!
//! Recomputes are ordered by ticket: a result is adopted only if no newer
//! ticket has been adopted and no reset happened since the ticket was taken.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::debug;

use edgechat_core::InferenceEngine;

/// Shared, cloneable tracker of the remaining-token estimate.
#[derive(Debug, Clone)]
pub struct TokenBudgetTracker {
    capacity: Arc<AtomicUsize>,
    /// Last recompute ticket handed out.
    issued: Arc<AtomicU64>,
    /// Tickets at or below this are stale.
    settled: Arc<AtomicU64>,
    tx: Arc<watch::Sender<usize>>,
}

impl TokenBudgetTracker {
    /// A tracker for a context window of `capacity` tokens, starting full.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = watch::channel(capacity);
        Self {
            capacity: Arc::new(AtomicUsize::new(capacity)),
            issued: Arc::new(AtomicU64::new(0)),
            settled: Arc::new(AtomicU64::new(0)),
            tx: Arc::new(tx),
        }
    }

    pub fn remaining(&self) -> usize {
        *self.tx.borrow()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Adopt a new context window size and start it full.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
        self.refill(capacity);
    }

    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.tx.subscribe()
    }

    /// Reduce the estimate by one token, never below zero.
    pub fn decrement(&self) {
        self.tx.send_modify(|remaining| *remaining = remaining.saturating_sub(1));
    }

    /// Replace the estimate outright.
    pub fn set(&self, remaining: usize) {
        self.tx.send_replace(remaining);
    }

    /// Restore the estimate to the full window, discarding pending recomputes.
    pub fn reset(&self) {
        self.refill(self.capacity());
    }

    fn refill(&self, capacity: usize) {
        self.tx.send_modify(|remaining| {
            self.settled
                .store(self.issued.load(Ordering::SeqCst), Ordering::SeqCst);
            *remaining = capacity;
        });
    }

    /// Reserve a place in recompute order.
    pub fn ticket(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Ask `engine` for an exact estimate against `context` and adopt it.
    ///
    /// Returns `None` when a newer recompute or a reset overtook this one.
    pub async fn recompute(
        &self,
        engine: &dyn InferenceEngine,
        context: &str,
    ) -> Result<Option<usize>> {
        let ticket = self.ticket();
        self.recompute_with(ticket, engine, context).await
    }

    /// Like [`recompute`](Self::recompute), with a ticket taken earlier.
    pub async fn recompute_with(
        &self,
        ticket: u64,
        engine: &dyn InferenceEngine,
        context: &str,
    ) -> Result<Option<usize>> {
        let remaining = engine.estimate_remaining(context).await?;
        let adopted = self.tx.send_if_modified(|current| {
            if ticket <= self.settled.load(Ordering::SeqCst) {
                return false;
            }
            self.settled.store(ticket, Ordering::SeqCst);
            *current = remaining;
            true
        });
        if adopted {
            debug!(remaining, ticket, "Recomputed token budget");
            Ok(Some(remaining))
        } else {
            debug!(ticket, "Discarding superseded budget recompute");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgechat_engine::providers::mock::MockEngine;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    #[test]
    fn test_decrement_floors_at_zero() {
        let tracker = TokenBudgetTracker::new(3);
        for _ in 0..10 {
            tracker.decrement();
        }
        assert_eq!(tracker.remaining(), 0);
    }

    #[test]
    fn test_decrement_from_start() {
        let tracker = TokenBudgetTracker::new(1024);
        tracker.decrement();
        tracker.decrement();
        assert_eq!(tracker.remaining(), 1022);
        tracker.reset();
        assert_eq!(tracker.remaining(), 1024);
    }

    #[test]
    fn test_set_capacity_refills() {
        let tracker = TokenBudgetTracker::new(1024);
        tracker.decrement();
        tracker.set_capacity(2048);
        assert_eq!(tracker.capacity(), 2048);
        assert_eq!(tracker.remaining(), 2048);
    }

    #[tokio::test]
    async fn test_recompute_overrides_decrements() {
        let tracker = TokenBudgetTracker::new(5);
        for _ in 0..5 {
            tracker.decrement();
        }
        assert_eq!(tracker.remaining(), 0);

        let engine = MockEngine::new().with_remaining(900);
        let value = tracker.recompute(&engine, "context").await.unwrap();
        assert_eq!(value, Some(900));
        assert_eq!(tracker.remaining(), 900);
    }

    #[tokio::test]
    async fn test_older_recompute_cannot_overwrite_newer() {
        let tracker = TokenBudgetTracker::new(1024);
        let gate = Arc::new(Notify::new());
        let slow = MockEngine::new()
            .with_remaining(500)
            .with_estimate_gate(Arc::clone(&gate));
        let fast = MockEngine::new().with_remaining(700);

        let first = tracker.ticket();
        let second = tracker.ticket();
        let pending = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.recompute_with(first, &slow, "older").await })
        };
        tokio::task::yield_now().await;

        assert_eq!(
            tracker.recompute_with(second, &fast, "newer").await.unwrap(),
            Some(700)
        );
        gate.notify_one();
        let stale = timeout(Duration::from_secs(5), pending).await.unwrap().unwrap();
        assert_eq!(stale.unwrap(), None);
        assert_eq!(tracker.remaining(), 700);
    }

    #[tokio::test]
    async fn test_reset_discards_pending_recompute() {
        let tracker = TokenBudgetTracker::new(1024);
        let engine = MockEngine::new().with_remaining(10);
        let ticket = tracker.ticket();
        tracker.decrement();
        tracker.reset();

        assert_eq!(tracker.recompute_with(ticket, &engine, "ctx").await.unwrap(), None);
        assert_eq!(tracker.remaining(), 1024);

        tracker.set_capacity(2048);
        assert_eq!(tracker.recompute(&engine, "ctx").await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let tracker = TokenBudgetTracker::new(10);
        let mut rx = tracker.subscribe();
        tracker.set(4);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 4);
    }
}
