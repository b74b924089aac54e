//! Delayed re-checks for transactions that were neither confirmed nor
//! rejected within the poll deadline.
//!
//! One queue drained by the sweep tick replaces per-task timers.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::models::{AcceptBroadcast, CancelBroadcast, CreateBroadcast};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recheck {
    CreateUnconfirmed(CreateBroadcast),
    AcceptUnconfirmed(AcceptBroadcast),
    CancelUnconfirmed(CancelBroadcast),
}

impl Recheck {
    pub fn tx_hash(&self) -> &str {
        match self {
            Recheck::CreateUnconfirmed(b) => &b.tx_hash,
            Recheck::AcceptUnconfirmed(b) => &b.tx_hash,
            Recheck::CancelUnconfirmed(b) => &b.tx_hash,
        }
    }
}

#[derive(Debug)]
struct Entry {
    due: Instant,
    recheck: Recheck,
}

#[derive(Debug, Default)]
pub struct RecheckQueue {
    entries: Mutex<Vec<Entry>>,
}

impl RecheckQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `recheck` to run no earlier than `delay` from now.
    /// A second schedule for the same tx replaces the first.
    pub fn schedule(&self, recheck: Recheck, delay: Duration) {
        let due = Instant::now() + delay;
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.retain(|e| e.recheck.tx_hash() != recheck.tx_hash());
        entries.push(Entry { due, recheck });
    }

    /// Removes and returns every re-check that is due, oldest first
    pub fn drain_due(&self) -> Vec<Recheck> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let (mut due, pending): (Vec<Entry>, Vec<Entry>) =
            entries.drain(..).partition(|e| e.due <= now);
        *entries = pending;
        due.sort_by_key(|e| e.due);
        due.into_iter().map(|e| e.recheck).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cap on how often the retry delay doubles (16x the base)
const MAX_BACKOFF_DOUBLINGS: u32 = 4;

/// Per-wager retry gate for sweep actions that failed. Each recorded failure
/// doubles the wait before the sweep may try that wager again.
#[derive(Debug, Default)]
pub struct RetryBackoff {
    entries: Mutex<HashMap<u64, (u32, Instant)>>,
}

impl RetryBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure for `id` and returns how long it is now held back
    pub fn defer(&self, id: u64, base: Duration) -> Duration {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let failures = entries.get(&id).map_or(0, |(n, _)| *n) + 1;
        let delay = base.saturating_mul(1 << (failures - 1).min(MAX_BACKOFF_DOUBLINGS));
        entries.insert(id, (failures, Instant::now() + delay));
        delay
    }

    pub fn is_deferred(&self, id: u64) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.get(&id).map_or(false, |(_, until)| Instant::now() < *until)
    }

    pub fn clear(&self, id: u64) {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    fn accept(tx: &str) -> Recheck {
        Recheck::AcceptUnconfirmed(AcceptBroadcast {
            tx_hash: tx.into(),
            wager_id: 1,
            acceptor_id: "bob".into(),
            acceptor_address: "cosmos1bob".into(),
            guess: Side::Tails,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_only_due_entries() {
        let queue = RecheckQueue::new();
        queue.schedule(accept("A"), Duration::from_secs(45));
        queue.schedule(accept("B"), Duration::from_secs(10));

        assert!(queue.drain_due().is_empty());

        tokio::time::advance(Duration::from_secs(10)).await;
        let due = queue.drain_due();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].tx_hash(), "B");
        assert_eq!(queue.len(), 1);

        tokio::time::advance(Duration::from_secs(35)).await;
        assert_eq!(queue.drain_due().len(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces() {
        let queue = RecheckQueue::new();
        queue.schedule(accept("A"), Duration::from_secs(5));
        queue.schedule(accept("A"), Duration::from_secs(50));
        assert_eq!(queue.len(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(queue.drain_due().is_empty());
        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(queue.drain_due().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_and_caps() {
        let backoff = RetryBackoff::new();
        let base = Duration::from_secs(10);
        assert!(!backoff.is_deferred(3));

        assert_eq!(backoff.defer(3, base), Duration::from_secs(10));
        assert!(backoff.is_deferred(3));
        assert!(!backoff.is_deferred(4));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!backoff.is_deferred(3));
        assert_eq!(backoff.defer(3, base), Duration::from_secs(20));
        for _ in 0..6 {
            backoff.defer(3, base);
        }
        assert_eq!(backoff.defer(3, base), Duration::from_secs(160));

        backoff.clear(3);
        assert!(!backoff.is_deferred(3));
        assert_eq!(backoff.defer(3, base), Duration::from_secs(10));
    }
}
