// ============================================================================
// Sweep Scheduler
// ============================================================================
//
// One periodic driver for every sweep. A single running flag serializes
// ticks: a tick that comes due while the previous one is still executing is
// skipped outright, never queued and never run alongside it.
//
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, info_span};

use crate::engine::Reconciler;
use crate::sweeps::SweepReport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Ran(SweepReport),
    /// Previous tick still running
    Skipped,
}

/// Clears the running flag on drop, including when the tick panics
struct RunningFlag(Arc<AtomicBool>);

impl RunningFlag {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningFlag(flag.clone()))
    }
}

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct SweepScheduler {
    reconciler: Reconciler,
    running: Arc<AtomicBool>,
    interval: Duration,
}

impl SweepScheduler {
    pub fn new(reconciler: Reconciler) -> Self {
        let interval = reconciler.config().sweep_interval;
        Self { reconciler, running: Arc::new(AtomicBool::new(false)), interval }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs every sweep once, unless a tick is already in progress
    pub async fn tick(&self) -> TickOutcome {
        let Some(_flag) = RunningFlag::acquire(&self.running) else {
            debug!("previous sweep tick still running, skipping");
            return TickOutcome::Skipped;
        };
        TickOutcome::Ran(self.reconciler.run_sweeps().await)
    }

    /// Drives ticks until `shutdown` flips to `true`, then waits for every
    /// spawned tick to finish
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs_f64(), "🧹 sweep scheduler started");
        let mut spawned: Vec<JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    spawned.retain(|h| !h.is_finished());
                    let this = self.clone();
                    spawned.push(self.reconciler.spawn_supervised("sweep_tick", info_span!("sweep_tick"), async move {
                        if this.tick().await == TickOutcome::Skipped {
                            debug!("tick skipped");
                        }
                    }));
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        for handle in spawned {
            // The supervisor already logged any panic
            let _ = handle.await;
        }
        info!("sweep scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEnvironment;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_running_flag_clears_on_drop() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = RunningFlag::acquire(&flag).unwrap();
        assert!(RunningFlag::acquire(&flag).is_none());
        drop(guard);
        assert!(RunningFlag::acquire(&flag).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_tick_runs() {
        let env = MockEnvironment::new();
        let scheduler = SweepScheduler::new(env.reconciler.clone());
        match scheduler.tick().await {
            TickOutcome::Ran(report) => assert!(report.is_quiet()),
            TickOutcome::Skipped => panic!("nothing else was running"),
        }
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_spawned_tick() {
        let env = MockEnvironment::new();
        env.chain.hold_open_bets();
        let scheduler = SweepScheduler::new(env.reconciler.clone());
        let (tx, rx) = watch::channel(false);

        let mut run = tokio_test::task::spawn(scheduler.clone().run(rx));
        tokio_test::assert_pending!(run.poll());
        // First tick fires at once and parks inside the orphan sweep
        while env.chain.open_bets_calls() == 0 {
            tokio::task::yield_now().await;
        }

        tx.send(true).unwrap();
        tokio_test::assert_pending!(run.poll());
        assert!(scheduler.is_running());

        env.chain.release_open_bets();
        while run.poll().is_pending() {
            tokio::task::yield_now().await;
        }
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let env = MockEnvironment::new();
        let scheduler = SweepScheduler::new(env.reconciler.clone());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(scheduler.run(rx));
        sleep(Duration::from_secs(3)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
