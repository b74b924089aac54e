// ============================================================================
// Sweeps
// ============================================================================
//
// Periodic repairs for whatever the point-in-time tasks missed. Every sweep:
//
//   1. asks the ledger (or chain) for candidates
//   2. takes each candidate's processing lock, skipping busy ones
//   3. synchronizes from chain first
//   4. only then performs its own action
//
// One candidate's error is counted and logged; the rest still run.
//
// ============================================================================

mod auto_reveal;
mod expired_cancel;
mod orphan_import;
mod stuck_recovery;
mod timeout_claim;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::Reconciler;
use crate::recheck::Recheck;

/// Per-sweep counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub candidates: usize,
    /// Candidates this sweep changed or settled
    pub processed: usize,
    /// Held by another task
    pub busy: usize,
    pub errors: usize,
}

impl SweepStats {
    pub fn is_quiet(&self) -> bool {
        self.processed == 0 && self.errors == 0
    }
}

/// Everything one scheduler tick did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub rechecks_run: usize,
    pub secrets_expired: usize,
    pub auto_reveal: SweepStats,
    pub timeout_claim: SweepStats,
    pub expired_cancel: SweepStats,
    pub orphan_import: SweepStats,
    pub stuck_recovery: SweepStats,
}

impl SweepReport {
    pub fn total_errors(&self) -> usize {
        self.auto_reveal.errors
            + self.timeout_claim.errors
            + self.expired_cancel.errors
            + self.orphan_import.errors
            + self.stuck_recovery.errors
    }

    pub fn is_quiet(&self) -> bool {
        self.rechecks_run == 0
            && self.secrets_expired == 0
            && self.auto_reveal.is_quiet()
            && self.timeout_claim.is_quiet()
            && self.expired_cancel.is_quiet()
            && self.orphan_import.is_quiet()
            && self.stuck_recovery.is_quiet()
    }
}

/// `now - age` as a ledger cutoff
pub(crate) fn cutoff(age: std::time::Duration) -> chrono::DateTime<Utc> {
    Utc::now() - ChronoDuration::from_std(age).unwrap_or_else(|_| ChronoDuration::zero())
}

impl Reconciler {
    /// One full pass: housekeeping, then every sweep in order
    pub async fn run_sweeps(&self) -> SweepReport {
        let mut report = SweepReport {
            secrets_expired: self.expire_pending_secrets(),
            rechecks_run: self.run_due_rechecks().await,
            ..SweepReport::default()
        };

        report.auto_reveal = self.sweep_auto_reveal().await;
        report.timeout_claim = self.sweep_timeout_claims().await;
        report.expired_cancel = self.sweep_expired_cancels().await;
        report.orphan_import = self.sweep_orphans().await;
        report.stuck_recovery = self.sweep_stuck().await;

        if report.is_quiet() {
            debug!("sweep tick: nothing to do");
        } else {
            info!(
                rechecks = report.rechecks_run,
                secrets_expired = report.secrets_expired,
                revealed = report.auto_reveal.processed,
                claimed = report.timeout_claim.processed,
                expired = report.expired_cancel.processed,
                imported = report.orphan_import.processed,
                recovered = report.stuck_recovery.processed,
                errors = report.total_errors(),
                "🧹 sweep tick complete"
            );
        }
        report
    }

    fn expire_pending_secrets(&self) -> usize {
        let older_than = cutoff(self.inner.config.pending_secret_ttl);
        match self.inner.secrets.cleanup_stale(older_than) {
            Ok(removed) => {
                if removed > 0 {
                    info!(removed, "expired stale pending secrets");
                }
                removed
            }
            Err(e) => {
                warn!(error = %e, "pending secret cleanup failed");
                0
            }
        }
    }

    async fn run_due_rechecks(&self) -> usize {
        let due = self.inner.rechecks.drain_due();
        let count = due.len();
        for recheck in due {
            let tx_hash = recheck.tx_hash().to_string();
            let result = match recheck {
                Recheck::CreateUnconfirmed(b) => self.recheck_create(b).await.map(|o| format!("{:?}", o)),
                Recheck::AcceptUnconfirmed(b) => self.recheck_accept(b).await.map(|o| format!("{:?}", o)),
                Recheck::CancelUnconfirmed(b) => self.recheck_cancel(b).await.map(|o| format!("{:?}", o)),
            };
            match result {
                Ok(outcome) => debug!(tx_hash = %tx_hash, outcome = %outcome, "re-check done"),
                Err(e) => warn!(tx_hash = %tx_hash, error = %e, "re-check failed"),
            }
        }
        count
    }
}
