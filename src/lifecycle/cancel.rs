// ============================================================================
// Cancel confirmation
// ============================================================================
//
// Used for maker cancels and for the expiry sweep. A rejected cancel usually
// means the wager was accepted first; in that case the ledger follows the
// chain's acceptance instead of simply reopening. Expiry cancels fail
// silently and back the sweep off.
//
// ============================================================================

use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn};

use crate::engine::Reconciler;
use crate::error::Result;
use crate::models::{CancelBroadcast, NotificationKind, WagerAction, WagerStatus};
use crate::recheck::Recheck;
use crate::rpc::{poll_for_tx, PollOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Ledger moved to `canceled`, stakes released
    Canceled,
    /// Ledger was already canceled
    AlreadyApplied,
    /// Rejected on-chain; wager reopened or its acceptance adopted
    Failed(String),
    /// Never confirmed; wager reopened
    Reverted,
    /// Chain already shows a terminal status
    Resolved,
    Pending,
    Busy,
    Stale,
}

impl Reconciler {
    /// Spawns the cancel confirmation task and returns immediately
    pub fn track_cancel(&self, broadcast: CancelBroadcast) -> JoinHandle<()> {
        let span = info_span!(
            "confirm_cancel",
            wager_id = broadcast.wager_id,
            tx_hash = %broadcast.tx_hash,
        );
        let this = self.clone();
        self.spawn_supervised("confirm_cancel", span, async move {
            match this.confirm_cancel(broadcast).await {
                Ok(outcome) => debug!(?outcome, "cancel task finished"),
                Err(e) => error!(error = %e, "cancel confirmation failed"),
            }
        })
    }

    pub async fn confirm_cancel(&self, broadcast: CancelBroadcast) -> Result<CancelOutcome> {
        let Some(_guard) = self.inner.locks.try_acquire_wager(broadcast.wager_id) else {
            self.inner.rechecks.schedule(
                Recheck::CancelUnconfirmed(broadcast),
                self.inner.config.cancel_recheck_delay,
            );
            return Ok(CancelOutcome::Busy);
        };
        self.confirm_cancel_locked(broadcast).await
    }

    /// Cancel confirmation for callers already holding the wager's lock
    pub(crate) async fn confirm_cancel_locked(&self, broadcast: CancelBroadcast) -> Result<CancelOutcome> {
        let config = &self.inner.config;
        let wager_id = broadcast.wager_id;

        match poll_for_tx(self.inner.chain.as_ref(), &broadcast.tx_hash, &config.poll).await? {
            PollOutcome::Included(tx) if tx.is_success() => {
                self.apply_cancel(wager_id, &broadcast.tx_hash).await
            }
            PollOutcome::Included(tx) => self.cancel_rejected(&broadcast, &tx.raw_log, false).await,
            PollOutcome::NotFound => {
                if self.sync_locked(wager_id).await?.is_resolved() {
                    return Ok(CancelOutcome::Resolved);
                }
                info!(
                    wager_id,
                    delay_secs = config.cancel_recheck_delay.as_secs(),
                    "⏳ cancel not included yet, re-check scheduled"
                );
                self.inner
                    .rechecks
                    .schedule(Recheck::CancelUnconfirmed(broadcast), config.cancel_recheck_delay);
                Ok(CancelOutcome::Pending)
            }
        }
    }

    pub(crate) async fn recheck_cancel(&self, broadcast: CancelBroadcast) -> Result<CancelOutcome> {
        let wager_id = broadcast.wager_id;
        let Some(_guard) = self.inner.locks.try_acquire_wager(wager_id) else {
            self.inner.rechecks.schedule(
                Recheck::CancelUnconfirmed(broadcast),
                self.inner.config.cancel_recheck_delay,
            );
            return Ok(CancelOutcome::Busy);
        };

        match self.inner.ledger.get_wager(wager_id).await? {
            Some(w) if w.status == WagerStatus::Canceling => {}
            _ => return Ok(CancelOutcome::Stale),
        }

        match self.lookup_tx_once(&broadcast.tx_hash).await {
            Some(tx) if tx.is_success() => self.apply_cancel(wager_id, &broadcast.tx_hash).await,
            Some(tx) => self.cancel_rejected(&broadcast, &tx.raw_log, false).await,
            None => {
                self.cancel_rejected(&broadcast, "cancel was not confirmed on-chain in time", true)
                    .await
            }
        }
    }

    async fn apply_cancel(&self, wager_id: u64, tx_hash: &str) -> Result<CancelOutcome> {
        let Some(wager) = self.inner.ledger.get_wager(wager_id).await? else {
            warn!(wager_id, "confirmed cancel for a wager the ledger does not know");
            return Ok(CancelOutcome::Stale);
        };
        match self.finalize_cancel(&wager, Some(tx_hash.to_string())).await? {
            Some(_) => Ok(CancelOutcome::Canceled),
            None => Ok(CancelOutcome::AlreadyApplied),
        }
    }

    /// Sync first; then either adopt a chain acceptance or reopen the wager
    async fn cancel_rejected(
        &self,
        broadcast: &CancelBroadcast,
        reason: &str,
        unconfirmed: bool,
    ) -> Result<CancelOutcome> {
        let wager_id = broadcast.wager_id;
        if self.sync_locked(wager_id).await?.is_resolved() {
            return Ok(CancelOutcome::Resolved);
        }
        let Some(wager) = self.inner.ledger.get_wager(wager_id).await? else {
            return Ok(CancelOutcome::Stale);
        };

        if let Ok(Some(bet)) = self.inner.chain.query_bet(wager_id).await {
            if self.adopt_chain_acceptance(&wager, &bet).await? {
                if !broadcast.expiry {
                    self.notify_kind(NotificationKind::Failed, WagerAction::Cancel, &wager, Some(reason))
                        .await;
                }
                return Ok(CancelOutcome::Failed(reason.to_string()));
            }
        }

        let Some(t) = self.inner.ledger.revert_wager(wager_id, WagerStatus::Canceling).await? else {
            return Ok(CancelOutcome::Stale);
        };
        if broadcast.expiry {
            warn!(wager_id, reason, "expired cancel did not land, wager reopened");
            self.defer_expiry(wager_id);
            return Ok(if unconfirmed {
                CancelOutcome::Reverted
            } else {
                CancelOutcome::Failed(reason.to_string())
            });
        }
        warn!(wager_id, reason, "❌ cancel failed, wager reopened");
        self.notify_kind(NotificationKind::Failed, WagerAction::Cancel, &t.wager, Some(reason))
            .await;
        if unconfirmed {
            self.notify_kind(NotificationKind::Reverted, WagerAction::Cancel, &t.wager, None)
                .await;
            return Ok(CancelOutcome::Reverted);
        }
        Ok(CancelOutcome::Failed(reason.to_string()))
    }
}
