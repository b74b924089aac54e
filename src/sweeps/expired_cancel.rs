//! Cancels open wagers nobody accepted within the contract's TTL.
//!
//! The maker never asked for these cancels, so a failed attempt reopens the
//! wager without a notification and holds it back from the next ticks with a
//! doubling delay.

use tracing::{debug, info, warn};

use super::{cutoff, SweepStats};
use crate::engine::Reconciler;
use crate::error::Result;
use crate::lifecycle::CancelOutcome;
use crate::models::{CancelBroadcast, Wager, WagerAction, WagerStatus};
use crate::ports::{RelayAction, RelayRequest};
use crate::reveal::is_already_resolved;

#[derive(Debug, PartialEq, Eq)]
enum ExpiryResult {
    Settled,
    Untouched,
    Busy,
}

impl Reconciler {
    pub(crate) async fn sweep_expired_cancels(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let ttl = self.inner.config.bet_ttl;
        if ttl.is_zero() {
            return stats;
        }

        let candidates = match self.inner.ledger.expired_candidates(cutoff(ttl)).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "expiry sweep: candidate query failed");
                stats.errors += 1;
                return stats;
            }
        };
        stats.candidates = candidates.len();

        for wager in candidates {
            match self.cancel_expired(&wager).await {
                Ok(ExpiryResult::Settled) => stats.processed += 1,
                Ok(ExpiryResult::Busy) => stats.busy += 1,
                Ok(ExpiryResult::Untouched) => {}
                Err(e) => {
                    warn!(wager = %wager.label(), error = %e, "expired cancel failed");
                    stats.errors += 1;
                }
            }
        }
        stats
    }

    async fn cancel_expired(&self, wager: &Wager) -> Result<ExpiryResult> {
        let Some(id) = wager.id else {
            return Ok(ExpiryResult::Untouched);
        };
        if self.inner.expiry_backoff.is_deferred(id) {
            debug!(wager_id = id, "expired cancel backing off");
            return Ok(ExpiryResult::Untouched);
        }
        let Some(_guard) = self.inner.locks.try_acquire_wager(id) else {
            return Ok(ExpiryResult::Busy);
        };

        if self.sync_locked(id).await?.is_resolved() {
            return Ok(ExpiryResult::Settled);
        }
        if let Some(bet) = self.inner.chain.query_bet(id).await? {
            if self.adopt_chain_acceptance(wager, &bet).await? {
                return Ok(ExpiryResult::Settled);
            }
        }
        if !self.inner.relay.is_ready().await {
            return Ok(ExpiryResult::Untouched);
        }

        if self
            .inner
            .ledger
            .mark_status(id, WagerStatus::Open, WagerStatus::Canceling)
            .await?
            .is_none()
        {
            return Ok(ExpiryResult::Untouched);
        }

        let submitted = self
            .inner
            .relay
            .submit(RelayRequest {
                sender: wager.maker_address.clone(),
                msg: RelayAction::CancelBet { bet_id: id },
            })
            .await;

        let resp = match submitted {
            Ok(resp) => resp,
            Err(e) => {
                warn!(wager_id = id, error = %e, "expired cancel relay failed, reopening");
                self.inner.ledger.revert_wager(id, WagerStatus::Canceling).await?;
                self.defer_expiry(id);
                return Ok(ExpiryResult::Untouched);
            }
        };

        match (resp.success, resp.tx_hash.clone()) {
            (true, Some(tx_hash)) => {
                info!(wager_id = id, tx_hash = %tx_hash, "⌛ expired wager cancel relayed");
                self.inner.ledger.record_tx_hash(id, WagerAction::Cancel, &tx_hash).await?;
                let outcome = self
                    .confirm_cancel_locked(CancelBroadcast { tx_hash, wager_id: id, expiry: true })
                    .await?;
                Ok(match outcome {
                    CancelOutcome::Canceled | CancelOutcome::AlreadyApplied | CancelOutcome::Resolved => {
                        self.inner.expiry_backoff.clear(id);
                        ExpiryResult::Settled
                    }
                    _ => ExpiryResult::Untouched,
                })
            }
            _ => {
                let text = resp.error_text().to_string();
                if is_already_resolved(&text) {
                    debug!(wager_id = id, log = %text, "cancel conflict, synchronizing");
                    if self.sync_locked(id).await?.is_resolved() {
                        return Ok(ExpiryResult::Settled);
                    }
                }
                // Never requested by the user: reopen without notifying
                warn!(wager_id = id, log = %text, "expired cancel rejected, reopening");
                self.inner.ledger.revert_wager(id, WagerStatus::Canceling).await?;
                self.defer_expiry(id);
                Ok(ExpiryResult::Untouched)
            }
        }
    }

    /// Holds an expired wager back from the sweep after a failed cancel
    pub(crate) fn defer_expiry(&self, wager_id: u64) {
        let delay = self
            .inner
            .expiry_backoff
            .defer(wager_id, self.inner.config.expiry_retry_backoff);
        info!(wager_id, retry_in_secs = delay.as_secs(), "expired cancel deferred");
    }
}
