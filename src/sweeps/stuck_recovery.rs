//! Settles wagers stuck in `accepting` or `canceling` past every task's own
//! safety window. Chain state wins when it shows something; otherwise the
//! recorded transaction is looked up once, and unless it succeeded the wager
//! is reverted and any provisional stake released.

use tracing::{debug, info, warn};

use super::{cutoff, SweepStats};
use crate::engine::Reconciler;
use crate::error::Result;
use crate::models::{NotificationKind, Wager, WagerAction, WagerStatus};
use crate::rpc::ChainBetStatus;

#[derive(Debug, PartialEq, Eq)]
enum RecoveryResult {
    Recovered,
    Untouched,
    Busy,
}

impl Reconciler {
    pub(crate) async fn sweep_stuck(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let updated_before = cutoff(self.inner.config.stuck_grace);

        let candidates = match self.inner.ledger.stuck_candidates(updated_before).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "stuck sweep: candidate query failed");
                stats.errors += 1;
                return stats;
            }
        };
        stats.candidates = candidates.len();

        for wager in candidates {
            match self.recover_stuck(&wager).await {
                Ok(RecoveryResult::Recovered) => stats.processed += 1,
                Ok(RecoveryResult::Busy) => stats.busy += 1,
                Ok(RecoveryResult::Untouched) => {}
                Err(e) => {
                    warn!(wager = %wager.label(), error = %e, "stuck recovery failed");
                    stats.errors += 1;
                }
            }
        }
        stats
    }

    async fn recover_stuck(&self, candidate: &Wager) -> Result<RecoveryResult> {
        let Some(id) = candidate.id else {
            return Ok(RecoveryResult::Untouched);
        };
        let Some(_guard) = self.inner.locks.try_acquire_wager(id) else {
            return Ok(RecoveryResult::Busy);
        };

        if self.sync_locked(id).await?.is_resolved() {
            return Ok(RecoveryResult::Recovered);
        }
        // Re-read under the lock; a task may have settled it meanwhile
        let Some(wager) = self.inner.ledger.get_wager(id).await? else {
            return Ok(RecoveryResult::Untouched);
        };
        let (from, action, tx_hash) = match wager.status {
            WagerStatus::Accepting => (WagerStatus::Accepting, WagerAction::Accept, wager.accept_tx_hash.clone()),
            WagerStatus::Canceling => (WagerStatus::Canceling, WagerAction::Cancel, wager.cancel_tx_hash.clone()),
            _ => return Ok(RecoveryResult::Untouched),
        };

        // Chain unreachable: try again next tick rather than guess
        let bet = self.inner.chain.query_bet(id).await?;
        if let Some(bet) = &bet {
            let ours = wager.acceptor_address.is_none()
                || bet.acceptor.as_deref() == wager.acceptor_address.as_deref();
            if bet.status == ChainBetStatus::Accepted && ours {
                if self.adopt_chain_acceptance(&wager, bet).await? {
                    return Ok(RecoveryResult::Recovered);
                }
            }
        }

        let reason = match &tx_hash {
            Some(hash) => match self.lookup_tx_once(hash).await {
                // Included fine but the contract state has not caught up yet
                Some(tx) if tx.is_success() => {
                    debug!(wager_id = id, tx_hash = %hash, "stuck transaction succeeded, waiting for chain state");
                    return Ok(RecoveryResult::Untouched);
                }
                Some(tx) => format!("rejected on-chain: {}", tx.raw_log),
                None => "transaction never confirmed".to_string(),
            },
            None => "transaction never confirmed".to_string(),
        };

        let Some(t) = self.inner.ledger.revert_wager(id, from).await? else {
            return Ok(RecoveryResult::Untouched);
        };
        if from == WagerStatus::Accepting {
            if let Some(acceptor_id) = &wager.acceptor_id {
                self.release_stake(acceptor_id, wager.amount, &t.wager).await;
            }
        }
        info!(wager_id = id, from = %from, reason = %reason, "🔧 stuck wager reverted");
        self.notify_kind(NotificationKind::Reverted, action, &t.wager, Some(&reason))
            .await;

        // Someone else's acceptance landed while ours was stuck
        if let Some(bet) = &bet {
            if bet.status == ChainBetStatus::Accepted {
                self.adopt_chain_acceptance(&t.wager, bet).await?;
            }
        }
        Ok(RecoveryResult::Recovered)
    }
}
