// ============================================================================
// Chain State Synchronizer
// ============================================================================
//
// Pulls the contract's record for one wager and, when the chain shows a
// terminal status the ledger does not, applies it exactly once:
//
//   canceled                  -> cancel_wager, release pre-terminal stakes
//   revealed/timeoutclaimed   -> resolve_wager (payout is the ledger's job)
//
// Every lifecycle task and sweep calls this first as the cheapest way to learn
// that there is nothing left to do. A ledger wager already in a terminal
// status short-circuits before any chain query, so repeated calls never
// unlock or notify twice.
//
// ============================================================================

use chrono::{TimeZone, Utc};
use tracing::{debug, info, warn};

use crate::engine::Reconciler;
use crate::error::Result;
use crate::models::{NotificationKind, Wager, WagerAction, WagerStatus};
use crate::ports::{Acceptance, Resolution, Transition};
use crate::rpc::{ChainBet, ChainBetStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// This call moved the ledger to a terminal status
    Applied(WagerStatus),
    /// Ledger already terminal
    AlreadySynced(WagerStatus),
    /// Chain not terminal; `None` when the contract has no such wager
    NotResolved(Option<ChainBetStatus>),
    /// Chain is terminal but the ledger cannot follow yet (unmapped winner)
    Deferred(String),
    /// Another task holds the wager
    Busy,
    /// Ledger has no wager with this id
    Untracked,
}

impl SyncOutcome {
    /// Ledger now reflects a terminal chain status
    pub fn is_resolved(&self) -> bool {
        matches!(self, SyncOutcome::Applied(_) | SyncOutcome::AlreadySynced(_))
    }
}

impl Reconciler {
    /// Synchronizes one wager, skipping it if another task holds its lock
    pub async fn sync_wager(&self, wager_id: u64) -> Result<SyncOutcome> {
        let Some(_guard) = self.inner.locks.try_acquire_wager(wager_id) else {
            debug!(wager_id, "sync skipped, wager busy");
            return Ok(SyncOutcome::Busy);
        };
        self.sync_locked(wager_id).await
    }

    /// Same as `sync_wager` for callers that already hold the wager's lock
    pub async fn sync_locked(&self, wager_id: u64) -> Result<SyncOutcome> {
        let Some(wager) = self.inner.ledger.get_wager(wager_id).await? else {
            return Ok(SyncOutcome::Untracked);
        };
        if wager.status.is_terminal() {
            return Ok(SyncOutcome::AlreadySynced(wager.status));
        }

        let Some(bet) = self.inner.chain.query_bet(wager_id).await? else {
            debug!(wager_id, "no chain record");
            return Ok(SyncOutcome::NotResolved(None));
        };

        match bet.status {
            ChainBetStatus::Canceled => {
                let outcome = match self.finalize_cancel(&wager, None).await? {
                    Some(t) => SyncOutcome::Applied(t.after()),
                    None => SyncOutcome::AlreadySynced(WagerStatus::Canceled),
                };
                Ok(outcome)
            }
            ChainBetStatus::Revealed | ChainBetStatus::TimeoutClaimed => {
                self.apply_resolution(&wager, &bet).await
            }
            other => Ok(SyncOutcome::NotResolved(Some(other))),
        }
    }

    async fn apply_resolution(&self, wager: &Wager, bet: &ChainBet) -> Result<SyncOutcome> {
        let (status, action) = match bet.status {
            ChainBetStatus::TimeoutClaimed => (WagerStatus::TimeoutClaimed, WagerAction::ClaimTimeout),
            _ => (WagerStatus::Revealed, WagerAction::Reveal),
        };

        // A timeout claim always pays the acceptor
        let winner_address = match (&bet.winner, status) {
            (Some(addr), _) => Some(addr.clone()),
            (None, WagerStatus::TimeoutClaimed) => bet.acceptor.clone(),
            (None, _) => None,
        };
        let Some(winner_address) = winner_address else {
            warn!(wager_id = bet.id, status = %status, "chain resolution has no winner yet");
            return Ok(SyncOutcome::Deferred("winner missing on chain".to_string()));
        };

        let Some(winner_id) = self.inner.ledger.user_for_address(&winner_address).await? else {
            warn!(wager_id = bet.id, winner = %winner_address, "winner address has no ledger identity, deferring");
            return Ok(SyncOutcome::Deferred(format!("no identity for {}", winner_address)));
        };

        let resolution = Resolution {
            status,
            winner_id,
            payout_amount: bet.payout_amount,
            commission_paid: bet.commission_paid,
            reveal_side: bet.reveal_side,
        };

        match self.inner.ledger.resolve_wager(bet.id, resolution).await? {
            Some(t) => {
                info!(
                    wager_id = bet.id,
                    from = %t.before,
                    to = %t.after(),
                    winner = ?t.wager.winner_id,
                    "✅ wager resolved from chain"
                );
                self.notify_kind(NotificationKind::Revealed, action, &t.wager, None).await;
                Ok(SyncOutcome::Applied(t.after()))
            }
            None => {
                debug!(wager_id = bet.id, previous = %wager.status, "resolution already applied");
                Ok(SyncOutcome::AlreadySynced(status))
            }
        }
    }

    /// Moves a wager to `canceled` and releases every stake it held.
    /// Returns the transition, or `None` if another path already canceled it.
    pub(crate) async fn finalize_cancel(
        &self,
        wager: &Wager,
        tx_hash: Option<String>,
    ) -> Result<Option<Transition>> {
        let Some(id) = wager.id else {
            return Ok(None);
        };
        let Some(t) = self.inner.ledger.cancel_wager(id, tx_hash).await? else {
            return Ok(None);
        };

        self.inner.expiry_backoff.clear(id);
        let w = &t.wager;
        self.release_stake(&w.maker_id, w.amount, w).await;
        if matches!(t.before, WagerStatus::Accepting | WagerStatus::Accepted) {
            if let Some(acceptor_id) = &w.acceptor_id {
                self.release_stake(acceptor_id, w.amount, w).await;
            }
        }

        info!(wager_id = id, from = %t.before, "✅ wager canceled, stakes released");
        self.notify_kind(NotificationKind::Canceled, WagerAction::Cancel, w, None).await;
        Ok(Some(t))
    }

    /// Mirrors an acceptance the chain has but the ledger missed.
    ///
    /// Returns `false` when the chain is not `accepted` or the acceptor address
    /// has no ledger identity. The acceptor's stake is locked here unless the
    /// ledger already held it provisionally (`accepting`).
    pub(crate) async fn adopt_chain_acceptance(&self, wager: &Wager, bet: &ChainBet) -> Result<bool> {
        if bet.status != ChainBetStatus::Accepted {
            return Ok(false);
        }
        let Some(acceptor_address) = bet.acceptor.clone() else {
            return Ok(false);
        };

        let acceptor_id = if wager.acceptor_address.as_deref() == Some(acceptor_address.as_str()) {
            wager.acceptor_id.clone()
        } else {
            self.inner.ledger.user_for_address(&acceptor_address).await?
        };
        let Some(acceptor_id) = acceptor_id else {
            warn!(wager_id = bet.id, acceptor = %acceptor_address, "chain acceptor has no ledger identity");
            return Ok(false);
        };
        let Some(guess) = bet.acceptor_guess.or(wager.acceptor_guess) else {
            return Ok(false);
        };

        let accepted_at = bet
            .accepted_at_time
            .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single())
            .unwrap_or_else(Utc::now);

        let acceptance = Acceptance {
            acceptor_id: acceptor_id.clone(),
            acceptor_address,
            guess,
            tx_hash: None,
            accepted_at,
        };

        let Some(t) = self.inner.ledger.accept_wager(bet.id, acceptance).await? else {
            return Ok(false);
        };

        if t.before != WagerStatus::Accepting {
            if let Err(e) = self.inner.funds.lock(&acceptor_id, t.wager.amount).await {
                warn!(wager_id = bet.id, acceptor_id = %acceptor_id, error = %e, "failed to lock adopted acceptor stake");
            }
        }

        info!(wager_id = bet.id, from = %t.before, acceptor_id = %acceptor_id, "✅ adopted acceptance from chain");
        self.notify_kind(NotificationKind::Accepted, WagerAction::Accept, &t.wager, None).await;
        Ok(true)
    }
}
