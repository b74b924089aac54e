// ============================================================================
// Accept confirmation
// ============================================================================
//
// When the maker's secret is already known the reveal is broadcast while the
// accept is still being polled: the chain orders the two transactions, so
// the reveal lands right after the accept and a full confirmation round-trip
// is saved. If that early reveal was not accepted by the relay the normal
// auto-reveal runs once the accept is confirmed.
//
// ============================================================================

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn};

use crate::engine::Reconciler;
use crate::error::Result;
use crate::models::{AcceptBroadcast, NotificationKind, WagerAction, WagerStatus};
use crate::ports::{Acceptance, RelayResponse};
use crate::recheck::Recheck;
use crate::rpc::{poll_for_tx, ChainBetStatus, PollOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Ledger moved to `accepted`
    Accepted,
    /// Ledger was already past `accepting`
    AlreadyApplied,
    /// Rejected on-chain; reverted to `open`, acceptor released
    Failed(String),
    /// Never confirmed; reverted to `open`, acceptor released
    Reverted,
    /// Chain already shows a terminal status
    Resolved,
    /// Re-check scheduled
    Pending,
    /// Another task holds the wager; re-check scheduled
    Busy,
    /// Ledger no longer `accepting` at re-check time
    Stale,
}

impl Reconciler {
    /// Spawns the accept confirmation task and returns immediately
    pub fn track_accept(&self, broadcast: AcceptBroadcast) -> JoinHandle<()> {
        let span = info_span!(
            "confirm_accept",
            wager_id = broadcast.wager_id,
            tx_hash = %broadcast.tx_hash,
        );
        let this = self.clone();
        self.spawn_supervised("confirm_accept", span, async move {
            match this.confirm_accept(broadcast).await {
                Ok(outcome) => debug!(?outcome, "accept task finished"),
                Err(e) => error!(error = %e, "accept confirmation failed"),
            }
        })
    }

    pub async fn confirm_accept(&self, broadcast: AcceptBroadcast) -> Result<AcceptOutcome> {
        let config = &self.inner.config;
        let wager_id = broadcast.wager_id;

        let Some(guard) = self.inner.locks.try_acquire_wager(wager_id) else {
            debug!(wager_id, "wager busy, accept re-check scheduled");
            self.inner
                .rechecks
                .schedule(Recheck::AcceptUnconfirmed(broadcast), config.accept_recheck_delay);
            return Ok(AcceptOutcome::Busy);
        };

        let early = match self.inner.ledger.get_wager(wager_id).await? {
            Some(w) if config.parallel_reveal && w.has_secret() => Some(w),
            _ => None,
        };

        let poll = poll_for_tx(self.inner.chain.as_ref(), &broadcast.tx_hash, &config.poll);
        let (polled, early_reveal) = match &early {
            Some(wager) => {
                let (polled, reveal) = tokio::join!(poll, self.submit_reveal(wager));
                (polled, Some(reveal))
            }
            None => (poll.await, None),
        };

        match polled? {
            PollOutcome::Included(tx) if tx.is_success() => {
                let outcome = self.apply_accept(&broadcast).await?;
                drop(guard);

                match early_reveal {
                    Some(Ok(RelayResponse { success: true, tx_hash: Some(reveal_hash), .. })) => {
                        info!(wager_id, reveal_tx = %reveal_hash, "⚡ early reveal in flight");
                        self.follow_reveal(wager_id, &reveal_hash).await?;
                    }
                    Some(Ok(resp)) => {
                        debug!(wager_id, log = %resp.error_text(), "early reveal not taken, falling back");
                        self.auto_reveal(wager_id).await?;
                    }
                    Some(Err(e)) => {
                        debug!(wager_id, error = %e, "early reveal failed, falling back");
                        self.auto_reveal(wager_id).await?;
                    }
                    None => {
                        self.auto_reveal(wager_id).await?;
                    }
                }
                Ok(outcome)
            }
            PollOutcome::Included(tx) => {
                self.fail_accept(&broadcast, &tx.raw_log, false).await?;
                Ok(AcceptOutcome::Failed(tx.raw_log))
            }
            PollOutcome::NotFound => {
                if self.sync_locked(wager_id).await?.is_resolved() {
                    return Ok(AcceptOutcome::Resolved);
                }
                info!(
                    wager_id,
                    delay_secs = config.accept_recheck_delay.as_secs(),
                    "⏳ accept not included yet, re-check scheduled"
                );
                self.inner
                    .rechecks
                    .schedule(Recheck::AcceptUnconfirmed(broadcast), config.accept_recheck_delay);
                Ok(AcceptOutcome::Pending)
            }
        }
    }

    /// Runs after the safety window. A wager still `accepting` whose chain
    /// record shows no matching acceptance is reverted.
    pub(crate) async fn recheck_accept(&self, broadcast: AcceptBroadcast) -> Result<AcceptOutcome> {
        let wager_id = broadcast.wager_id;
        let Some(guard) = self.inner.locks.try_acquire_wager(wager_id) else {
            self.inner.rechecks.schedule(
                Recheck::AcceptUnconfirmed(broadcast),
                self.inner.config.accept_recheck_delay,
            );
            return Ok(AcceptOutcome::Busy);
        };

        match self.inner.ledger.get_wager(wager_id).await? {
            Some(w) if w.status == WagerStatus::Accepting => {}
            _ => return Ok(AcceptOutcome::Stale),
        }

        if let Some(tx) = self.lookup_tx_once(&broadcast.tx_hash).await {
            if !tx.is_success() {
                self.fail_accept(&broadcast, &tx.raw_log, false).await?;
                return Ok(AcceptOutcome::Failed(tx.raw_log));
            }
            let outcome = self.apply_accept(&broadcast).await?;
            drop(guard);
            self.auto_reveal(wager_id).await?;
            return Ok(outcome);
        }

        if self.sync_locked(wager_id).await?.is_resolved() {
            return Ok(AcceptOutcome::Resolved);
        }

        let bet = match self.inner.chain.query_bet(wager_id).await {
            Ok(bet) => bet,
            Err(e) => {
                warn!(wager_id, error = %e, "chain unreachable during accept re-check, leaving for stuck recovery");
                return Ok(AcceptOutcome::Pending);
            }
        };

        match bet {
            Some(bet)
                if bet.status == ChainBetStatus::Accepted
                    && bet.acceptor.as_deref() == Some(broadcast.acceptor_address.as_str()) =>
            {
                let outcome = self.apply_accept(&broadcast).await?;
                drop(guard);
                self.auto_reveal(wager_id).await?;
                Ok(outcome)
            }
            Some(bet) if bet.status == ChainBetStatus::Accepted => {
                self.fail_accept(&broadcast, "wager was accepted by another participant", true)
                    .await?;
                if let Some(reverted) = self.inner.ledger.get_wager(wager_id).await? {
                    self.adopt_chain_acceptance(&reverted, &bet).await?;
                }
                Ok(AcceptOutcome::Reverted)
            }
            _ => {
                self.fail_accept(&broadcast, "accept was not confirmed on-chain in time", true)
                    .await?;
                Ok(AcceptOutcome::Reverted)
            }
        }
    }

    async fn apply_accept(&self, broadcast: &AcceptBroadcast) -> Result<AcceptOutcome> {
        let acceptance = Acceptance {
            acceptor_id: broadcast.acceptor_id.clone(),
            acceptor_address: broadcast.acceptor_address.clone(),
            guess: broadcast.guess,
            tx_hash: Some(broadcast.tx_hash.clone()),
            accepted_at: Utc::now(),
        };

        match self.inner.ledger.accept_wager(broadcast.wager_id, acceptance).await? {
            Some(t) => {
                info!(wager_id = broadcast.wager_id, from = %t.before, "✅ accept confirmed");
                self.notify_kind(NotificationKind::Accepted, WagerAction::Accept, &t.wager, None)
                    .await;
                Ok(AcceptOutcome::Accepted)
            }
            None => Ok(AcceptOutcome::AlreadyApplied),
        }
    }

    /// `accepting` -> `open`, acceptor stake released, failure notified.
    /// Does nothing if the ledger already left `accepting`.
    async fn fail_accept(
        &self,
        broadcast: &AcceptBroadcast,
        reason: &str,
        announce_revert: bool,
    ) -> Result<bool> {
        let Some(t) = self
            .inner
            .ledger
            .revert_wager(broadcast.wager_id, WagerStatus::Accepting)
            .await?
        else {
            return Ok(false);
        };

        self.release_stake(&broadcast.acceptor_id, t.wager.amount, &t.wager).await;
        warn!(wager_id = broadcast.wager_id, reason, "❌ accept failed, wager reopened");

        self.notify_kind(NotificationKind::Failed, WagerAction::Accept, &t.wager, Some(reason))
            .await;
        if announce_revert {
            self.notify_kind(NotificationKind::Reverted, WagerAction::Accept, &t.wager, None)
                .await;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEnvironment;
    use crate::models::Side;
    use crate::rpc::TxResult;

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_accept_triggers_reveal() {
        let env = MockEnvironment::new();
        env.open_wager(20, "alice", 1_000);
        env.ledger.attach_secret(20, Side::Heads, &[9u8; 32]);
        let broadcast = env.begin_accept(20, "bob", Side::Tails, "HA1");
        env.chain.insert_tx("HA1", TxResult::success(vec![]));
        env.chain.accept_bet(20, "cosmos1bob", Side::Tails);

        let outcome = env.reconciler.confirm_accept(broadcast).await.unwrap();
        assert_eq!(outcome, AcceptOutcome::Accepted);

        // Reveal went through the relay and the synchronizer settled it
        let wager = env.ledger.wager(20).unwrap();
        assert_eq!(wager.status, WagerStatus::Revealed);
        assert_eq!(wager.winner_id.as_deref(), Some("alice"));
        assert_eq!(env.relay.requests().len(), 1);
        assert_eq!(env.notifier.count(NotificationKind::Accepted, WagerAction::Accept), 1);
        assert_eq!(env.notifier.count(NotificationKind::Revealed, WagerAction::Reveal), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_accept_reopens_wager() {
        let env = MockEnvironment::new();
        env.open_wager(21, "alice", 1_000);
        let broadcast = env.begin_accept(21, "bob", Side::Tails, "HA2");
        env.chain.insert_tx(
            "HA2",
            TxResult::failure(5, "Invalid state transition: cannot accept bet in Accepted state"),
        );

        let outcome = env.reconciler.confirm_accept(broadcast).await.unwrap();
        assert!(matches!(outcome, AcceptOutcome::Failed(_)));

        let wager = env.ledger.wager(21).unwrap();
        assert_eq!(wager.status, WagerStatus::Open);
        assert_eq!(wager.acceptor_id, None);
        assert_eq!(env.funds.locked("bob"), 0);
        assert_eq!(env.funds.locked("alice"), 1_000);
        assert_eq!(env.notifier.count(NotificationKind::Failed, WagerAction::Accept), 1);
        assert_eq!(env.notifier.count(NotificationKind::Reverted, WagerAction::Accept), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_wager_defers_to_recheck() {
        let env = MockEnvironment::new();
        env.open_wager(22, "alice", 1_000);
        let broadcast = env.begin_accept(22, "bob", Side::Tails, "HA3");
        let _held = env.reconciler.locks().try_acquire_wager(22).unwrap();

        let outcome = env.reconciler.confirm_accept(broadcast).await.unwrap();
        assert_eq!(outcome, AcceptOutcome::Busy);
        assert_eq!(env.reconciler.rechecks().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recheck_adopts_chain_acceptance() {
        let env = MockEnvironment::new();
        env.open_wager(23, "alice", 1_000);
        let broadcast = env.begin_accept(23, "bob", Side::Heads, "HA4");
        env.chain.accept_bet(23, "cosmos1bob", Side::Heads);

        let outcome = env.reconciler.recheck_accept(broadcast).await.unwrap();
        assert_eq!(outcome, AcceptOutcome::Accepted);
        assert_eq!(env.ledger.wager(23).unwrap().status, WagerStatus::Accepted);
        assert!(env.funds.unlock_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recheck_when_someone_else_accepted() {
        let env = MockEnvironment::new();
        env.open_wager(24, "alice", 1_000);
        env.seed_user("carol", "cosmos1carol");
        let broadcast = env.begin_accept(24, "bob", Side::Heads, "HA5");
        env.chain.accept_bet(24, "cosmos1carol", Side::Tails);

        let outcome = env.reconciler.recheck_accept(broadcast).await.unwrap();
        assert_eq!(outcome, AcceptOutcome::Reverted);

        let wager = env.ledger.wager(24).unwrap();
        assert_eq!(wager.status, WagerStatus::Accepted);
        assert_eq!(wager.acceptor_id.as_deref(), Some("carol"));
        assert_eq!(env.funds.locked("bob"), 0);
        assert_eq!(env.funds.locked("carol"), 1_000);
    }
}
