// ============================================================================
// Create confirmation
// ============================================================================
//
// The chain assigns the wager id only once the create is included, so until
// then the wager is known by commitment alone. Id resolution:
//
//   1. `bet_id` attribute on the create event
//   2. otherwise scan open bets for the commitment, retried with growing delay
//
// If both fail the transaction was still broadcast and most likely landed:
// the maker's stake stays locked and the `creating` record is left for the
// orphan-import sweep, which matches it by commitment.
//
// ============================================================================

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, info_span, warn};

use super::short;
use crate::engine::Reconciler;
use crate::error::Result;
use crate::models::{CreateBroadcast, NotificationKind, WagerAction, WagerNotification};
use crate::ports::{ConfirmedCreation, CreationOutcome};
use crate::processing_lock::LockKey;
use crate::recheck::Recheck;
use crate::rpc::{all_open_bets, poll_for_tx, PollOutcome, TxResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Ledger gained the wager as `open`
    Confirmed(u64),
    /// The ledger already had this id
    AlreadyKnown(u64),
    /// Rejected on-chain; stake released
    Failed(String),
    /// Included but the id could not be found; left for the orphan sweep
    Unresolved,
    /// Not found before the deadline; re-check scheduled
    Pending,
    /// Another task holds this commitment
    Busy,
}

impl Reconciler {
    /// Spawns the create confirmation task and returns immediately
    pub fn track_create(&self, broadcast: CreateBroadcast) -> JoinHandle<()> {
        let span = info_span!(
            "confirm_create",
            tx_hash = %broadcast.tx_hash,
            commitment = %short(&broadcast.commitment),
        );
        let this = self.clone();
        self.spawn_supervised("confirm_create", span, async move {
            match this.confirm_create(broadcast).await {
                Ok(outcome) => debug!(?outcome, "create task finished"),
                Err(e) => error!(error = %e, "create confirmation failed"),
            }
        })
    }

    pub async fn confirm_create(&self, broadcast: CreateBroadcast) -> Result<CreateOutcome> {
        let key = LockKey::Commitment(broadcast.commitment.clone());
        let Some(_guard) = self.inner.locks.try_acquire(key) else {
            debug!("commitment busy, create left to its current owner");
            return Ok(CreateOutcome::Busy);
        };

        let config = &self.inner.config;
        match poll_for_tx(self.inner.chain.as_ref(), &broadcast.tx_hash, &config.poll).await? {
            PollOutcome::Included(tx) => self.settle_create(&broadcast, tx).await,
            PollOutcome::NotFound => {
                info!(
                    tx_hash = %broadcast.tx_hash,
                    delay_secs = config.create_recheck_delay.as_secs(),
                    "⏳ create not included yet, re-check scheduled"
                );
                self.inner.rechecks.schedule(
                    Recheck::CreateUnconfirmed(broadcast),
                    config.create_recheck_delay,
                );
                Ok(CreateOutcome::Pending)
            }
        }
    }

    /// One more lookup after the safety window. Still missing means the
    /// broadcast is no longer in flight; the record waits for orphan import.
    pub(crate) async fn recheck_create(&self, broadcast: CreateBroadcast) -> Result<CreateOutcome> {
        let key = LockKey::Commitment(broadcast.commitment.clone());
        let Some(_guard) = self.inner.locks.try_acquire(key) else {
            self.inner.rechecks.schedule(
                Recheck::CreateUnconfirmed(broadcast),
                self.inner.config.create_recheck_delay,
            );
            return Ok(CreateOutcome::Busy);
        };

        match self.lookup_tx_once(&broadcast.tx_hash).await {
            Some(tx) => self.settle_create(&broadcast, tx).await,
            None => {
                warn!(
                    tx_hash = %broadcast.tx_hash,
                    commitment = %short(&broadcast.commitment),
                    "create never observed on-chain, stake kept locked for orphan import"
                );
                self.end_inflight_create(&broadcast.maker_id).await;
                Ok(CreateOutcome::Unresolved)
            }
        }
    }

    async fn settle_create(&self, broadcast: &CreateBroadcast, tx: TxResult) -> Result<CreateOutcome> {
        if !tx.is_success() {
            return self.fail_create(broadcast, &tx.raw_log).await;
        }

        let wager_id = match tx.bet_id() {
            Some(id) => Some(id),
            None => self.resolve_id_by_commitment(&broadcast.commitment).await,
        };
        let Some(wager_id) = wager_id else {
            warn!(
                tx_hash = %broadcast.tx_hash,
                commitment = %short(&broadcast.commitment),
                "⚠️ create included but chain id unresolved, leaving stake locked"
            );
            self.end_inflight_create(&broadcast.maker_id).await;
            return Ok(CreateOutcome::Unresolved);
        };

        let secret = self.verified_pending_secret(&broadcast.commitment, &broadcast.maker_address);
        let attached = secret.is_some();

        let outcome = self
            .inner
            .ledger
            .confirm_creation(ConfirmedCreation {
                id: wager_id,
                commitment: broadcast.commitment.clone(),
                maker_id: broadcast.maker_id.clone(),
                maker_address: broadcast.maker_address.clone(),
                amount: broadcast.amount,
                create_tx_hash: Some(broadcast.tx_hash.clone()),
                secret,
                created_at: None,
            })
            .await?;

        if attached {
            self.discard_pending_secret(&broadcast.commitment);
        }

        match outcome {
            CreationOutcome::Confirmed(wager) => {
                self.end_inflight_create(&broadcast.maker_id).await;
                info!(wager_id, auto_reveal = attached, "✅ create confirmed");
                self.notify(
                    WagerNotification::new(NotificationKind::Confirmed, WagerAction::Create, &wager)
                        .with_tx_hash(broadcast.tx_hash.clone()),
                )
                .await;
                Ok(CreateOutcome::Confirmed(wager_id))
            }
            CreationOutcome::AlreadyKnown(_) => {
                debug!(wager_id, "create already reflected in ledger");
                Ok(CreateOutcome::AlreadyKnown(wager_id))
            }
        }
    }

    async fn fail_create(&self, broadcast: &CreateBroadcast, reason: &str) -> Result<CreateOutcome> {
        let Some(t) = self.inner.ledger.abandon_creation(&broadcast.commitment).await? else {
            debug!("create failure already handled");
            return Ok(CreateOutcome::Failed(reason.to_string()));
        };

        self.release_stake(&broadcast.maker_id, broadcast.amount, &t.wager).await;
        self.end_inflight_create(&broadcast.maker_id).await;
        self.discard_pending_secret(&broadcast.commitment);

        warn!(tx_hash = %broadcast.tx_hash, reason, "❌ create rejected on-chain, stake released");
        self.notify(
            WagerNotification::new(NotificationKind::Failed, WagerAction::Create, &t.wager)
                .with_reason(reason)
                .with_tx_hash(broadcast.tx_hash.clone()),
        )
        .await;
        Ok(CreateOutcome::Failed(reason.to_string()))
    }

    /// Scans open bets for the commitment, backing off between attempts
    async fn resolve_id_by_commitment(&self, commitment: &str) -> Option<u64> {
        let attempts = self.inner.config.chain_id_resolve_attempts;
        let base_delay = self.inner.config.chain_id_resolve_base_delay;

        for attempt in 1..=attempts {
            match all_open_bets(self.inner.chain.as_ref()).await {
                Ok(bets) => {
                    if let Some(bet) = bets.iter().find(|b| b.commitment.eq_ignore_ascii_case(commitment)) {
                        debug!(attempt, wager_id = bet.id, "chain id resolved by commitment");
                        return Some(bet.id);
                    }
                }
                Err(e) => debug!(attempt, error = %e, "open bets query failed"),
            }
            if attempt < attempts {
                sleep(base_delay * attempt).await;
            }
        }
        None
    }

    /// Pending secret for `commitment`, only if it really opens the commitment
    pub(crate) fn verified_pending_secret(
        &self,
        commitment: &str,
        maker_address: &str,
    ) -> Option<(crate::models::Side, String)> {
        match self.inner.secrets.get(commitment) {
            Ok(Some(pending)) if pending.matches(maker_address, commitment) => {
                Some((pending.side, pending.secret))
            }
            Ok(Some(_)) => {
                warn!(commitment = %short(commitment), "pending secret does not match commitment, not attached");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(commitment = %short(commitment), error = %e, "pending secret lookup failed");
                None
            }
        }
    }

    pub(crate) fn discard_pending_secret(&self, commitment: &str) {
        if let Err(e) = self.inner.secrets.delete(commitment) {
            warn!(commitment = %short(commitment), error = %e, "failed to delete pending secret");
        }
    }

    /// Single bounded `get_tx`; any failure reads as "not found"
    pub(crate) async fn lookup_tx_once(&self, tx_hash: &str) -> Option<TxResult> {
        let timeout = self.inner.config.poll.query_timeout;
        match tokio::time::timeout(timeout, self.inner.chain.get_tx(tx_hash)).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                debug!(tx_hash, error = %e, "tx lookup failed");
                None
            }
            Err(_) => {
                debug!(tx_hash, "tx lookup timed out");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEnvironment;
    use crate::models::{Side, WagerStatus};
    use crate::ports::PendingSecretStore;
    use crate::rpc::chain_client::bet_created_event;

    #[tokio::test(start_paused = true)]
    async fn test_rejected_create_releases_stake() {
        let env = MockEnvironment::new();
        let broadcast = env.begin_create("alice", Side::Heads, [1u8; 32], 500, "HC1");
        env.chain.insert_tx("HC1", TxResult::failure(5, "insufficient funds"));

        let outcome = env.reconciler.confirm_create(broadcast.clone()).await.unwrap();
        assert_eq!(outcome, CreateOutcome::Failed("insufficient funds".into()));

        let record = env.ledger.by_commitment(&broadcast.commitment).unwrap();
        assert_eq!(record.status, WagerStatus::Canceled);
        assert_eq!(env.funds.locked("alice"), 0);
        assert_eq!(env.funds.inflight("alice"), 0);
        assert!(env.secrets.get(&broadcast.commitment).unwrap().is_none());

        let failed = env.notifier.of_kind(NotificationKind::Failed);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].reason.as_deref(), Some("insufficient funds"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_id_resolved_by_commitment_fallback() {
        let env = MockEnvironment::new();
        let broadcast = env.begin_create("alice", Side::Tails, [2u8; 32], 500, "HC2");
        env.chain.insert_tx("HC2", TxResult::success(vec![]));
        env.chain.insert_bet(crate::mock::MockChain::open_bet(
            77,
            "cosmos1alice",
            &broadcast.commitment,
        ));

        let outcome = env.reconciler.confirm_create(broadcast).await.unwrap();
        assert_eq!(outcome, CreateOutcome::Confirmed(77));
        let wager = env.ledger.wager(77).unwrap();
        assert!(wager.has_secret());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_id_keeps_stake_locked() {
        let env = MockEnvironment::new();
        let broadcast = env.begin_create("alice", Side::Heads, [3u8; 32], 500, "HC3");
        env.chain.insert_tx("HC3", TxResult::success(vec![]));

        let outcome = env.reconciler.confirm_create(broadcast.clone()).await.unwrap();
        assert_eq!(outcome, CreateOutcome::Unresolved);

        assert_eq!(env.funds.locked("alice"), 500);
        assert_eq!(env.funds.inflight("alice"), 0);
        assert!(env.funds.unlock_calls().is_empty());
        assert_eq!(
            env.ledger.by_commitment(&broadcast.commitment).unwrap().status,
            WagerStatus::Creating
        );
        assert!(env.notifier.all().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_schedules_recheck() {
        let env = MockEnvironment::new();
        let broadcast = env.begin_create("alice", Side::Heads, [4u8; 32], 500, "HC4");

        let outcome = env.reconciler.confirm_create(broadcast.clone()).await.unwrap();
        assert_eq!(outcome, CreateOutcome::Pending);
        assert_eq!(env.reconciler.rechecks().len(), 1);

        // Lands late
        env.chain.insert_tx("HC4", TxResult::success(vec![bet_created_event(90)]));
        let outcome = env.reconciler.recheck_create(broadcast).await.unwrap();
        assert_eq!(outcome, CreateOutcome::Confirmed(90));
        assert_eq!(env.funds.inflight("alice"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_confirmation_notifies_once() {
        let env = MockEnvironment::new();
        let broadcast = env.begin_create("alice", Side::Heads, [5u8; 32], 500, "HC5");
        env.chain.insert_tx("HC5", TxResult::success(vec![bet_created_event(91)]));

        env.reconciler.confirm_create(broadcast.clone()).await.unwrap();
        let again = env.reconciler.confirm_create(broadcast).await.unwrap();
        assert_eq!(again, CreateOutcome::AlreadyKnown(91));
        assert_eq!(env.notifier.of_kind(NotificationKind::Confirmed).len(), 1);
    }
}
