// ============================================================================
// Auto-Reveal Engine
// ============================================================================
//
// Once an accept is confirmed the maker's stored secret is relayed without
// waiting for the maker. The reveal is not awaited synchronously: its
// inclusion is polled and the synchronizer applies the result, with one
// more sync after a short delay if the first one was early.
//
// Relay rejections are matched against the contract's error texts. "Already
// revealed / claimed / canceled / not found" means someone got there first,
// so the wager is synchronized instead. An expired reveal window belongs to
// the timeout-claim sweep.
//
// ============================================================================

use base64::Engine as _;
use regex::Regex;
use std::sync::OnceLock;
use tokio::time::sleep;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::engine::Reconciler;
use crate::error::{RelayError, Result};
use crate::models::{Wager, WagerAction, WagerStatus};
use crate::ports::{RelayAction, RelayRequest, RelayResponse};
use crate::rpc::{poll_for_tx, PollOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevealOutcome {
    /// Reveal relayed; `synced` once the ledger shows the result
    Submitted { tx_hash: String, synced: bool },
    /// Chain already terminal (found by the pre-check or by a conflict reply)
    AlreadyResolved,
    /// Wrong status or no secret
    NotEligible(String),
    /// Reveal window closed; left for the timeout-claim sweep
    Deferred(String),
    RelayUnavailable,
    Failed(String),
    Busy,
}

/// Contract replies that mean the action already happened
pub(crate) fn is_already_resolved(text: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)(cannot \w+ bet in (revealed|timeoutclaimed|timeout_claimed|canceled) state|bet not found|already (revealed|claimed|canceled))",
            )
            .expect("static regex")
        })
        .is_match(text)
}

pub(crate) fn is_reveal_expired(text: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)reveal timeout expired").expect("static regex"))
        .is_match(text)
}

impl Reconciler {
    /// Reveals an `accepted` wager with its stored secret
    pub async fn auto_reveal(&self, wager_id: u64) -> Result<RevealOutcome> {
        let Some(_guard) = self.inner.locks.try_acquire_wager(wager_id) else {
            debug!(wager_id, "auto-reveal skipped, wager busy");
            return Ok(RevealOutcome::Busy);
        };
        self.reveal_locked(wager_id)
            .instrument(info_span!("auto_reveal", wager_id))
            .await
    }

    pub(crate) async fn reveal_locked(&self, wager_id: u64) -> Result<RevealOutcome> {
        let Some(wager) = self.inner.ledger.get_wager(wager_id).await? else {
            return Ok(RevealOutcome::NotEligible("unknown wager".into()));
        };
        if wager.status != WagerStatus::Accepted {
            return Ok(RevealOutcome::NotEligible(format!("status is {}", wager.status)));
        }
        if !wager.has_secret() {
            debug!(wager_id, "no maker secret, reveal left to the maker");
            return Ok(RevealOutcome::NotEligible("no maker secret".into()));
        }

        let (synced, ready) = tokio::join!(self.sync_locked(wager_id), self.inner.relay.is_ready());
        match synced {
            Ok(outcome) if outcome.is_resolved() => return Ok(RevealOutcome::AlreadyResolved),
            Ok(_) => {}
            Err(e) => debug!(wager_id, error = %e, "pre-reveal sync failed, revealing anyway"),
        }
        if !ready {
            warn!(wager_id, "relay not ready, reveal retried by the next sweep");
            return Ok(RevealOutcome::RelayUnavailable);
        }

        match self.submit_reveal(&wager).await {
            Ok(resp) if resp.success => {
                let tx_hash = resp.tx_hash.unwrap_or_default();
                info!(wager_id, tx_hash = %tx_hash, "🎲 reveal relayed");
                let synced = self.follow_reveal_locked(wager_id, &tx_hash).await?;
                Ok(RevealOutcome::Submitted { tx_hash, synced })
            }
            Ok(resp) => self.reveal_rejected(wager_id, resp.error_text()).await,
            Err(RelayError::NotReady) => Ok(RevealOutcome::RelayUnavailable),
            Err(e) => {
                warn!(wager_id, error = %e, "reveal relay failed");
                Ok(RevealOutcome::Failed(e.to_string()))
            }
        }
    }

    /// Relays the reveal message for `wager` as its maker
    pub(crate) async fn submit_reveal(&self, wager: &Wager) -> std::result::Result<RelayResponse, RelayError> {
        let (Some(bet_id), Some(side), Some(secret_hex)) = (wager.id, wager.maker_side, wager.maker_secret.as_deref()) else {
            return Err(RelayError::InvalidResponse("wager has no id or secret".into()));
        };
        let secret = hex::decode(secret_hex)
            .map_err(|e| RelayError::InvalidResponse(format!("stored secret is not hex: {}", e)))?;

        self.inner
            .relay
            .submit(RelayRequest {
                sender: wager.maker_address.clone(),
                msg: RelayAction::Reveal {
                    bet_id,
                    side,
                    secret: base64::engine::general_purpose::STANDARD.encode(secret),
                },
            })
            .await
    }

    /// Follows a reveal relayed elsewhere (the early reveal from accept)
    pub(crate) async fn follow_reveal(&self, wager_id: u64, tx_hash: &str) -> Result<bool> {
        let Some(_guard) = self.inner.locks.try_acquire_wager(wager_id) else {
            debug!(wager_id, "wager busy, reveal left to its owner and the sweep");
            return Ok(false);
        };
        self.follow_reveal_locked(wager_id, tx_hash).await
    }

    /// Poll the reveal, sync, and sync once more after a pause if needed
    async fn follow_reveal_locked(&self, wager_id: u64, tx_hash: &str) -> Result<bool> {
        let config = &self.inner.config;
        if !tx_hash.is_empty() {
            if let Err(e) = self.inner.ledger.record_tx_hash(wager_id, WagerAction::Reveal, tx_hash).await {
                warn!(wager_id, error = %e, "failed to record reveal tx");
            }
            match poll_for_tx(self.inner.chain.as_ref(), tx_hash, &config.poll).await? {
                PollOutcome::Included(tx) if !tx.is_success() => {
                    warn!(wager_id, tx_hash, raw_log = %tx.raw_log, "reveal rejected on-chain");
                }
                PollOutcome::Included(_) => {}
                PollOutcome::NotFound => debug!(wager_id, tx_hash, "reveal not seen before deadline"),
            }
        }

        if self.sync_locked(wager_id).await?.is_resolved() {
            return Ok(true);
        }
        sleep(config.reveal_resync_delay).await;
        Ok(self.sync_locked(wager_id).await?.is_resolved())
    }

    async fn reveal_rejected(&self, wager_id: u64, text: &str) -> Result<RevealOutcome> {
        if is_already_resolved(text) {
            info!(wager_id, log = text, "reveal already happened, synchronizing");
            return match self.sync_locked(wager_id).await? {
                outcome if outcome.is_resolved() => Ok(RevealOutcome::AlreadyResolved),
                outcome => Ok(RevealOutcome::Deferred(format!("sync after conflict: {:?}", outcome))),
            };
        }
        if is_reveal_expired(text) {
            info!(wager_id, "reveal window closed, timeout claim will settle it");
            return Ok(RevealOutcome::Deferred(text.to_string()));
        }
        warn!(wager_id, log = text, "❌ reveal rejected");
        Ok(RevealOutcome::Failed(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEnvironment;
    use crate::models::{NotificationKind, Side};
    use crate::rpc::ChainBetStatus;

    #[test]
    fn test_conflict_patterns() {
        assert!(is_already_resolved("Invalid state transition: cannot reveal bet in Revealed state"));
        assert!(is_already_resolved("Invalid state transition: cannot reveal bet in TimeoutClaimed state"));
        assert!(is_already_resolved("Bet not found: 12"));
        assert!(is_already_resolved("failed: already revealed"));
        assert!(!is_already_resolved("Invalid state transition: cannot reveal bet in Open state"));

        assert!(is_reveal_expired("Reveal timeout expired: deadline was 1700000300"));
        assert!(!is_reveal_expired("Bet expired"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reveal_submits_and_syncs() {
        let env = MockEnvironment::new();
        env.accepted_wager(40, "alice", "bob", 1_000, Side::Tails);
        env.ledger.attach_secret(40, Side::Tails, &[1u8; 32]);

        let outcome = env.reconciler.auto_reveal(40).await.unwrap();
        assert!(matches!(outcome, RevealOutcome::Submitted { synced: true, .. }));

        let wager = env.ledger.wager(40).unwrap();
        assert_eq!(wager.status, WagerStatus::Revealed);
        assert!(wager.reveal_tx_hash.is_some());
        assert_eq!(env.notifier.count(NotificationKind::Revealed, WagerAction::Reveal), 1);

        match &env.relay.requests()[0].msg {
            RelayAction::Reveal { bet_id, side, secret } => {
                assert_eq!(*bet_id, 40);
                assert_eq!(*side, Side::Tails);
                assert_eq!(secret, &base64::engine::general_purpose::STANDARD.encode([1u8; 32]));
            }
            other => panic!("unexpected relay message {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_resolved_skips_relay() {
        let env = MockEnvironment::new();
        env.accepted_wager(41, "alice", "bob", 1_000, Side::Tails);
        env.ledger.attach_secret(41, Side::Tails, &[1u8; 32]);
        env.chain.update_bet(41, |bet| {
            bet.status = ChainBetStatus::Revealed;
            bet.winner = Some("cosmos1alice".into());
        });

        let outcome = env.reconciler.auto_reveal(41).await.unwrap();
        assert_eq!(outcome, RevealOutcome::AlreadyResolved);
        assert!(env.relay.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_reply_synchronizes() {
        let env = MockEnvironment::new();
        env.accepted_wager(42, "alice", "bob", 1_000, Side::Tails);
        env.ledger.attach_secret(42, Side::Heads, &[1u8; 32]);
        env.relay.script_rejection("Invalid state transition: cannot reveal bet in Revealed state");
        // Chain catches up right as the relay answers
        env.relay.on_next_submit({
            let chain = env.chain.clone();
            move || {
                chain.update_bet(42, |bet| {
                    bet.status = ChainBetStatus::Revealed;
                    bet.winner = Some("cosmos1bob".into());
                })
            }
        });

        let outcome = env.reconciler.auto_reveal(42).await.unwrap();
        assert_eq!(outcome, RevealOutcome::AlreadyResolved);
        assert_eq!(env.ledger.wager(42).unwrap().winner_id.as_deref(), Some("bob"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_window_is_deferred() {
        let env = MockEnvironment::new();
        env.accepted_wager(43, "alice", "bob", 1_000, Side::Tails);
        env.ledger.attach_secret(43, Side::Heads, &[1u8; 32]);
        env.relay.script_rejection("Reveal timeout expired: deadline was 1700000300");

        let outcome = env.reconciler.auto_reveal(43).await.unwrap();
        assert!(matches!(outcome, RevealOutcome::Deferred(_)));
        assert_eq!(env.ledger.wager(43).unwrap().status, WagerStatus::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_secret_is_not_eligible() {
        let env = MockEnvironment::new();
        env.accepted_wager(44, "alice", "bob", 1_000, Side::Tails);

        let outcome = env.reconciler.auto_reveal(44).await.unwrap();
        assert!(matches!(outcome, RevealOutcome::NotEligible(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_not_ready() {
        let env = MockEnvironment::new();
        env.accepted_wager(45, "alice", "bob", 1_000, Side::Tails);
        env.ledger.attach_secret(45, Side::Heads, &[1u8; 32]);
        env.relay.set_ready(false);

        let outcome = env.reconciler.auto_reveal(45).await.unwrap();
        assert_eq!(outcome, RevealOutcome::RelayUnavailable);
        assert!(env.relay.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_transport_error_fails_without_touching_ledger() {
        let env = MockEnvironment::new();
        env.accepted_wager(46, "alice", "bob", 1_000, Side::Tails);
        env.ledger.attach_secret(46, Side::Heads, &[1u8; 32]);
        env.relay.script_error(RelayError::RequestFailed("connection reset".into()));

        let outcome = env.reconciler.auto_reveal(46).await.unwrap();
        assert!(matches!(outcome, RevealOutcome::Failed(ref e) if e.contains("connection reset")));
        assert_eq!(env.ledger.wager(46).unwrap().status, WagerStatus::Accepted);
        assert!(env.funds.unlock_calls().is_empty());
    }
}
