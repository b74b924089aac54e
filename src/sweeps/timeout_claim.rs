//! Claims accepted wagers whose reveal window lapsed, on the acceptor's behalf.

use tracing::{debug, info, warn};

use super::{cutoff, SweepStats};
use crate::engine::Reconciler;
use crate::error::Result;
use crate::models::{Wager, WagerAction};
use crate::ports::{RelayAction, RelayRequest};
use crate::reveal::is_already_resolved;
use crate::rpc::{poll_for_tx, PollOutcome};

#[derive(Debug, PartialEq, Eq)]
enum ClaimResult {
    Settled,
    Pending,
    Busy,
}

impl Reconciler {
    pub(crate) async fn sweep_timeout_claims(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let accepted_before = cutoff(self.inner.config.reveal_timeout);

        let candidates = match self.inner.ledger.timed_out_candidates(accepted_before).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "timeout sweep: candidate query failed");
                stats.errors += 1;
                return stats;
            }
        };
        stats.candidates = candidates.len();

        for wager in candidates {
            match self.claim_timeout(&wager).await {
                Ok(ClaimResult::Settled) => stats.processed += 1,
                Ok(ClaimResult::Busy) => stats.busy += 1,
                Ok(ClaimResult::Pending) => {}
                Err(e) => {
                    warn!(wager = %wager.label(), error = %e, "timeout claim failed");
                    stats.errors += 1;
                }
            }
        }
        stats
    }

    async fn claim_timeout(&self, wager: &Wager) -> Result<ClaimResult> {
        let Some(id) = wager.id else {
            return Ok(ClaimResult::Pending);
        };
        let Some(_guard) = self.inner.locks.try_acquire_wager(id) else {
            return Ok(ClaimResult::Busy);
        };

        if self.sync_locked(id).await?.is_resolved() {
            return Ok(ClaimResult::Settled);
        }

        let acceptor_address = match (&wager.acceptor_address, &wager.acceptor_id) {
            (Some(addr), _) => Some(addr.clone()),
            (None, Some(acceptor_id)) => self.inner.ledger.address_for_user(acceptor_id).await?,
            (None, None) => None,
        };
        let Some(acceptor_address) = acceptor_address else {
            warn!(wager_id = id, "accepted wager without acceptor address");
            return Ok(ClaimResult::Pending);
        };
        if !self.inner.relay.is_ready().await {
            debug!(wager_id = id, "relay not ready, claim retried next tick");
            return Ok(ClaimResult::Pending);
        }

        let resp = self
            .inner
            .relay
            .submit(RelayRequest {
                sender: acceptor_address,
                msg: RelayAction::ClaimTimeout { bet_id: id },
            })
            .await?;

        if !resp.success {
            let text = resp.error_text();
            if is_already_resolved(text) {
                debug!(wager_id = id, log = text, "claim conflict, synchronizing");
                let settled = self.sync_locked(id).await?.is_resolved();
                return Ok(if settled { ClaimResult::Settled } else { ClaimResult::Pending });
            }
            warn!(wager_id = id, log = text, "timeout claim rejected");
            return Ok(ClaimResult::Pending);
        }

        let tx_hash = resp.tx_hash.unwrap_or_default();
        info!(wager_id = id, tx_hash = %tx_hash, "⏰ timeout claim relayed");
        if !tx_hash.is_empty() {
            self.inner
                .ledger
                .record_tx_hash(id, WagerAction::ClaimTimeout, &tx_hash)
                .await?;
            if let PollOutcome::Included(tx) =
                poll_for_tx(self.inner.chain.as_ref(), &tx_hash, &self.inner.config.poll).await?
            {
                if !tx.is_success() {
                    warn!(wager_id = id, raw_log = %tx.raw_log, "timeout claim failed on-chain");
                }
            }
        }

        let settled = self.sync_locked(id).await?.is_resolved();
        Ok(if settled { ClaimResult::Settled } else { ClaimResult::Pending })
    }
}
