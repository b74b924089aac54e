//! Imports wagers that are open on-chain but missing from the ledger.
//!
//! A `creating` record with the same commitment is completed rather than
//! duplicated. Wagers younger than the grace period are left to their create
//! task. No fund action: the maker's stake was locked before broadcast.

use chrono::{TimeZone, Utc};
use tracing::{debug, info, warn};

use super::SweepStats;
use crate::engine::Reconciler;
use crate::error::Result;
use crate::lifecycle::short;
use crate::models::{NotificationKind, WagerAction, WagerNotification, WagerStatus};
use crate::ports::{ConfirmedCreation, CreationOutcome};
use crate::processing_lock::LockKey;
use crate::rpc::{all_open_bets, ChainBet};

#[derive(Debug, PartialEq, Eq)]
enum ImportResult {
    Imported,
    Skipped,
    Busy,
}

impl Reconciler {
    pub(crate) async fn sweep_orphans(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        let bets = match all_open_bets(self.inner.chain.as_ref()).await {
            Ok(bets) => bets,
            Err(e) => {
                warn!(error = %e, "orphan sweep: open bets query failed");
                stats.errors += 1;
                return stats;
            }
        };

        let grace = self.inner.config.orphan_grace.as_secs();
        let now = Utc::now().timestamp().max(0) as u64;

        for bet in bets {
            if now.saturating_sub(bet.created_at_time) < grace {
                continue;
            }
            match self.import_orphan(&bet).await {
                Ok(ImportResult::Imported) => {
                    stats.candidates += 1;
                    stats.processed += 1;
                }
                Ok(ImportResult::Busy) => {
                    stats.candidates += 1;
                    stats.busy += 1;
                }
                Ok(ImportResult::Skipped) => {}
                Err(e) => {
                    warn!(wager_id = bet.id, error = %e, "orphan import failed");
                    stats.candidates += 1;
                    stats.errors += 1;
                }
            }
        }
        stats
    }

    async fn import_orphan(&self, bet: &ChainBet) -> Result<ImportResult> {
        let ledger = &self.inner.ledger;
        if ledger.get_wager(bet.id).await?.is_some() {
            return Ok(ImportResult::Skipped);
        }
        let provisional = ledger.find_by_commitment(&bet.commitment).await?;
        if let Some(existing) = &provisional {
            if existing.status != WagerStatus::Creating {
                debug!(wager_id = bet.id, "commitment already tracked under another record");
                return Ok(ImportResult::Skipped);
            }
        }

        let Some(_wager_guard) = self.inner.locks.try_acquire_wager(bet.id) else {
            return Ok(ImportResult::Busy);
        };
        let Some(_commitment_guard) = self.inner.locks.try_acquire(LockKey::Commitment(bet.commitment.clone())) else {
            return Ok(ImportResult::Busy);
        };

        let Some(maker_id) = ledger.user_for_address(&bet.maker).await? else {
            debug!(wager_id = bet.id, maker = %bet.maker, "orphan maker unknown to the ledger, skipped");
            return Ok(ImportResult::Skipped);
        };

        let secret = self.verified_pending_secret(&bet.commitment, &bet.maker);
        let attached = secret.is_some();

        let outcome = ledger
            .confirm_creation(ConfirmedCreation {
                id: bet.id,
                commitment: bet.commitment.clone(),
                maker_id,
                maker_address: bet.maker.clone(),
                amount: bet.amount,
                create_tx_hash: provisional.and_then(|w| w.create_tx_hash),
                secret,
                created_at: Utc.timestamp_opt(bet.created_at_time as i64, 0).single(),
            })
            .await?;

        if attached {
            self.discard_pending_secret(&bet.commitment);
        }

        match outcome {
            CreationOutcome::Confirmed(wager) => {
                if attached {
                    info!(wager_id = bet.id, commitment = %short(&bet.commitment), "📥 orphan imported with secret");
                } else {
                    warn!(wager_id = bet.id, commitment = %short(&bet.commitment), "📥 orphan imported without secret, needs manual reveal");
                }
                self.notify(WagerNotification::new(NotificationKind::Confirmed, WagerAction::Create, &wager))
                    .await;
                Ok(ImportResult::Imported)
            }
            CreationOutcome::AlreadyKnown(_) => Ok(ImportResult::Skipped),
        }
    }
}
