//! Retry scan for accepted wagers that still hold a maker secret, in
//! bounded concurrent batches.

use tokio::task::JoinSet;
use tracing::{info_span, warn, Instrument};

use super::SweepStats;
use crate::engine::Reconciler;
use crate::models::WagerStatus;
use crate::reveal::RevealOutcome;

impl Reconciler {
    pub(crate) async fn sweep_auto_reveal(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let reveal_timeout = self.inner.config.reveal_timeout;
        let now = chrono::Utc::now();

        let candidates = match self.inner.ledger.wagers_with_status(WagerStatus::Accepted).await {
            Ok(wagers) => wagers,
            Err(e) => {
                warn!(error = %e, "auto-reveal sweep: candidate query failed");
                stats.errors += 1;
                return stats;
            }
        };

        // Past the deadline the timeout-claim sweep owns the wager
        let ids: Vec<u64> = candidates
            .iter()
            .filter(|w| w.has_secret())
            .filter(|w| w.reveal_deadline(reveal_timeout).map_or(true, |d| d > now))
            .filter_map(|w| w.id)
            .collect();
        stats.candidates = ids.len();

        for batch in ids.chunks(self.inner.config.auto_reveal_batch_size.max(1)) {
            let mut set = JoinSet::new();
            for &id in batch {
                let this = self.clone();
                set.spawn(async move { this.auto_reveal(id).await }.instrument(info_span!("sweep_reveal", wager_id = id)));
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(Ok(RevealOutcome::Submitted { .. } | RevealOutcome::AlreadyResolved)) => stats.processed += 1,
                    Ok(Ok(RevealOutcome::Busy)) => stats.busy += 1,
                    Ok(Ok(RevealOutcome::Failed(_))) => stats.errors += 1,
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        warn!(error = %e, "auto-reveal sweep: candidate failed");
                        stats.errors += 1;
                    }
                    Err(e) => {
                        warn!(error = %e, "auto-reveal sweep: task aborted");
                        stats.errors += 1;
                    }
                }
            }
        }
        stats
    }
}
