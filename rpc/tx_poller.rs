// ============================================================================
// Transaction Poller
// ============================================================================
//
// Waits for a broadcast transaction to be included. Intervals start short and
// grow multiplicatively up to a cap; every single lookup carries its own
// timeout, clipped to whatever is left of the overall deadline, so one stalled
// request cannot eat the whole budget.
//
// Transient lookup failures are retried until the deadline. Only caller
// misuse is returned as an error.
//
// ============================================================================

use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use super::chain_client::{ChainQuery, TxResult};
use crate::error::ChainError;

#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    /// Overall wall-clock budget
    pub max_wait: Duration,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Growth factor applied after every miss
    pub multiplier: f64,
    /// Budget for a single lookup
    pub query_timeout: Duration,
}

impl PollConfig {
    pub fn validate(&self) -> Result<(), ChainError> {
        if self.max_wait.is_zero() {
            return Err(ChainError::InvalidArgument("max_wait must be positive".into()));
        }
        if self.initial_interval.is_zero() || self.max_interval < self.initial_interval {
            return Err(ChainError::InvalidArgument(
                "poll intervals must be positive and max_interval >= initial_interval".into(),
            ));
        }
        if !(self.multiplier >= 1.0) {
            return Err(ChainError::InvalidArgument("multiplier must be >= 1.0".into()));
        }
        if self.query_timeout.is_zero() {
            return Err(ChainError::InvalidArgument("query_timeout must be positive".into()));
        }
        Ok(())
    }

    fn next_interval(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_interval)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Included on-chain; check `code` for success
    Included(TxResult),
    /// Neither included nor rejected before the deadline
    NotFound,
}

/// Polls `get_tx` until the transaction shows up or `config.max_wait` elapses
pub async fn poll_for_tx(
    chain: &dyn ChainQuery,
    tx_hash: &str,
    config: &PollConfig,
) -> Result<PollOutcome, ChainError> {
    if tx_hash.trim().is_empty() {
        return Err(ChainError::InvalidArgument("empty transaction hash".into()));
    }
    config.validate()?;

    let deadline = Instant::now() + config.max_wait;
    let mut interval = config.initial_interval;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        match timeout(config.query_timeout.min(remaining), chain.get_tx(tx_hash)).await {
            Ok(Ok(Some(result))) => {
                debug!(tx_hash, attempts, code = result.code, height = %result.height, "tx included");
                return Ok(PollOutcome::Included(result));
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => debug!(tx_hash, attempts, error = %e, "tx lookup failed, retrying"),
            Err(_) => debug!(tx_hash, attempts, "tx lookup timed out, retrying"),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        sleep(interval.min(remaining)).await;
        interval = config.next_interval(interval);
    }

    warn!(tx_hash, attempts, max_wait_ms = config.max_wait.as_millis() as u64, "tx not found before deadline");
    Ok(PollOutcome::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChain;

    fn quick_config() -> PollConfig {
        PollConfig {
            max_wait: Duration::from_secs(10),
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(2),
            multiplier: 2.0,
            query_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_interval_growth_is_capped() {
        let config = quick_config();
        let second = config.next_interval(config.initial_interval);
        assert_eq!(second, Duration::from_secs(1));
        assert_eq!(config.next_interval(second), Duration::from_secs(2));
        assert_eq!(config.next_interval(Duration::from_secs(2)), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_misuse_is_an_error() {
        let chain = MockChain::new();
        let result = poll_for_tx(&chain, "", &quick_config()).await;
        assert!(matches!(result, Err(ChainError::InvalidArgument(_))));

        let mut bad = quick_config();
        bad.multiplier = 0.5;
        let result = poll_for_tx(&chain, "H1", &bad).await;
        assert!(matches!(result, Err(ChainError::InvalidArgument(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_found_after_transient_failures() {
        let chain = MockChain::new();
        chain.insert_tx("H1", TxResult::success(vec![]));
        chain.fail_next_lookups(2);

        let outcome = poll_for_tx(&chain, "H1", &quick_config()).await.unwrap();
        assert!(matches!(outcome, PollOutcome::Included(ref tx) if tx.is_success()));
        assert_eq!(chain.tx_lookups("H1"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_returned_not_retried() {
        let chain = MockChain::new();
        chain.insert_tx("H2", TxResult::failure(5, "insufficient funds"));

        let outcome = poll_for_tx(&chain, "H2", &quick_config()).await.unwrap();
        match outcome {
            PollOutcome::Included(tx) => {
                assert_eq!(tx.code, 5);
                assert_eq!(tx.raw_log, "insufficient funds");
            }
            PollOutcome::NotFound => panic!("expected inclusion"),
        }
        assert_eq!(chain.tx_lookups("H2"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_respects_deadline() {
        let chain = MockChain::new();
        let started = Instant::now();

        let outcome = poll_for_tx(&chain, "missing", &quick_config()).await.unwrap();
        assert_eq!(outcome, PollOutcome::NotFound);

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(11));
        // 0, 0.5, 1.5, 3.5, 5.5, 7.5, 9.5
        assert_eq!(chain.tx_lookups("missing"), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_lookup_is_cut_by_query_timeout() {
        let chain = MockChain::new();
        chain.stall_lookups(Duration::from_secs(60));

        let started = Instant::now();
        let outcome = poll_for_tx(&chain, "H3", &quick_config()).await.unwrap();
        assert_eq!(outcome, PollOutcome::NotFound);
        assert!(started.elapsed() <= Duration::from_secs(10) + Duration::from_millis(1));
    }
}
