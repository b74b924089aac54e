// ============================================================================
// Reconciler configuration
// ============================================================================
//
// Every knob has a default and an environment override. `mock()` shrinks the
// timings so tests and standalone runs finish quickly.
//
// ============================================================================

use std::str::FromStr;
use std::time::Duration;

use crate::rpc::tx_poller::PollConfig;

// ============================================================================
// CONSTANTS
// ============================================================================

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_TX_POLL_MAX_WAIT_SECS: u64 = 30;
pub const DEFAULT_TX_POLL_INITIAL_MS: u64 = 500;
pub const DEFAULT_TX_POLL_MAX_INTERVAL_MS: u64 = 4_000;
pub const DEFAULT_TX_POLL_MULTIPLIER: f64 = 1.5;
pub const DEFAULT_TX_QUERY_TIMEOUT_SECS: u64 = 5;

/// Safety window before an unconfirmed accept is re-checked and reverted
pub const DEFAULT_ACCEPT_RECHECK_SECS: u64 = 45;
pub const DEFAULT_CANCEL_RECHECK_SECS: u64 = 45;
pub const DEFAULT_CREATE_RECHECK_SECS: u64 = 60;

pub const DEFAULT_STUCK_GRACE_SECS: u64 = 120;
/// First wait after a failed expiry cancel; doubles per further failure
pub const DEFAULT_EXPIRY_RETRY_BACKOFF_SECS: u64 = 300;
pub const DEFAULT_ORPHAN_GRACE_SECS: u64 = 120;

/// Contract defaults, replaced by the on-chain config when reachable
pub const DEFAULT_REVEAL_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_BET_TTL_SECS: u64 = 43_200;

pub const DEFAULT_PENDING_SECRET_TTL_SECS: u64 = 3_600;
pub const DEFAULT_CHAIN_ID_RESOLVE_ATTEMPTS: u32 = 5;
pub const DEFAULT_CHAIN_ID_RESOLVE_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_REVEAL_RESYNC_DELAY_MS: u64 = 3_000;
pub const DEFAULT_AUTO_REVEAL_BATCH_SIZE: usize = 5;
pub const DEFAULT_SECRETS_DB_PATH: &str = "data/pending_secrets";

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Chain LCD endpoint; `None` runs against the in-memory chain
    pub chain_rest_url: Option<String>,
    /// Coinflip contract address
    pub contract_address: String,
    /// Relay endpoint; `None` runs against the in-memory relay
    pub relay_url: Option<String>,

    pub sweep_interval: Duration,
    pub poll: PollConfig,

    pub accept_recheck_delay: Duration,
    pub cancel_recheck_delay: Duration,
    pub create_recheck_delay: Duration,

    /// Age past which an `accepting`/`canceling` wager is forcibly settled
    pub stuck_grace: Duration,
    /// Minimum on-chain age before a missing wager is imported
    pub orphan_grace: Duration,
    pub expiry_retry_backoff: Duration,

    pub reveal_timeout: Duration,
    /// Zero means open wagers never expire
    pub bet_ttl: Duration,

    pub pending_secret_ttl: Duration,
    pub chain_id_resolve_attempts: u32,
    pub chain_id_resolve_base_delay: Duration,
    /// Wait before the second sync after a confirmed reveal
    pub reveal_resync_delay: Duration,
    pub auto_reveal_batch_size: usize,
    /// Broadcast the reveal while the accept is still being polled
    pub parallel_reveal: bool,

    pub secrets_db_path: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            chain_rest_url: None,
            contract_address: String::new(),
            relay_url: None,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            poll: PollConfig {
                max_wait: Duration::from_secs(DEFAULT_TX_POLL_MAX_WAIT_SECS),
                initial_interval: Duration::from_millis(DEFAULT_TX_POLL_INITIAL_MS),
                max_interval: Duration::from_millis(DEFAULT_TX_POLL_MAX_INTERVAL_MS),
                multiplier: DEFAULT_TX_POLL_MULTIPLIER,
                query_timeout: Duration::from_secs(DEFAULT_TX_QUERY_TIMEOUT_SECS),
            },
            accept_recheck_delay: Duration::from_secs(DEFAULT_ACCEPT_RECHECK_SECS),
            cancel_recheck_delay: Duration::from_secs(DEFAULT_CANCEL_RECHECK_SECS),
            create_recheck_delay: Duration::from_secs(DEFAULT_CREATE_RECHECK_SECS),
            stuck_grace: Duration::from_secs(DEFAULT_STUCK_GRACE_SECS),
            orphan_grace: Duration::from_secs(DEFAULT_ORPHAN_GRACE_SECS),
            expiry_retry_backoff: Duration::from_secs(DEFAULT_EXPIRY_RETRY_BACKOFF_SECS),
            reveal_timeout: Duration::from_secs(DEFAULT_REVEAL_TIMEOUT_SECS),
            bet_ttl: Duration::from_secs(DEFAULT_BET_TTL_SECS),
            pending_secret_ttl: Duration::from_secs(DEFAULT_PENDING_SECRET_TTL_SECS),
            chain_id_resolve_attempts: DEFAULT_CHAIN_ID_RESOLVE_ATTEMPTS,
            chain_id_resolve_base_delay: Duration::from_millis(DEFAULT_CHAIN_ID_RESOLVE_BASE_DELAY_MS),
            reveal_resync_delay: Duration::from_millis(DEFAULT_REVEAL_RESYNC_DELAY_MS),
            auto_reveal_batch_size: DEFAULT_AUTO_REVEAL_BATCH_SIZE,
            parallel_reveal: true,
            secrets_db_path: DEFAULT_SECRETS_DB_PATH.to_string(),
        }
    }
}

impl ReconcilerConfig {
    /// Reads overrides from the environment (call `dotenv::dotenv()` first)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            Duration::from_secs(env_or(key, default.as_secs()))
        };
        let millis = |key: &str, default: Duration| {
            Duration::from_millis(env_or(key, default.as_millis() as u64))
        };

        Self {
            chain_rest_url: non_empty_env("CHAIN_REST_URL"),
            contract_address: non_empty_env("COINFLIP_CONTRACT").unwrap_or(defaults.contract_address),
            relay_url: non_empty_env("RELAY_URL"),
            sweep_interval: secs("SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            poll: PollConfig {
                max_wait: secs("TX_POLL_MAX_WAIT_SECS", defaults.poll.max_wait),
                initial_interval: millis("TX_POLL_INITIAL_MS", defaults.poll.initial_interval),
                max_interval: millis("TX_POLL_MAX_INTERVAL_MS", defaults.poll.max_interval),
                multiplier: env_or("TX_POLL_MULTIPLIER", defaults.poll.multiplier),
                query_timeout: secs("TX_QUERY_TIMEOUT_SECS", defaults.poll.query_timeout),
            },
            accept_recheck_delay: secs("ACCEPT_RECHECK_SECS", defaults.accept_recheck_delay),
            cancel_recheck_delay: secs("CANCEL_RECHECK_SECS", defaults.cancel_recheck_delay),
            create_recheck_delay: secs("CREATE_RECHECK_SECS", defaults.create_recheck_delay),
            stuck_grace: secs("STUCK_GRACE_SECS", defaults.stuck_grace),
            orphan_grace: secs("ORPHAN_GRACE_SECS", defaults.orphan_grace),
            expiry_retry_backoff: secs("EXPIRY_RETRY_BACKOFF_SECS", defaults.expiry_retry_backoff),
            reveal_timeout: secs("REVEAL_TIMEOUT_SECS", defaults.reveal_timeout),
            bet_ttl: secs("BET_TTL_SECS", defaults.bet_ttl),
            pending_secret_ttl: secs("PENDING_SECRET_TTL_SECS", defaults.pending_secret_ttl),
            chain_id_resolve_attempts: env_or("CHAIN_ID_RESOLVE_ATTEMPTS", defaults.chain_id_resolve_attempts),
            chain_id_resolve_base_delay: millis(
                "CHAIN_ID_RESOLVE_BASE_DELAY_MS",
                defaults.chain_id_resolve_base_delay,
            ),
            reveal_resync_delay: millis("REVEAL_RESYNC_DELAY_MS", defaults.reveal_resync_delay),
            auto_reveal_batch_size: env_or("AUTO_REVEAL_BATCH_SIZE", defaults.auto_reveal_batch_size).max(1),
            parallel_reveal: env_flag("PARALLEL_REVEAL", defaults.parallel_reveal),
            secrets_db_path: non_empty_env("SECRETS_DB_PATH").unwrap_or(defaults.secrets_db_path),
        }
    }

    /// Tight timings for tests and standalone mode
    pub fn mock() -> Self {
        Self {
            contract_address: "cosmos1coinflipmock".to_string(),
            sweep_interval: Duration::from_secs(1),
            poll: PollConfig {
                max_wait: Duration::from_secs(5),
                initial_interval: Duration::from_millis(100),
                max_interval: Duration::from_millis(500),
                multiplier: 1.5,
                query_timeout: Duration::from_secs(1),
            },
            chain_id_resolve_attempts: 3,
            chain_id_resolve_base_delay: Duration::from_millis(100),
            reveal_resync_delay: Duration::from_millis(200),
            ..Self::default()
        }
    }

    /// Overrides contract-owned timings with the values the chain reports
    pub fn apply_contract_config(&mut self, reveal_timeout_secs: u64, bet_ttl_secs: u64) {
        self.reveal_timeout = Duration::from_secs(reveal_timeout_secs);
        self.bet_ttl = Duration::from_secs(bet_ttl_secs);
    }

    pub fn is_mock_chain(&self) -> bool {
        self.chain_rest_url.is_none()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    non_empty_env(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    non_empty_env(key)
        .map(|v| matches!(v.trim(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.accept_recheck_delay, Duration::from_secs(45));
        assert_eq!(config.poll.max_wait, Duration::from_secs(30));
        assert_eq!(config.auto_reveal_batch_size, 5);
        assert!(config.parallel_reveal);
        assert!(config.is_mock_chain());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("ORPHAN_GRACE_SECS", "7");
        std::env::set_var("TX_POLL_MULTIPLIER", "2.0");
        std::env::set_var("PARALLEL_REVEAL", "false");
        let config = ReconcilerConfig::from_env();
        std::env::remove_var("ORPHAN_GRACE_SECS");
        std::env::remove_var("TX_POLL_MULTIPLIER");
        std::env::remove_var("PARALLEL_REVEAL");

        assert_eq!(config.orphan_grace, Duration::from_secs(7));
        assert_eq!(config.poll.multiplier, 2.0);
        assert!(!config.parallel_reveal);
    }

    #[test]
    fn test_contract_config_override() {
        let mut config = ReconcilerConfig::mock();
        config.apply_contract_config(600, 0);
        assert_eq!(config.reveal_timeout, Duration::from_secs(600));
        assert!(config.bet_ttl.is_zero());
    }
}
