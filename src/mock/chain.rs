//! Scriptable in-memory chain

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::ChainError;
use crate::models::Side;
use crate::rpc::{ChainBet, ChainBetStatus, ChainQuery, ContractConfig, TxResult};

pub struct MockChain {
    txs: Mutex<HashMap<String, TxResult>>,
    bets: Mutex<BTreeMap<u64, ChainBet>>,
    lookups: Mutex<HashMap<String, usize>>,
    failures_left: AtomicUsize,
    stall: Mutex<Option<Duration>>,
    bet_queries: AtomicUsize,
    open_bets_calls: AtomicUsize,
    open_bets_gate: watch::Sender<bool>,
    config: Mutex<ContractConfig>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            txs: Mutex::new(HashMap::new()),
            bets: Mutex::new(BTreeMap::new()),
            lookups: Mutex::new(HashMap::new()),
            failures_left: AtomicUsize::new(0),
            stall: Mutex::new(None),
            bet_queries: AtomicUsize::new(0),
            open_bets_calls: AtomicUsize::new(0),
            open_bets_gate: gate,
            config: Mutex::new(ContractConfig { reveal_timeout_secs: 300, bet_ttl_secs: 43_200 }),
        }
    }

    /// A freshly created open bet
    pub fn open_bet(id: u64, maker: &str, commitment: &str) -> ChainBet {
        ChainBet {
            id,
            maker: maker.to_string(),
            amount: 1_000,
            commitment: commitment.to_ascii_lowercase(),
            status: ChainBetStatus::Open,
            acceptor: None,
            acceptor_guess: None,
            created_at_time: chrono::Utc::now().timestamp().max(0) as u64,
            accepted_at_time: None,
            reveal_side: None,
            winner: None,
            payout_amount: None,
            commission_paid: None,
        }
    }

    // ========================================================================
    // SCRIPTING
    // ========================================================================

    pub fn insert_tx(&self, tx_hash: &str, result: TxResult) {
        self.txs.lock().unwrap().insert(tx_hash.to_string(), result);
    }

    pub fn insert_bet(&self, bet: ChainBet) {
        self.bets.lock().unwrap().insert(bet.id, bet);
    }

    pub fn bet(&self, id: u64) -> Option<ChainBet> {
        self.bets.lock().unwrap().get(&id).cloned()
    }

    pub fn update_bet(&self, id: u64, f: impl FnOnce(&mut ChainBet)) {
        if let Some(bet) = self.bets.lock().unwrap().get_mut(&id) {
            f(bet);
        }
    }

    pub fn set_bet_status(&self, id: u64, status: ChainBetStatus) {
        self.update_bet(id, |bet| bet.status = status);
    }

    pub fn accept_bet(&self, id: u64, acceptor: &str, guess: Side) {
        self.update_bet(id, |bet| {
            bet.status = ChainBetStatus::Accepted;
            bet.acceptor = Some(acceptor.to_string());
            bet.acceptor_guess = Some(guess);
            bet.accepted_at_time = Some(chrono::Utc::now().timestamp().max(0) as u64);
        });
    }

    pub fn set_config(&self, config: ContractConfig) {
        *self.config.lock().unwrap() = config;
    }

    /// The next `n` tx lookups fail with a transport error
    pub fn fail_next_lookups(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Every tx lookup hangs for `delay` before answering
    pub fn stall_lookups(&self, delay: Duration) {
        *self.stall.lock().unwrap() = Some(delay);
    }

    /// Blocks `open_bets` queries until `release_open_bets`
    pub fn hold_open_bets(&self) {
        self.open_bets_gate.send_replace(true);
    }

    pub fn release_open_bets(&self) {
        self.open_bets_gate.send_replace(false);
    }

    // ========================================================================
    // INSPECTION
    // ========================================================================

    pub fn tx_lookups(&self, tx_hash: &str) -> usize {
        self.lookups.lock().unwrap().get(tx_hash).copied().unwrap_or(0)
    }

    pub fn bet_queries(&self) -> usize {
        self.bet_queries.load(Ordering::SeqCst)
    }

    pub fn open_bets_calls(&self) -> usize {
        self.open_bets_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainQuery for MockChain {
    async fn get_tx(&self, tx_hash: &str) -> Result<Option<TxResult>, ChainError> {
        *self.lookups.lock().unwrap().entry(tx_hash.to_string()).or_insert(0) += 1;

        let stall = *self.stall.lock().unwrap();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ChainError::RequestFailed("connection reset".into()));
        }

        Ok(self.txs.lock().unwrap().get(tx_hash).cloned())
    }

    async fn query_bet(&self, bet_id: u64) -> Result<Option<ChainBet>, ChainError> {
        self.bet_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.bet(bet_id))
    }

    async fn query_open_bets(
        &self,
        start_after: Option<u64>,
        limit: u32,
    ) -> Result<Vec<ChainBet>, ChainError> {
        self.open_bets_calls.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.open_bets_gate.subscribe();
        while *gate.borrow_and_update() {
            if gate.changed().await.is_err() {
                return Err(ChainError::RequestFailed("gate closed".into()));
            }
        }

        let bets = self.bets.lock().unwrap();
        Ok(bets
            .values()
            .filter(|b| b.status == ChainBetStatus::Open)
            .filter(|b| start_after.map_or(true, |after| b.id > after))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn query_config(&self) -> Result<ContractConfig, ChainError> {
        Ok(*self.config.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_open_bets_gate_parks_queries() {
        let chain = MockChain::new();
        chain.insert_bet(MockChain::open_bet(1, "cosmos1alice", "AA"));
        chain.hold_open_bets();

        let mut query = task::spawn(chain.query_open_bets(None, 10));
        assert_pending!(query.poll());
        assert_eq!(chain.open_bets_calls(), 1);

        chain.release_open_bets();
        assert!(query.is_woken());
        let bets = assert_ready!(query.poll()).unwrap();
        assert_eq!(bets.len(), 1);
        assert_eq!(bets[0].commitment, "aa");
    }

    #[tokio::test]
    async fn test_scripted_lookup_failures() {
        let chain = MockChain::new();
        chain.insert_tx("H", TxResult::success(vec![]));
        chain.fail_next_lookups(1);

        assert!(chain.get_tx("H").await.is_err());
        assert!(chain.get_tx("H").await.unwrap().is_some());
        assert_eq!(chain.tx_lookups("H"), 2);
    }

    #[tokio::test]
    async fn test_contract_config_feeds_reconciler_timings() {
        let chain = MockChain::new();
        chain.set_config(ContractConfig { reveal_timeout_secs: 90, bet_ttl_secs: 0 });

        let contract = chain.query_config().await.unwrap();
        let mut config = crate::config::ReconcilerConfig::mock();
        config.apply_contract_config(contract.reveal_timeout_secs, contract.bet_ttl_secs);
        assert_eq!(config.reveal_timeout, Duration::from_secs(90));
        assert!(config.bet_ttl.is_zero());
    }
}
