//! In-memory relay. With a `MockChain` attached it behaves like the contract:
//! reveal/claim/cancel change the bet and produce an included transaction.
//! Without one it has nothing to broadcast to: it reports not ready and
//! refuses every submit.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::chain::MockChain;
use crate::error::RelayError;
use crate::ports::{RelayAction, RelayRequest, RelayResponse, TxRelay};
use crate::rpc::{ChainBet, ChainBetStatus, TxResult};

type SubmitHook = Box<dyn FnOnce() + Send>;

pub struct MockRelay {
    chain: Option<Arc<MockChain>>,
    ready: AtomicBool,
    requests: Mutex<Vec<RelayRequest>>,
    scripted: Mutex<VecDeque<Result<RelayResponse, RelayError>>>,
    hook: Mutex<Option<SubmitHook>>,
    next_tx: AtomicU64,
}

impl MockRelay {
    pub fn new(chain: Option<Arc<MockChain>>) -> Self {
        let ready = chain.is_some();
        Self {
            chain,
            ready: AtomicBool::new(ready),
            requests: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            hook: Mutex::new(None),
            next_tx: AtomicU64::new(1),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Next submit answers `{success: false, rawLog: text}`
    pub fn script_rejection(&self, text: &str) {
        self.scripted.lock().unwrap().push_back(Ok(RelayResponse::rejected(text)));
    }

    /// Next submit answers success with `tx_hash` but leaves the chain alone
    pub fn script_broadcast(&self, tx_hash: &str) {
        self.scripted.lock().unwrap().push_back(Ok(RelayResponse::ok(tx_hash)));
    }

    pub fn script_error(&self, err: RelayError) {
        self.scripted.lock().unwrap().push_back(Err(err));
    }

    /// Runs once, at the start of the next submit
    pub fn on_next_submit(&self, hook: impl FnOnce() + Send + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn requests(&self) -> Vec<RelayRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_hash(&self) -> String {
        format!("RELAY-{}", self.next_tx.fetch_add(1, Ordering::SeqCst))
    }

    /// Contract `Debug` name of a status, as it appears in error texts
    fn contract_state(status: &ChainBetStatus) -> String {
        match status {
            ChainBetStatus::Open => "Open".into(),
            ChainBetStatus::Accepted => "Accepted".into(),
            ChainBetStatus::Revealed => "Revealed".into(),
            ChainBetStatus::Canceled => "Canceled".into(),
            ChainBetStatus::TimeoutClaimed => "TimeoutClaimed".into(),
            ChainBetStatus::Unknown(s) => s.clone(),
        }
    }

    fn execute(&self, chain: &MockChain, request: &RelayRequest) -> RelayResponse {
        let bet_id = request.msg.bet_id();
        let Some(bet) = chain.bet(bet_id) else {
            return RelayResponse::rejected(format!("Bet not found: {}", bet_id));
        };

        let (verb, required) = match &request.msg {
            RelayAction::Reveal { .. } => ("reveal", ChainBetStatus::Accepted),
            RelayAction::ClaimTimeout { .. } => ("claim_timeout", ChainBetStatus::Accepted),
            RelayAction::CancelBet { .. } => ("cancel", ChainBetStatus::Open),
        };
        if bet.status != required {
            return RelayResponse::rejected(format!(
                "Invalid state transition: cannot {} bet in {} state",
                verb,
                Self::contract_state(&bet.status)
            ));
        }

        let resolved = match &request.msg {
            RelayAction::Reveal { side, .. } => {
                let acceptor_won = bet.acceptor_guess == Some(*side);
                let winner = if acceptor_won { bet.acceptor.clone() } else { Some(bet.maker.clone()) };
                ChainBet {
                    status: ChainBetStatus::Revealed,
                    reveal_side: Some(*side),
                    winner,
                    payout_amount: Some(bet.amount * 2),
                    commission_paid: Some(0),
                    ..bet
                }
            }
            RelayAction::ClaimTimeout { .. } => ChainBet {
                status: ChainBetStatus::TimeoutClaimed,
                winner: bet.acceptor.clone(),
                payout_amount: Some(bet.amount * 2),
                commission_paid: Some(0),
                ..bet
            },
            RelayAction::CancelBet { .. } => ChainBet { status: ChainBetStatus::Canceled, ..bet },
        };
        chain.insert_bet(resolved);

        let tx_hash = self.next_hash();
        chain.insert_tx(&tx_hash, TxResult::success(vec![]));
        RelayResponse::ok(tx_hash)
    }
}

#[async_trait]
impl TxRelay for MockRelay {
    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn submit(&self, request: RelayRequest) -> Result<RelayResponse, RelayError> {
        self.requests.lock().unwrap().push(request.clone());

        let hook = self.hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }

        let scripted = self.scripted.lock().unwrap().pop_front();
        if let Some(answer) = scripted {
            return answer;
        }

        match &self.chain {
            Some(chain) => Ok(self.execute(chain, &request)),
            None => Err(RelayError::NotReady),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::ChainQuery;

    #[tokio::test]
    async fn test_detached_relay_refuses_to_broadcast() {
        let relay = MockRelay::new(None);
        assert!(!relay.is_ready().await);

        let answer = relay
            .submit(RelayRequest {
                sender: "cosmos1alice".into(),
                msg: RelayAction::CancelBet { bet_id: 1 },
            })
            .await;
        assert!(matches!(answer, Err(RelayError::NotReady)));
    }

    #[tokio::test]
    async fn test_chain_backed_relay_applies_cancel() {
        let chain = Arc::new(MockChain::new());
        chain.insert_bet(MockChain::open_bet(2, "cosmos1alice", "AA"));
        let relay = MockRelay::new(Some(chain.clone()));
        assert!(relay.is_ready().await);

        let resp = relay
            .submit(RelayRequest {
                sender: "cosmos1alice".into(),
                msg: RelayAction::CancelBet { bet_id: 2 },
            })
            .await
            .unwrap();
        assert!(resp.success);
        assert_eq!(chain.bet(2).unwrap().status, ChainBetStatus::Canceled);
        assert!(chain.get_tx(resp.tx_hash.as_deref().unwrap()).await.unwrap().is_some());
    }
}
