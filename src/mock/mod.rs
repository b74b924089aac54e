// ============================================================================
// In-memory collaborators
// ============================================================================
//
// Used by the test suites and by standalone mode (no chain or relay URL
// configured). `MockEnvironment` wires them to a `Reconciler` and offers
// shortcuts that put a wager into a given state the way the request surface
// would: record, stake lock and on-chain bet together.
//
// ============================================================================

pub mod chain;
pub mod funds;
pub mod ledger;
pub mod notifier;
pub mod relay;

pub use chain::MockChain;
pub use funds::InMemoryFundLocks;
pub use ledger::InMemoryLedger;
pub use notifier::{LogNotifier, RecordingNotifier};
pub use relay::MockRelay;

use std::sync::Arc;

use chrono::Utc;

use crate::config::ReconcilerConfig;
use crate::engine::{Collaborators, Reconciler};
use crate::models::{
    compute_commitment, AcceptBroadcast, CancelBroadcast, CreateBroadcast, PendingSecret, Side,
    Wager, WagerStatus,
};
use crate::pending_secrets::SledPendingSecretStore;
use crate::ports::PendingSecretStore;

/// Address the mock environment assigns to `user_id`
pub fn address_of(user_id: &str) -> String {
    format!("cosmos1{}", user_id)
}

pub struct MockEnvironment {
    pub chain: Arc<MockChain>,
    pub relay: Arc<MockRelay>,
    pub ledger: Arc<InMemoryLedger>,
    pub funds: Arc<InMemoryFundLocks>,
    pub notifier: Arc<RecordingNotifier>,
    pub secrets: Arc<SledPendingSecretStore>,
    pub reconciler: Reconciler,
}

impl Default for MockEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self::with_config(ReconcilerConfig::mock())
    }

    pub fn with_config(config: ReconcilerConfig) -> Self {
        let chain = Arc::new(MockChain::new());
        let relay = Arc::new(MockRelay::new(Some(chain.clone())));
        let funds = Arc::new(InMemoryFundLocks::new());
        let ledger = Arc::new(InMemoryLedger::with_funds(funds.clone()));
        let notifier = Arc::new(RecordingNotifier::new());
        let secrets = Arc::new(
            SledPendingSecretStore::temporary().expect("temporary sled store"),
        );

        let reconciler = Reconciler::new(
            Collaborators {
                chain: chain.clone(),
                relay: relay.clone(),
                ledger: ledger.clone(),
                funds: funds.clone(),
                notifier: notifier.clone(),
                secrets: secrets.clone(),
            },
            config,
        );

        Self { chain, relay, ledger, funds, notifier, secrets, reconciler }
    }

    pub fn seed_user(&self, user_id: &str, address: &str) {
        self.ledger.register_user(user_id, address);
    }

    // ========================================================================
    // STATE SHORTCUTS
    // ========================================================================

    /// Open on both sides, maker stake locked
    pub fn open_wager(&self, id: u64, maker: &str, amount: u128) -> Wager {
        let maker_address = address_of(maker);
        self.seed_user(maker, &maker_address);
        let commitment = compute_commitment(&maker_address, Side::Heads, &id.to_be_bytes());

        let mut bet = MockChain::open_bet(id, &maker_address, &commitment);
        bet.amount = amount;
        self.chain.insert_bet(bet);

        let mut wager = Wager::provisional(&commitment, maker, &maker_address, amount, &format!("HCREATE-{}", id));
        wager.id = Some(id);
        wager.status = WagerStatus::Open;
        self.ledger.insert(wager.clone());
        self.lock(maker, amount);
        wager
    }

    /// Accepted on both sides, both stakes locked
    pub fn accepted_wager(
        &self,
        id: u64,
        maker: &str,
        acceptor: &str,
        amount: u128,
        guess: Side,
    ) -> Wager {
        self.open_wager(id, maker, amount);
        let acceptor_address = address_of(acceptor);
        self.seed_user(acceptor, &acceptor_address);
        self.chain.accept_bet(id, &acceptor_address, guess);

        let now = Utc::now();
        self.ledger.update(id, |w| {
            w.status = WagerStatus::Accepted;
            w.acceptor_id = Some(acceptor.to_string());
            w.acceptor_address = Some(acceptor_address.clone());
            w.acceptor_guess = Some(guess);
            w.accepted_at = Some(now);
            w.updated_at = now;
        });
        self.lock(acceptor, amount);
        self.ledger.wager(id).expect("wager just inserted")
    }

    /// What the request surface does before broadcasting a create: persist
    /// the secret, lock the stake, bump the in-flight counter, write the
    /// provisional record.
    pub fn begin_create(
        &self,
        maker: &str,
        side: Side,
        secret: [u8; 32],
        amount: u128,
        tx_hash: &str,
    ) -> CreateBroadcast {
        let maker_address = address_of(maker);
        self.seed_user(maker, &maker_address);
        let commitment = compute_commitment(&maker_address, side, &secret);

        self.secrets
            .put(&PendingSecret::new(&commitment, &maker_address, side, &hex::encode(secret)))
            .expect("pending secret write");
        self.lock(maker, amount);
        self.funds.begin_inflight_create(maker);
        self.ledger.insert(Wager::provisional(&commitment, maker, &maker_address, amount, tx_hash));

        CreateBroadcast {
            tx_hash: tx_hash.to_string(),
            commitment,
            maker_id: maker.to_string(),
            maker_address,
            amount,
        }
    }

    /// Ledger in `accepting`, acceptor stake locked
    pub fn begin_accept(&self, id: u64, acceptor: &str, guess: Side, tx_hash: &str) -> AcceptBroadcast {
        let acceptor_address = address_of(acceptor);
        self.seed_user(acceptor, &acceptor_address);

        let now = Utc::now();
        let mut amount = 0;
        self.ledger.update(id, |w| {
            amount = w.amount;
            w.status = WagerStatus::Accepting;
            w.acceptor_id = Some(acceptor.to_string());
            w.acceptor_address = Some(acceptor_address.clone());
            w.acceptor_guess = Some(guess);
            w.accept_tx_hash = Some(tx_hash.to_string());
            w.updated_at = now;
        });
        self.lock(acceptor, amount);

        AcceptBroadcast {
            tx_hash: tx_hash.to_string(),
            wager_id: id,
            acceptor_id: acceptor.to_string(),
            acceptor_address,
            guess,
        }
    }

    /// Ledger in `canceling`
    pub fn begin_cancel(&self, id: u64, tx_hash: &str) -> CancelBroadcast {
        let now = Utc::now();
        self.ledger.update(id, |w| {
            w.status = WagerStatus::Canceling;
            w.cancel_tx_hash = Some(tx_hash.to_string());
            w.updated_at = now;
        });
        CancelBroadcast { tx_hash: tx_hash.to_string(), wager_id: id, expiry: false }
    }

    fn lock(&self, user_id: &str, amount: u128) {
        let current = self.funds.locked(user_id);
        self.funds.set_locked(user_id, current + amount);
    }
}
