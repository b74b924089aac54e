/// Coin-flip wager reconciler
/// Keeps an off-chain wager ledger consistent with the on-chain coinflip contract

pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod mock;
pub mod models;
pub mod pending_secrets;
pub mod ports;
pub mod processing_lock;
pub mod recheck;
pub mod reveal;
pub mod scheduler;
pub mod sweeps;
pub mod sync;

#[path = "../rpc/mod.rs"]
pub mod rpc;

pub use config::ReconcilerConfig;
pub use engine::{Collaborators, Reconciler};
pub use error::{
    ChainError, FundLockError, LedgerError, ReconcilerError, RelayError, Result, SecretStoreError,
};
pub use lifecycle::{AcceptOutcome, CancelOutcome, CreateOutcome};
pub use models::{
    compute_commitment, AcceptBroadcast, CancelBroadcast, CreateBroadcast, NotificationKind,
    PendingSecret, Side, Wager, WagerAction, WagerNotification, WagerStatus,
};
pub use pending_secrets::SledPendingSecretStore;
pub use ports::{FundLockService, LedgerService, Notifier, PendingSecretStore, TxRelay};
pub use reveal::RevealOutcome;
pub use rpc::{ChainBet, ChainBetStatus, ChainQuery, HttpRelayClient, LcdChainClient, PollConfig};
pub use scheduler::{SweepScheduler, TickOutcome};
pub use sweeps::{SweepReport, SweepStats};
pub use sync::SyncOutcome;
