// ============================================================================
// RPC Module - chain reads and relayed writes
// ============================================================================
//
// Components:
//   - chain_client: LCD REST queries (tx lookup, contract smart queries)
//   - tx_poller: bounded, backing-off wait for tx inclusion
//   - relay_client: HTTP relay that signs and broadcasts on a user's behalf
//
// ============================================================================

pub mod chain_client;
pub mod relay_client;
pub mod tx_poller;

pub use chain_client::{
    all_open_bets, ChainBet, ChainBetStatus, ChainQuery, ContractConfig, LcdChainClient, TxEvent,
    TxResult,
};
pub use relay_client::HttpRelayClient;
pub use tx_poller::{poll_for_tx, PollConfig, PollOutcome};
