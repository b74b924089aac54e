// ============================================================================
// Collaborator Ports
// ============================================================================
//
// The engine only ever talks to the outside through these traits:
//
//   LedgerService       - wager records (the durable shared state)
//   FundLockService     - per-participant locked balances
//   TxRelay             - broadcasts reveal / claim-timeout / cancel
//   Notifier            - fire-and-forget client events
//   PendingSecretStore  - maker secrets keyed by commitment
//
// The engine depends on these; none of them depend on the engine.
//
// ============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FundLockError, LedgerError, RelayError, SecretStoreError};
use crate::models::{PendingSecret, Side, Wager, WagerAction, WagerNotification, WagerStatus};

// ============================================================================
// LEDGER
// ============================================================================

/// A status change the ledger actually applied.
///
/// Mutations return `None` when the wager was already past the requested
/// state; callers release funds and notify only on `Some`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub before: WagerStatus,
    pub wager: Wager,
}

impl Transition {
    pub fn after(&self) -> WagerStatus {
        self.wager.status
    }
}

/// Chain-confirmed wager data used to create or complete a ledger record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedCreation {
    pub id: u64,
    pub commitment: String,
    pub maker_id: String,
    pub maker_address: String,
    pub amount: u128,
    pub create_tx_hash: Option<String>,
    /// Side and hex secret when a verified pending secret was found
    pub secret: Option<(Side, String)>,
    /// Chain creation time for imports; `None` keeps the ledger's own
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreationOutcome {
    /// Record moved to `open` by this call
    Confirmed(Wager),
    /// Id already present; nothing changed
    AlreadyKnown(Wager),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acceptance {
    pub acceptor_id: String,
    pub acceptor_address: String,
    pub guess: Side,
    pub tx_hash: Option<String>,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// `Revealed` or `TimeoutClaimed`
    pub status: WagerStatus,
    pub winner_id: String,
    pub payout_amount: Option<u128>,
    pub commission_paid: Option<u128>,
    pub reveal_side: Option<Side>,
}

#[async_trait]
pub trait LedgerService: Send + Sync {
    async fn get_wager(&self, id: u64) -> Result<Option<Wager>, LedgerError>;

    async fn find_by_commitment(&self, commitment: &str) -> Result<Option<Wager>, LedgerError>;

    /// Upsert by commitment into `open`. Used by create confirmation and orphan import.
    async fn confirm_creation(
        &self,
        creation: ConfirmedCreation,
    ) -> Result<CreationOutcome, LedgerError>;

    /// `creating` -> `canceled` after the create transaction failed on-chain
    async fn abandon_creation(&self, commitment: &str) -> Result<Option<Transition>, LedgerError>;

    /// Moves `open`/`accepting`/`canceling` to `accepted`
    async fn accept_wager(
        &self,
        id: u64,
        acceptance: Acceptance,
    ) -> Result<Option<Transition>, LedgerError>;

    /// Any non-terminal status to `canceled`
    async fn cancel_wager(
        &self,
        id: u64,
        tx_hash: Option<String>,
    ) -> Result<Option<Transition>, LedgerError>;

    /// Any non-terminal status to `revealed` or `timeout_claimed`, with payout accounting
    async fn resolve_wager(
        &self,
        id: u64,
        resolution: Resolution,
    ) -> Result<Option<Transition>, LedgerError>;

    /// Compare-and-set on status
    async fn mark_status(
        &self,
        id: u64,
        from: WagerStatus,
        to: WagerStatus,
    ) -> Result<Option<Transition>, LedgerError>;

    /// Transitional `from` back to its stable predecessor. Clears the acceptor
    /// when reverting an accept.
    async fn revert_wager(
        &self,
        id: u64,
        from: WagerStatus,
    ) -> Result<Option<Transition>, LedgerError>;

    async fn record_tx_hash(
        &self,
        id: u64,
        action: WagerAction,
        tx_hash: &str,
    ) -> Result<(), LedgerError>;

    async fn wagers_with_status(&self, status: WagerStatus) -> Result<Vec<Wager>, LedgerError>;

    /// `accepted` wagers accepted before the cutoff
    async fn timed_out_candidates(
        &self,
        accepted_before: DateTime<Utc>,
    ) -> Result<Vec<Wager>, LedgerError>;

    /// `open` wagers created before the cutoff
    async fn expired_candidates(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Wager>, LedgerError>;

    /// `accepting`/`canceling` wagers not touched since the cutoff
    async fn stuck_candidates(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Wager>, LedgerError>;

    async fn user_for_address(&self, address: &str) -> Result<Option<String>, LedgerError>;

    async fn address_for_user(&self, user_id: &str) -> Result<Option<String>, LedgerError>;
}

// ============================================================================
// FUND LOCKS
// ============================================================================

#[async_trait]
pub trait FundLockService: Send + Sync {
    async fn lock(&self, user_id: &str, amount: u128) -> Result<(), FundLockError>;

    /// May be called on an already-unlocked balance; implementations report it
    /// as `NothingLocked` and the engine logs it.
    async fn unlock(&self, user_id: &str, amount: u128) -> Result<(), FundLockError>;

    /// Decrements the maker's in-flight create counter
    async fn end_inflight_create(&self, user_id: &str) -> Result<(), FundLockError>;
}

// ============================================================================
// TRANSACTION RELAY
// ============================================================================

/// Execute messages the relay signs and broadcasts, shaped like the contract's
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayAction {
    Reveal { bet_id: u64, side: Side, secret: String },
    ClaimTimeout { bet_id: u64 },
    CancelBet { bet_id: u64 },
}

impl RelayAction {
    pub fn bet_id(&self) -> u64 {
        match self {
            RelayAction::Reveal { bet_id, .. }
            | RelayAction::ClaimTimeout { bet_id }
            | RelayAction::CancelBet { bet_id } => *bet_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRequest {
    /// Address the transaction is signed for
    pub sender: String,
    pub msg: RelayAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResponse {
    pub success: bool,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub raw_log: Option<String>,
}

impl RelayResponse {
    pub fn ok(tx_hash: impl Into<String>) -> Self {
        Self { success: true, tx_hash: Some(tx_hash.into()), raw_log: None }
    }

    pub fn rejected(raw_log: impl Into<String>) -> Self {
        Self { success: false, tx_hash: None, raw_log: Some(raw_log.into()) }
    }

    pub fn error_text(&self) -> &str {
        self.raw_log.as_deref().unwrap_or("relay rejected the transaction")
    }
}

#[async_trait]
pub trait TxRelay: Send + Sync {
    async fn is_ready(&self) -> bool;

    async fn submit(&self, request: RelayRequest) -> Result<RelayResponse, RelayError>;
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Fire and forget
    async fn notify(&self, notification: WagerNotification);
}

// ============================================================================
// PENDING SECRETS
// ============================================================================

pub trait PendingSecretStore: Send + Sync {
    fn put(&self, secret: &PendingSecret) -> Result<(), SecretStoreError>;

    fn get(&self, commitment: &str) -> Result<Option<PendingSecret>, SecretStoreError>;

    fn delete(&self, commitment: &str) -> Result<(), SecretStoreError>;

    /// Removes records created before the cutoff; returns how many
    fn cleanup_stale(&self, older_than: DateTime<Utc>) -> Result<usize, SecretStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_action_json_matches_contract() {
        let reveal = RelayAction::Reveal { bet_id: 42, side: Side::Heads, secret: "ab".into() };
        assert_eq!(
            serde_json::to_value(&reveal).unwrap(),
            serde_json::json!({"reveal": {"bet_id": 42, "side": "heads", "secret": "ab"}})
        );

        let cancel = RelayAction::CancelBet { bet_id: 3 };
        assert_eq!(
            serde_json::to_value(&cancel).unwrap(),
            serde_json::json!({"cancel_bet": {"bet_id": 3}})
        );
    }

    #[test]
    fn test_relay_response_camel_case() {
        let resp: RelayResponse =
            serde_json::from_str(r#"{"success":false,"rawLog":"Bet not found: 9"}"#).unwrap();
        assert!(!resp.success);
        assert_eq!(resp.tx_hash, None);
        assert_eq!(resp.error_text(), "Bet not found: 9");
    }
}
