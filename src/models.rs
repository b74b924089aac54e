//! Wager data model
//!
//! The ledger's view of a coin-flip wager, the pending secret that backs
//! automatic reveal, and the descriptors handed to the engine when a
//! user-initiated transaction has been broadcast.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Domain separator the contract prepends before hashing a commitment
pub const COMMITMENT_DOMAIN: &[u8] = b"coinflip_v1";

// ============================================================================
// WAGER STATUS
// ============================================================================

/// Ledger status of a wager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WagerStatus {
    /// Create broadcast, chain id not yet known
    Creating,
    /// On-chain and waiting for an acceptor
    Open,
    /// Accept broadcast, awaiting confirmation
    Accepting,
    /// Accept confirmed, awaiting reveal
    Accepted,
    /// Maker revealed, payout done
    Revealed,
    /// Cancel broadcast, awaiting confirmation
    Canceling,
    /// Canceled, maker stake released
    Canceled,
    /// Acceptor won by default after the reveal window lapsed
    TimeoutClaimed,
}

impl WagerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WagerStatus::Creating => "creating",
            WagerStatus::Open => "open",
            WagerStatus::Accepting => "accepting",
            WagerStatus::Accepted => "accepted",
            WagerStatus::Revealed => "revealed",
            WagerStatus::Canceling => "canceling",
            WagerStatus::Canceled => "canceled",
            WagerStatus::TimeoutClaimed => "timeout_claimed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WagerStatus::Canceled | WagerStatus::Revealed | WagerStatus::TimeoutClaimed
        )
    }

    /// Waiting on a broadcast transaction
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            WagerStatus::Creating | WagerStatus::Accepting | WagerStatus::Canceling
        )
    }

    /// Stable state a transitional status falls back to when its transaction fails
    pub fn stable_predecessor(&self) -> Option<WagerStatus> {
        match self {
            WagerStatus::Accepting | WagerStatus::Canceling => Some(WagerStatus::Open),
            _ => None,
        }
    }

    /// Whether participant stakes are expected to be locked in this status
    pub fn holds_locked_funds(&self) -> bool {
        matches!(
            self,
            WagerStatus::Open
                | WagerStatus::Accepting
                | WagerStatus::Accepted
                | WagerStatus::Canceling
        )
    }

    /// Legal edges of the wager state machine
    pub fn can_transition_to(&self, next: WagerStatus) -> bool {
        use WagerStatus::*;
        match (self, next) {
            (Creating, Open) | (Creating, Canceled) => true,
            (Open, Accepting) | (Open, Accepted) | (Open, Canceling) | (Open, Canceled) => true,
            // Chain may report a resolution the ledger never saw the accept for
            (Open, Revealed) | (Open, TimeoutClaimed) => true,
            (Accepting, Accepted) | (Accepting, Open) | (Accepting, Canceled) => true,
            (Accepting, Revealed) | (Accepting, TimeoutClaimed) => true,
            (Accepted, Revealed) | (Accepted, TimeoutClaimed) => true,
            (Canceling, Canceled) | (Canceling, Open) | (Canceling, Accepted) => true,
            (Canceling, Revealed) | (Canceling, TimeoutClaimed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SIDE
// ============================================================================

/// A coin side, used for the maker's hidden choice and the acceptor's guess
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Heads,
    Tails,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Heads => "heads",
            Side::Tails => "tails",
        }
    }

    /// Accepts both `heads` and the contract's Debug rendering `Heads`
    pub fn parse(value: &str) -> Option<Side> {
        match value.trim().to_ascii_lowercase().as_str() {
            "heads" => Some(Side::Heads),
            "tails" => Some(Side::Tails),
            _ => None,
        }
    }
}

/// Hex commitment the contract checks on reveal:
/// `SHA256("coinflip_v1" || maker_address || side || secret)`
pub fn compute_commitment(maker_address: &str, side: Side, secret: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(COMMITMENT_DOMAIN);
    hasher.update(maker_address.as_bytes());
    hasher.update(side.as_str().as_bytes());
    hasher.update(secret);
    hex::encode(hasher.finalize())
}

// ============================================================================
// WAGER
// ============================================================================

/// Ledger record of one wager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wager {
    /// Chain-assigned id; `None` only while `creating`
    pub id: Option<u64>,
    /// Lowercase hex commitment
    pub commitment: String,
    /// Stake per participant, in the token's base units
    pub amount: u128,
    pub maker_id: String,
    pub maker_address: String,
    pub acceptor_id: Option<String>,
    pub acceptor_address: Option<String>,
    pub acceptor_guess: Option<Side>,
    /// Maker's hidden choice, cleared once revealed
    pub maker_side: Option<Side>,
    /// Hex secret, cleared once revealed
    pub maker_secret: Option<String>,
    pub status: WagerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,

    // Resolution
    pub winner_id: Option<String>,
    pub payout_amount: Option<u128>,
    pub commission_paid: Option<u128>,
    pub reveal_side: Option<Side>,

    // Lifecycle transactions
    pub create_tx_hash: Option<String>,
    pub accept_tx_hash: Option<String>,
    pub cancel_tx_hash: Option<String>,
    pub reveal_tx_hash: Option<String>,
    pub claim_tx_hash: Option<String>,
}

impl Wager {
    /// A wager that exists only by commitment, before its create is confirmed
    pub fn provisional(
        commitment: &str,
        maker_id: &str,
        maker_address: &str,
        amount: u128,
        create_tx_hash: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            commitment: commitment.to_string(),
            amount,
            maker_id: maker_id.to_string(),
            maker_address: maker_address.to_string(),
            acceptor_id: None,
            acceptor_address: None,
            acceptor_guess: None,
            maker_side: None,
            maker_secret: None,
            status: WagerStatus::Creating,
            created_at: now,
            updated_at: now,
            accepted_at: None,
            winner_id: None,
            payout_amount: None,
            commission_paid: None,
            reveal_side: None,
            create_tx_hash: Some(create_tx_hash.to_string()),
            accept_tx_hash: None,
            cancel_tx_hash: None,
            reveal_tx_hash: None,
            claim_tx_hash: None,
        }
    }

    /// Maker side and secret both present
    pub fn has_secret(&self) -> bool {
        self.maker_side.is_some() && self.maker_secret.is_some()
    }

    /// Last moment the maker may reveal
    pub fn reveal_deadline(&self, reveal_timeout: std::time::Duration) -> Option<DateTime<Utc>> {
        let timeout = ChronoDuration::from_std(reveal_timeout).ok()?;
        self.accepted_at.map(|at| at + timeout)
    }

    /// Short label for log lines
    pub fn label(&self) -> String {
        match self.id {
            Some(id) => format!("bet #{}", id),
            None => format!("bet <{}>", short_commitment(&self.commitment)),
        }
    }
}

fn short_commitment(commitment: &str) -> &str {
    let end = commitment.len().min(12);
    &commitment[..end]
}

// ============================================================================
// PENDING SECRET
// ============================================================================

/// Maker secret written before the create broadcast, keyed by commitment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSecret {
    pub commitment: String,
    pub maker_address: String,
    pub side: Side,
    /// Hex encoded
    pub secret: String,
    pub created_at: DateTime<Utc>,
}

impl PendingSecret {
    pub fn new(commitment: &str, maker_address: &str, side: Side, secret: &str) -> Self {
        Self {
            commitment: commitment.to_string(),
            maker_address: maker_address.to_string(),
            side,
            secret: secret.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Recomputes the commitment for `maker_address` and compares
    pub fn matches(&self, maker_address: &str, commitment: &str) -> bool {
        match hex::decode(&self.secret) {
            Ok(secret) => {
                compute_commitment(maker_address, self.side, &secret)
                    .eq_ignore_ascii_case(commitment)
            }
            Err(_) => false,
        }
    }
}

// ============================================================================
// BROADCAST DESCRIPTORS
// ============================================================================

/// A create transaction the request surface has just broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBroadcast {
    pub tx_hash: String,
    pub commitment: String,
    pub maker_id: String,
    pub maker_address: String,
    pub amount: u128,
}

/// An accept transaction the request surface has just broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptBroadcast {
    pub tx_hash: String,
    pub wager_id: u64,
    pub acceptor_id: String,
    pub acceptor_address: String,
    pub guess: Side,
}

/// A cancel transaction broadcast by the maker or by the expiry sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelBroadcast {
    pub tx_hash: String,
    pub wager_id: u64,
    /// Sent by the expiry sweep; its failures are never announced to the maker
    #[serde(default)]
    pub expiry: bool,
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

/// Which user action a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WagerAction {
    Create,
    Accept,
    Cancel,
    Reveal,
    ClaimTimeout,
}

impl WagerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WagerAction::Create => "create",
            WagerAction::Accept => "accept",
            WagerAction::Cancel => "cancel",
            WagerAction::Reveal => "reveal",
            WagerAction::ClaimTimeout => "claim_timeout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Confirmed,
    Failed,
    Reverted,
    Accepted,
    Canceled,
    /// Resolved by reveal or by timeout claim; the payload status tells which
    Revealed,
}

/// Wager fields pushed to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WagerPayload {
    pub id: Option<u64>,
    pub commitment: String,
    pub status: WagerStatus,
    /// Decimal string, clients cannot hold u128
    pub amount: String,
    pub maker_id: String,
    pub acceptor_id: Option<String>,
    pub winner_id: Option<String>,
    pub payout_amount: Option<String>,
    pub reveal_side: Option<Side>,
}

impl From<&Wager> for WagerPayload {
    fn from(wager: &Wager) -> Self {
        Self {
            id: wager.id,
            commitment: wager.commitment.clone(),
            status: wager.status,
            amount: wager.amount.to_string(),
            maker_id: wager.maker_id.clone(),
            acceptor_id: wager.acceptor_id.clone(),
            winner_id: wager.winner_id.clone(),
            payout_amount: wager.payout_amount.map(|p| p.to_string()),
            reveal_side: wager.reveal_side,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WagerNotification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub action: WagerAction,
    pub wager: WagerPayload,
    /// Chain error text for failures
    pub reason: Option<String>,
    pub tx_hash: Option<String>,
    pub at: DateTime<Utc>,
}

impl WagerNotification {
    pub fn new(kind: NotificationKind, action: WagerAction, wager: &Wager) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            action,
            wager: WagerPayload::from(wager),
            reason: None,
            tx_hash: None,
            at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_tx_hash(mut self, tx_hash: impl Into<String>) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal_and_transitional() {
        assert!(WagerStatus::Canceled.is_terminal());
        assert!(WagerStatus::Revealed.is_terminal());
        assert!(WagerStatus::TimeoutClaimed.is_terminal());
        assert!(!WagerStatus::Accepted.is_terminal());

        assert!(WagerStatus::Accepting.is_transitional());
        assert!(WagerStatus::Canceling.is_transitional());
        assert!(!WagerStatus::Open.is_transitional());
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        let all = [
            WagerStatus::Creating,
            WagerStatus::Open,
            WagerStatus::Accepting,
            WagerStatus::Accepted,
            WagerStatus::Revealed,
            WagerStatus::Canceling,
            WagerStatus::Canceled,
            WagerStatus::TimeoutClaimed,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{} -> {} must be illegal", from, to);
            }
        }
    }

    #[test]
    fn test_stable_predecessor() {
        assert_eq!(WagerStatus::Accepting.stable_predecessor(), Some(WagerStatus::Open));
        assert_eq!(WagerStatus::Canceling.stable_predecessor(), Some(WagerStatus::Open));
        assert_eq!(WagerStatus::Accepted.stable_predecessor(), None);
    }

    #[test]
    fn test_locked_funds_follow_status() {
        assert!(WagerStatus::Open.holds_locked_funds());
        assert!(WagerStatus::Accepting.holds_locked_funds());
        assert!(WagerStatus::Accepted.holds_locked_funds());
        assert!(!WagerStatus::Revealed.holds_locked_funds());
        assert!(!WagerStatus::Canceled.holds_locked_funds());
    }

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&WagerStatus::TimeoutClaimed).unwrap();
        assert_eq!(json, "\"timeout_claimed\"");
        assert_eq!(WagerStatus::TimeoutClaimed.to_string(), "timeout_claimed");
    }

    #[test]
    fn test_side_parse() {
        assert_eq!(Side::parse("Heads"), Some(Side::Heads));
        assert_eq!(Side::parse("tails"), Some(Side::Tails));
        assert_eq!(Side::parse("edge"), None);
    }

    #[test]
    fn test_commitment_roundtrip_with_pending_secret() {
        let secret = [7u8; 32];
        let commitment = compute_commitment("cosmos1maker", Side::Heads, &secret);
        assert_eq!(commitment.len(), 64);

        let pending = PendingSecret::new(&commitment, "cosmos1maker", Side::Heads, &hex::encode(secret));
        assert!(pending.matches("cosmos1maker", &commitment));
        assert!(!pending.matches("cosmos1other", &commitment));

        let wrong_side = PendingSecret::new(&commitment, "cosmos1maker", Side::Tails, &hex::encode(secret));
        assert!(!wrong_side.matches("cosmos1maker", &commitment));
    }

    #[test]
    fn test_reveal_deadline() {
        let mut wager = Wager::provisional("ab", "u1", "addr1", 100, "H");
        assert!(wager.reveal_deadline(std::time::Duration::from_secs(300)).is_none());

        let accepted = Utc::now();
        wager.accepted_at = Some(accepted);
        let deadline = wager.reveal_deadline(std::time::Duration::from_secs(300)).unwrap();
        assert_eq!(deadline - accepted, ChronoDuration::seconds(300));
    }

    #[test]
    fn test_notification_payload() {
        let mut wager = Wager::provisional("abcdef0123456789", "u1", "addr1", 1_000_000, "H1");
        wager.id = Some(42);
        wager.status = WagerStatus::Open;

        let n = WagerNotification::new(NotificationKind::Confirmed, WagerAction::Create, &wager)
            .with_tx_hash("H1");
        assert_eq!(n.wager.id, Some(42));
        assert_eq!(n.wager.amount, "1000000");
        assert_eq!(n.tx_hash.as_deref(), Some("H1"));
        assert_eq!(wager.label(), "bet #42");
    }
}
