// ============================================================================
// Error types for the reconciliation engine
// ============================================================================
//
// Every background operation reports through these. Nothing here is ever
// surfaced to a user directly; tasks log the error with wager context and
// leave the wager for the next sweep.
//
// ============================================================================

use thiserror::Error;

/// Failures talking to the chain's REST interface.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// Transport-level failure (connection refused, reset, DNS)
    #[error("chain request failed: {0}")]
    RequestFailed(String),

    /// Non-success HTTP status that is not a plain "not found"
    #[error("chain returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body did not decode into the expected shape
    #[error("invalid chain response: {0}")]
    InvalidResponse(String),

    /// Single query exceeded its own timeout
    #[error("chain query timed out")]
    Timeout,

    /// Caller misuse (empty hash, zero deadline, ...)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Failures reported by the ledger collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("wager not found: {0}")]
    NotFound(String),

    #[error("ledger conflict: {0}")]
    Conflict(String),

    #[error("ledger backend error: {0}")]
    Backend(String),
}

/// Failures reported by the fund-lock collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FundLockError {
    #[error("no locked balance for {user_id}")]
    NothingLocked { user_id: String },

    #[error("fund-lock backend error: {0}")]
    Backend(String),
}

/// Failures reported by the transaction relay.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("relay is not ready")]
    NotReady,

    #[error("relay request failed: {0}")]
    RequestFailed(String),

    #[error("invalid relay response: {0}")]
    InvalidResponse(String),
}

/// Failures in the pending-secret store.
#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("secret storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("secret encoding error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Top-level error for engine operations.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    FundLock(#[from] FundLockError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    SecretStore(#[from] SecretStoreError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ReconcilerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_error_display() {
        let err = ChainError::Status { status: 502, body: "bad gateway".into() };
        assert_eq!(err.to_string(), "chain returned status 502: bad gateway");
        assert_eq!(ChainError::Timeout.to_string(), "chain query timed out");
    }

    #[test]
    fn test_reconciler_error_is_transparent() {
        let err: ReconcilerError = LedgerError::NotFound("bet 7".into()).into();
        assert_eq!(err.to_string(), "wager not found: bet 7");

        let err: ReconcilerError = RelayError::NotReady.into();
        assert!(matches!(err, ReconcilerError::Relay(RelayError::NotReady)));
    }
}
