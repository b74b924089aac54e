//! Lifecycle Confirmation Tasks
//!
//! One task per user action, spawned right after its transaction is
//! broadcast. Each polls for inclusion and then either applies the intended
//! ledger change, compensates for an on-chain rejection, or hands the wager
//! to a delayed re-check when the transaction never showed up.

mod accept;
mod cancel;
mod create;

pub use accept::AcceptOutcome;
pub use cancel::CancelOutcome;
pub use create::CreateOutcome;

/// First characters of a commitment, for span and log fields
pub(crate) fn short(commitment: &str) -> &str {
    commitment.get(..12).unwrap_or(commitment)
}
