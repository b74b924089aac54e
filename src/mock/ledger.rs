//! In-memory wager ledger
//!
//! Applies the same compare-and-set rules a database-backed ledger would, so
//! repeated or concurrent reconciler calls see `None` instead of a second
//! transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::funds::InMemoryFundLocks;
use crate::error::LedgerError;
use crate::models::{Side, Wager, WagerAction, WagerStatus};
use crate::ports::{
    Acceptance, ConfirmedCreation, CreationOutcome, LedgerService, Resolution, Transition,
};

#[derive(Default)]
pub struct InMemoryLedger {
    wagers: Mutex<Vec<Wager>>,
    users: Mutex<HashMap<String, String>>,
    funds: Option<Arc<InMemoryFundLocks>>,
    resolve_calls: AtomicUsize,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolutions settle both stakes out of `funds`
    pub fn with_funds(funds: Arc<InMemoryFundLocks>) -> Self {
        Self { funds: Some(funds), ..Self::default() }
    }

    // ========================================================================
    // SEEDING & INSPECTION
    // ========================================================================

    pub fn register_user(&self, user_id: &str, address: &str) {
        self.users.lock().unwrap().insert(user_id.to_string(), address.to_string());
    }

    /// Replaces any record with the same id or commitment
    pub fn insert(&self, wager: Wager) {
        let mut wagers = self.wagers.lock().unwrap();
        wagers.retain(|w| {
            w.commitment != wager.commitment && (wager.id.is_none() || w.id != wager.id)
        });
        wagers.push(wager);
    }

    pub fn wager(&self, id: u64) -> Option<Wager> {
        self.wagers.lock().unwrap().iter().find(|w| w.id == Some(id)).cloned()
    }

    pub fn by_commitment(&self, commitment: &str) -> Option<Wager> {
        self.wagers
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.commitment.eq_ignore_ascii_case(commitment))
            .cloned()
    }

    pub fn attach_secret(&self, id: u64, side: Side, secret: &[u8]) {
        self.update(id, |w| {
            w.maker_side = Some(side);
            w.maker_secret = Some(hex::encode(secret));
        });
    }

    /// Direct edit without any status rules, e.g. to age a record
    pub fn update(&self, id: u64, f: impl FnOnce(&mut Wager)) {
        if let Some(w) = self.wagers.lock().unwrap().iter_mut().find(|w| w.id == Some(id)) {
            f(w);
        }
    }

    pub fn snapshot(&self) -> Vec<Wager> {
        self.wagers.lock().unwrap().clone()
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    /// Runs `f` on wager `id` under the lock. `f` returns whether it changed
    /// anything; only then is the transition reported.
    fn transition(
        &self,
        id: u64,
        f: impl FnOnce(&mut Wager) -> bool,
    ) -> Result<Option<Transition>, LedgerError> {
        let mut wagers = self.wagers.lock().unwrap();
        let wager = wagers
            .iter_mut()
            .find(|w| w.id == Some(id))
            .ok_or_else(|| LedgerError::NotFound(format!("bet #{}", id)))?;
        let before = wager.status;
        if !f(wager) {
            return Ok(None);
        }
        wager.updated_at = Utc::now();
        Ok(Some(Transition { before, wager: wager.clone() }))
    }

    fn filtered(&self, pred: impl Fn(&Wager) -> bool) -> Vec<Wager> {
        self.wagers
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.id.is_some() && pred(w))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LedgerService for InMemoryLedger {
    async fn get_wager(&self, id: u64) -> Result<Option<Wager>, LedgerError> {
        Ok(self.wager(id))
    }

    async fn find_by_commitment(&self, commitment: &str) -> Result<Option<Wager>, LedgerError> {
        Ok(self.by_commitment(commitment))
    }

    async fn confirm_creation(
        &self,
        creation: ConfirmedCreation,
    ) -> Result<CreationOutcome, LedgerError> {
        let mut wagers = self.wagers.lock().unwrap();
        let now = Utc::now();

        if let Some(existing) = wagers.iter_mut().find(|w| w.id == Some(creation.id)) {
            if !existing.has_secret() {
                if let Some((side, secret)) = creation.secret {
                    existing.maker_side = Some(side);
                    existing.maker_secret = Some(secret);
                    existing.updated_at = now;
                }
            }
            return Ok(CreationOutcome::AlreadyKnown(existing.clone()));
        }

        let position = wagers
            .iter()
            .position(|w| w.commitment.eq_ignore_ascii_case(&creation.commitment));
        let index = match position {
            Some(i) if wagers[i].status != WagerStatus::Creating => {
                return Ok(CreationOutcome::AlreadyKnown(wagers[i].clone()));
            }
            Some(i) => i,
            None => {
                let tx = creation.create_tx_hash.clone().unwrap_or_default();
                let mut fresh = Wager::provisional(
                    &creation.commitment,
                    &creation.maker_id,
                    &creation.maker_address,
                    creation.amount,
                    &tx,
                );
                fresh.create_tx_hash = creation.create_tx_hash.clone();
                wagers.push(fresh);
                wagers.len() - 1
            }
        };
        let wager = &mut wagers[index];

        wager.id = Some(creation.id);
        wager.status = WagerStatus::Open;
        wager.amount = creation.amount;
        if let Some(tx) = creation.create_tx_hash {
            wager.create_tx_hash = Some(tx);
        }
        if let Some((side, secret)) = creation.secret {
            wager.maker_side = Some(side);
            wager.maker_secret = Some(secret);
        }
        if let Some(created_at) = creation.created_at {
            wager.created_at = created_at;
        }
        wager.updated_at = now;
        Ok(CreationOutcome::Confirmed(wager.clone()))
    }

    async fn abandon_creation(&self, commitment: &str) -> Result<Option<Transition>, LedgerError> {
        let mut wagers = self.wagers.lock().unwrap();
        let Some(wager) = wagers
            .iter_mut()
            .find(|w| w.commitment.eq_ignore_ascii_case(commitment))
        else {
            return Ok(None);
        };
        if wager.status != WagerStatus::Creating {
            return Ok(None);
        }
        wager.status = WagerStatus::Canceled;
        wager.maker_side = None;
        wager.maker_secret = None;
        wager.updated_at = Utc::now();
        Ok(Some(Transition { before: WagerStatus::Creating, wager: wager.clone() }))
    }

    async fn accept_wager(
        &self,
        id: u64,
        acceptance: Acceptance,
    ) -> Result<Option<Transition>, LedgerError> {
        self.transition(id, |w| {
            if !matches!(
                w.status,
                WagerStatus::Open | WagerStatus::Accepting | WagerStatus::Canceling
            ) {
                return false;
            }
            w.status = WagerStatus::Accepted;
            w.acceptor_id = Some(acceptance.acceptor_id);
            w.acceptor_address = Some(acceptance.acceptor_address);
            w.acceptor_guess = Some(acceptance.guess);
            w.accepted_at = Some(acceptance.accepted_at);
            if acceptance.tx_hash.is_some() {
                w.accept_tx_hash = acceptance.tx_hash;
            }
            true
        })
    }

    async fn cancel_wager(
        &self,
        id: u64,
        tx_hash: Option<String>,
    ) -> Result<Option<Transition>, LedgerError> {
        self.transition(id, |w| {
            if !w.status.can_transition_to(WagerStatus::Canceled) {
                return false;
            }
            w.status = WagerStatus::Canceled;
            if tx_hash.is_some() {
                w.cancel_tx_hash = tx_hash;
            }
            true
        })
    }

    async fn resolve_wager(
        &self,
        id: u64,
        resolution: Resolution,
    ) -> Result<Option<Transition>, LedgerError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let applied = self.transition(id, |w| {
            if !w.status.can_transition_to(resolution.status) {
                return false;
            }
            w.status = resolution.status;
            w.winner_id = Some(resolution.winner_id);
            w.payout_amount = resolution.payout_amount;
            w.commission_paid = resolution.commission_paid;
            w.reveal_side = resolution.reveal_side;
            w.maker_side = None;
            w.maker_secret = None;
            true
        })?;

        if let (Some(t), Some(funds)) = (&applied, &self.funds) {
            if t.before.holds_locked_funds() {
                funds.settle(&t.wager.maker_id, t.wager.amount);
                if let Some(acceptor) = &t.wager.acceptor_id {
                    funds.settle(acceptor, t.wager.amount);
                }
            }
        }
        Ok(applied)
    }

    async fn mark_status(
        &self,
        id: u64,
        from: WagerStatus,
        to: WagerStatus,
    ) -> Result<Option<Transition>, LedgerError> {
        self.transition(id, |w| {
            if w.status != from || !from.can_transition_to(to) {
                return false;
            }
            w.status = to;
            true
        })
    }

    async fn revert_wager(
        &self,
        id: u64,
        from: WagerStatus,
    ) -> Result<Option<Transition>, LedgerError> {
        let Some(to) = from.stable_predecessor() else {
            return Err(LedgerError::Conflict(format!("{} has no stable predecessor", from)));
        };
        self.transition(id, |w| {
            if w.status != from {
                return false;
            }
            w.status = to;
            if from == WagerStatus::Accepting {
                w.acceptor_id = None;
                w.acceptor_address = None;
                w.acceptor_guess = None;
                w.accepted_at = None;
                w.accept_tx_hash = None;
            }
            true
        })
    }

    async fn record_tx_hash(
        &self,
        id: u64,
        action: WagerAction,
        tx_hash: &str,
    ) -> Result<(), LedgerError> {
        let mut wagers = self.wagers.lock().unwrap();
        let wager = wagers
            .iter_mut()
            .find(|w| w.id == Some(id))
            .ok_or_else(|| LedgerError::NotFound(format!("bet #{}", id)))?;
        let slot = match action {
            WagerAction::Create => &mut wager.create_tx_hash,
            WagerAction::Accept => &mut wager.accept_tx_hash,
            WagerAction::Cancel => &mut wager.cancel_tx_hash,
            WagerAction::Reveal => &mut wager.reveal_tx_hash,
            WagerAction::ClaimTimeout => &mut wager.claim_tx_hash,
        };
        *slot = Some(tx_hash.to_string());
        wager.updated_at = Utc::now();
        Ok(())
    }

    async fn wagers_with_status(&self, status: WagerStatus) -> Result<Vec<Wager>, LedgerError> {
        Ok(self.filtered(|w| w.status == status))
    }

    async fn timed_out_candidates(
        &self,
        accepted_before: DateTime<Utc>,
    ) -> Result<Vec<Wager>, LedgerError> {
        Ok(self.filtered(|w| {
            w.status == WagerStatus::Accepted && w.accepted_at.map_or(false, |at| at < accepted_before)
        }))
    }

    async fn expired_candidates(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Wager>, LedgerError> {
        Ok(self.filtered(|w| w.status == WagerStatus::Open && w.created_at < created_before))
    }

    async fn stuck_candidates(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Wager>, LedgerError> {
        Ok(self.filtered(|w| {
            matches!(w.status, WagerStatus::Accepting | WagerStatus::Canceling)
                && w.updated_at < updated_before
        }))
    }

    async fn user_for_address(&self, address: &str) -> Result<Option<String>, LedgerError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|(_, addr)| addr.as_str() == address)
            .map(|(user, _)| user.clone()))
    }

    async fn address_for_user(&self, user_id: &str) -> Result<Option<String>, LedgerError> {
        Ok(self.users.lock().unwrap().get(user_id).cloned())
    }
}
