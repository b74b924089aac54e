//! In-memory fund locks with call recording

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::FundLockError;
use crate::ports::FundLockService;

#[derive(Default)]
pub struct InMemoryFundLocks {
    locked: Mutex<HashMap<String, u128>>,
    inflight: Mutex<HashMap<String, u32>>,
    unlock_calls: Mutex<Vec<(String, u128)>>,
}

impl InMemoryFundLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locked(&self, user_id: &str) -> u128 {
        self.locked.lock().unwrap().get(user_id).copied().unwrap_or(0)
    }

    pub fn set_locked(&self, user_id: &str, amount: u128) {
        self.locked.lock().unwrap().insert(user_id.to_string(), amount);
    }

    pub fn inflight(&self, user_id: &str) -> u32 {
        self.inflight.lock().unwrap().get(user_id).copied().unwrap_or(0)
    }

    /// What the request surface does before broadcasting a create
    pub fn begin_inflight_create(&self, user_id: &str) {
        *self.inflight.lock().unwrap().entry(user_id.to_string()).or_insert(0) += 1;
    }

    /// Every `unlock` call, successful or not
    pub fn unlock_calls(&self) -> Vec<(String, u128)> {
        self.unlock_calls.lock().unwrap().clone()
    }

    /// Stake leaves the lock because the ledger paid it out; not an unlock
    pub fn settle(&self, user_id: &str, amount: u128) {
        let mut locked = self.locked.lock().unwrap();
        if let Some(balance) = locked.get_mut(user_id) {
            *balance = balance.saturating_sub(amount);
        }
    }

    pub fn total_locked(&self) -> u128 {
        self.locked.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl FundLockService for InMemoryFundLocks {
    async fn lock(&self, user_id: &str, amount: u128) -> Result<(), FundLockError> {
        *self.locked.lock().unwrap().entry(user_id.to_string()).or_insert(0) += amount;
        Ok(())
    }

    async fn unlock(&self, user_id: &str, amount: u128) -> Result<(), FundLockError> {
        self.unlock_calls.lock().unwrap().push((user_id.to_string(), amount));
        let mut locked = self.locked.lock().unwrap();
        match locked.get_mut(user_id) {
            Some(balance) if *balance >= amount => {
                *balance -= amount;
                Ok(())
            }
            _ => Err(FundLockError::NothingLocked { user_id: user_id.to_string() }),
        }
    }

    async fn end_inflight_create(&self, user_id: &str) -> Result<(), FundLockError> {
        let mut inflight = self.inflight.lock().unwrap();
        if let Some(count) = inflight.get_mut(user_id) {
            *count = count.saturating_sub(1);
        }
        Ok(())
    }
}
