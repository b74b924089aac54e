// ============================================================================
// Pending-secret store (sled)
// ============================================================================
//
// Maker secrets are written here before the create is broadcast so that they
// survive a crash of the task that would attach them. Keyed by hex
// commitment, bincode-encoded values.
//
// ============================================================================

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::SecretStoreError;
use crate::models::PendingSecret;
use crate::ports::PendingSecretStore;

const TREE_NAME: &str = "pending_secrets";

pub struct SledPendingSecretStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledPendingSecretStore {
    pub fn open(path: &str) -> Result<Self, SecretStoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory store removed on drop
    pub fn temporary() -> Result<Self, SecretStoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self, SecretStoreError> {
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self { db, tree })
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn flush(&self) -> Result<(), SecretStoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl PendingSecretStore for SledPendingSecretStore {
    fn put(&self, secret: &PendingSecret) -> Result<(), SecretStoreError> {
        let bytes = bincode::serialize(secret)?;
        self.tree.insert(secret.commitment.as_bytes(), bytes)?;
        Ok(())
    }

    fn get(&self, commitment: &str) -> Result<Option<PendingSecret>, SecretStoreError> {
        match self.tree.get(commitment.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, commitment: &str) -> Result<(), SecretStoreError> {
        self.tree.remove(commitment.as_bytes())?;
        Ok(())
    }

    fn cleanup_stale(&self, older_than: DateTime<Utc>) -> Result<usize, SecretStoreError> {
        let mut removed = 0;
        for entry in self.tree.iter() {
            let (key, bytes) = entry?;
            let stale = match bincode::deserialize::<PendingSecret>(&bytes) {
                Ok(secret) => secret.created_at < older_than,
                Err(e) => {
                    warn!(error = %e, "undecodable pending secret dropped");
                    true
                }
            };
            if stale {
                self.tree.remove(key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{compute_commitment, Side};
    use chrono::Duration;

    fn secret(maker: &str, seed: u8) -> PendingSecret {
        let bytes = [seed; 32];
        let commitment = compute_commitment(maker, Side::Heads, &bytes);
        PendingSecret::new(&commitment, maker, Side::Heads, &hex::encode(bytes))
    }

    #[test]
    fn test_put_get_delete() {
        let store = SledPendingSecretStore::temporary().unwrap();
        let s = secret("cosmos1alice", 1);

        store.put(&s).unwrap();
        assert_eq!(store.get(&s.commitment).unwrap(), Some(s.clone()));

        store.delete(&s.commitment).unwrap();
        assert_eq!(store.get(&s.commitment).unwrap(), None);
        // Deleting twice is fine
        store.delete(&s.commitment).unwrap();
    }

    #[test]
    fn test_cleanup_stale_keeps_fresh() {
        let store = SledPendingSecretStore::temporary().unwrap();
        let mut old = secret("cosmos1alice", 1);
        old.created_at = Utc::now() - Duration::hours(2);
        let fresh = secret("cosmos1alice", 2);
        store.put(&old).unwrap();
        store.put(&fresh).unwrap();

        let removed = store.cleanup_stale(Utc::now() - Duration::hours(1)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert!(store.get(&fresh.commitment).unwrap().is_some());
    }
}
