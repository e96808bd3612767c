use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use alloy::primitives::B256;

use crate::domain::nullifier::NullifierKey;
use crate::ports::store::{CooldownStore, StoreError, TreeStore};

#[derive(Default)]
struct Inner {
    cooldowns: HashMap<NullifierKey, u64>,
    leaves: HashMap<u64, Vec<B256>>,
    flagged: HashMap<u64, BTreeMap<B256, B256>>,
}

/// In-memory store. Everything is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store poisoned".into()))
    }
}

impl CooldownStore for MemoryStore {
    fn cooldown_until(&self, key: &NullifierKey) -> Result<Option<u64>, StoreError> {
        Ok(self.lock()?.cooldowns.get(key).copied())
    }

    fn set_cooldown(&self, key: &NullifierKey, until_ms: u64) -> Result<(), StoreError> {
        self.lock()?.cooldowns.insert(*key, until_ms);
        Ok(())
    }

    fn purge_expired(&self, now_ms: u64) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.cooldowns.len();
        inner.cooldowns.retain(|_, until| *until > now_ms);
        Ok(before - inner.cooldowns.len())
    }
}

impl TreeStore for MemoryStore {
    fn load_leaves(&self, chain_id: u64) -> Result<Vec<B256>, StoreError> {
        Ok(self.lock()?.leaves.get(&chain_id).cloned().unwrap_or_default())
    }

    fn put_leaves(&self, chain_id: u64, start: u64, leaves: &[B256]) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let log = inner.leaves.entry(chain_id).or_default();
        if start > log.len() as u64 {
            return Err(StoreError::Gap {
                expected: log.len() as u64,
                got: start,
            });
        }
        for (offset, leaf) in leaves.iter().enumerate() {
            let pos = start as usize + offset;
            match log.get(pos) {
                Some(existing) if existing != leaf => {
                    return Err(StoreError::Corrupt(format!(
                        "chain {chain_id} leaf {pos}: stored {existing}, got {leaf}"
                    )));
                }
                Some(_) => {}
                None => log.push(*leaf),
            }
        }
        Ok(())
    }

    fn leaf_count(&self, chain_id: u64) -> Result<u64, StoreError> {
        Ok(self.lock()?.leaves.get(&chain_id).map_or(0, |l| l.len() as u64))
    }

    fn load_flagged(&self, chain_id: u64) -> Result<Vec<(B256, B256)>, StoreError> {
        Ok(self
            .lock()?
            .flagged
            .get(&chain_id)
            .map(|m| m.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default())
    }

    fn put_flagged(&self, chain_id: u64, key: B256, value: B256) -> Result<(), StoreError> {
        self.lock()?.flagged.entry(chain_id).or_default().insert(key, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::nullifier::Nullifier;

    fn key(byte: u8) -> NullifierKey {
        NullifierKey::new(1, Nullifier(B256::repeat_byte(byte)))
    }

    #[test]
    fn test_cooldown_set_and_get() {
        let store = MemoryStore::new();
        assert_eq!(store.cooldown_until(&key(1)).unwrap(), None);
        store.set_cooldown(&key(1), 5_000).unwrap();
        assert_eq!(store.cooldown_until(&key(1)).unwrap(), Some(5_000));
    }

    #[test]
    fn test_purge_expired() {
        let store = MemoryStore::new();
        store.set_cooldown(&key(1), 1_000).unwrap();
        store.set_cooldown(&key(2), 2_000).unwrap();
        assert_eq!(store.purge_expired(1_000).unwrap(), 1);
        assert_eq!(store.cooldown_until(&key(1)).unwrap(), None);
        assert_eq!(store.cooldown_until(&key(2)).unwrap(), Some(2_000));
    }

    #[test]
    fn test_leaf_log_is_idempotent() {
        let store = MemoryStore::new();
        let leaves = [B256::repeat_byte(1), B256::repeat_byte(2)];
        store.put_leaves(7, 0, &leaves).unwrap();
        store.put_leaves(7, 1, &leaves[1..]).unwrap();
        assert_eq!(store.load_leaves(7).unwrap(), leaves.to_vec());
        assert_eq!(store.leaf_count(7).unwrap(), 2);
        assert_eq!(store.leaf_count(8).unwrap(), 0);
    }

    #[test]
    fn test_leaf_log_rejects_gap_and_conflict() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.put_leaves(7, 1, &[B256::repeat_byte(1)]),
            Err(StoreError::Gap { expected: 0, got: 1 })
        ));
        store.put_leaves(7, 0, &[B256::repeat_byte(1)]).unwrap();
        assert!(matches!(
            store.put_leaves(7, 0, &[B256::repeat_byte(9)]),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_flagged_scoped_per_chain() {
        let store = MemoryStore::new();
        store.put_flagged(1, B256::repeat_byte(3), B256::with_last_byte(1)).unwrap();
        assert_eq!(store.load_flagged(1).unwrap().len(), 1);
        assert!(store.load_flagged(2).unwrap().is_empty());
    }
}
