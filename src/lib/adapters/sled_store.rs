use std::fs;
use std::path::Path;

use alloy::primitives::B256;
use sled::{Db, Tree};

use crate::domain::nullifier::NullifierKey;
use crate::ports::store::{CooldownStore, StoreError, TreeStore};

const COOLDOWN_TREE: &str = "cooldowns";

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// sled-backed store.
///
/// Layout:
/// - `cooldowns`: `chain_id || nullifier` -> expiry millis (u64 BE)
/// - `leaves/<chain_id>`: leaf index (u64 BE) -> commitment
/// - `flagged/<chain_id>`: key -> value
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    cooldowns: Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Backend(format!("create {}: {e}", parent.display()))
                })?;
            }
        }
        Self::from_db(sled::open(path)?)
    }

    /// Store that is deleted when dropped.
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        let cooldowns = db.open_tree(COOLDOWN_TREE)?;
        Ok(Self { db, cooldowns })
    }

    fn leaves_tree(&self, chain_id: u64) -> Result<Tree, StoreError> {
        Ok(self.db.open_tree(format!("leaves/{chain_id}"))?)
    }

    fn flagged_tree(&self, chain_id: u64) -> Result<Tree, StoreError> {
        Ok(self.db.open_tree(format!("flagged/{chain_id}"))?)
    }
}

fn decode_u64(bytes: &[u8]) -> Result<u64, StoreError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("expected 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}

fn decode_b256(bytes: &[u8]) -> Result<B256, StoreError> {
    if bytes.len() != 32 {
        return Err(StoreError::Corrupt(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(bytes))
}

impl CooldownStore for SledStore {
    fn cooldown_until(&self, key: &NullifierKey) -> Result<Option<u64>, StoreError> {
        self.cooldowns
            .get(key.storage_key())?
            .map(|v| decode_u64(&v))
            .transpose()
    }

    fn set_cooldown(&self, key: &NullifierKey, until_ms: u64) -> Result<(), StoreError> {
        self.cooldowns
            .insert(key.storage_key(), &until_ms.to_be_bytes()[..])?;
        Ok(())
    }

    fn purge_expired(&self, now_ms: u64) -> Result<usize, StoreError> {
        let mut removed = 0;
        for entry in self.cooldowns.iter() {
            let (key, value) = entry?;
            if decode_u64(&value)? <= now_ms {
                self.cooldowns.remove(key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl TreeStore for SledStore {
    fn load_leaves(&self, chain_id: u64) -> Result<Vec<B256>, StoreError> {
        let tree = self.leaves_tree(chain_id)?;
        let mut leaves = Vec::with_capacity(tree.len());
        for entry in tree.iter() {
            let (key, value) = entry?;
            let index = decode_u64(&key)?;
            if index != leaves.len() as u64 {
                return Err(StoreError::Gap {
                    expected: leaves.len() as u64,
                    got: index,
                });
            }
            leaves.push(decode_b256(&value)?);
        }
        Ok(leaves)
    }

    fn put_leaves(&self, chain_id: u64, start: u64, leaves: &[B256]) -> Result<(), StoreError> {
        let tree = self.leaves_tree(chain_id)?;
        let len = tree.len() as u64;
        if start > len {
            return Err(StoreError::Gap {
                expected: len,
                got: start,
            });
        }
        for (offset, leaf) in leaves.iter().enumerate() {
            let index = start + offset as u64;
            match tree.get(index.to_be_bytes())? {
                Some(stored) if stored.as_ref() != leaf.as_slice() => {
                    return Err(StoreError::Corrupt(format!(
                        "chain {chain_id} leaf {index}: stored {}, got {leaf}",
                        decode_b256(&stored)?
                    )));
                }
                Some(_) => {}
                None => {
                    tree.insert(index.to_be_bytes(), leaf.as_slice())?;
                }
            }
        }
        tree.flush()?;
        Ok(())
    }

    fn leaf_count(&self, chain_id: u64) -> Result<u64, StoreError> {
        Ok(self.leaves_tree(chain_id)?.len() as u64)
    }

    fn load_flagged(&self, chain_id: u64) -> Result<Vec<(B256, B256)>, StoreError> {
        self.flagged_tree(chain_id)?
            .iter()
            .map(|entry| {
                let (key, value) = entry?;
                Ok((decode_b256(&key)?, decode_b256(&value)?))
            })
            .collect()
    }

    fn put_flagged(&self, chain_id: u64, key: B256, value: B256) -> Result<(), StoreError> {
        let tree = self.flagged_tree(chain_id)?;
        tree.insert(key.as_slice(), value.as_slice())?;
        tree.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::nullifier::Nullifier;

    #[test]
    fn test_leaves_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relayer.db");
        let leaves = [B256::repeat_byte(1), B256::repeat_byte(2), B256::repeat_byte(3)];
        {
            let store = SledStore::open(&path).unwrap();
            store.put_leaves(11_155_111, 0, &leaves[..2]).unwrap();
            store.put_leaves(11_155_111, 2, &leaves[2..]).unwrap();
        }
        let store = SledStore::open(&path).unwrap();
        assert_eq!(store.load_leaves(11_155_111).unwrap(), leaves.to_vec());
        assert_eq!(store.leaf_count(11_155_111).unwrap(), 3);
    }

    #[test]
    fn test_cooldowns_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relayer.db");
        let key = NullifierKey::new(1, Nullifier(B256::repeat_byte(0xab)));
        {
            let store = SledStore::open(&path).unwrap();
            store.set_cooldown(&key, 42_000).unwrap();
            store.db.flush().unwrap();
        }
        let store = SledStore::open(&path).unwrap();
        assert_eq!(store.cooldown_until(&key).unwrap(), Some(42_000));
        assert_eq!(store.purge_expired(42_000).unwrap(), 1);
        assert_eq!(store.cooldown_until(&key).unwrap(), None);
    }

    #[test]
    fn test_conflicting_leaf_is_rejected_and_kept() {
        let store = SledStore::temporary().unwrap();
        store.put_leaves(1, 0, &[B256::repeat_byte(1)]).unwrap();
        assert!(matches!(
            store.put_leaves(1, 0, &[B256::repeat_byte(2)]),
            Err(StoreError::Corrupt(_))
        ));
        assert_eq!(store.load_leaves(1).unwrap(), vec![B256::repeat_byte(1)]);
        assert!(matches!(
            store.put_leaves(1, 5, &[B256::repeat_byte(2)]),
            Err(StoreError::Gap { expected: 1, got: 5 })
        ));
    }

    #[test]
    fn test_flagged_round_trip() {
        let store = SledStore::temporary().unwrap();
        let one = B256::with_last_byte(1);
        store.put_flagged(5, B256::repeat_byte(7), one).unwrap();
        store.put_flagged(5, B256::repeat_byte(7), one).unwrap();
        assert_eq!(
            store.load_flagged(5).unwrap(),
            vec![(B256::repeat_byte(7), one)]
        );
    }
}
