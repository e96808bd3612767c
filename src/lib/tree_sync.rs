//! Mirrors each chain's deposit queue into a local commitment tree and keeps
//! the contract's root current.
//!
//! Deposits are read by queue position starting at the local fill level, so a
//! sync never rescans from genesis. Inserts for one chain are serialized by a
//! per-chain mutex; readers take a snapshot through the tree's `RwLock`.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::B256;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::TreeConfig;
use crate::domain::merkle::{MerkleTree, MerkleWitness};
use crate::error::RelayerError;
use crate::ports::chain::{ChainError, ChainPort};
use crate::ports::hasher::FieldHasher;
use crate::ports::store::TreeStore;
use crate::retry::RetryPolicy;

struct ChainTree {
    tree: RwLock<MerkleTree>,
    sync: Mutex<()>,
}

/// What one sync pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub root: B256,
    pub inserted: u64,
    pub leaf_count: u64,
    pub root_posted: bool,
}

pub struct TreeSync<C: ChainPort> {
    chains: HashMap<u64, Arc<C>>,
    trees: HashMap<u64, ChainTree>,
    store: Arc<dyn TreeStore>,
    retry: RetryPolicy,
    batch_size: u64,
}

impl<C: ChainPort> TreeSync<C> {
    /// Build one tree per chain, replaying any leaves already in `store`.
    pub fn new(
        chains: HashMap<u64, Arc<C>>,
        store: Arc<dyn TreeStore>,
        hasher: Arc<dyn FieldHasher>,
        config: &TreeConfig,
        retry: RetryPolicy,
    ) -> Result<Self, RelayerError> {
        let mut trees = HashMap::with_capacity(chains.len());
        for chain_id in chains.keys() {
            let leaves = store.load_leaves(*chain_id)?;
            let tree =
                MerkleTree::from_leaves(config.depth, config.root_history, hasher.clone(), &leaves)?;
            info!(chain_id, leaves = leaves.len(), root = %tree.root(), "restored commitment tree");
            trees.insert(
                *chain_id,
                ChainTree {
                    tree: RwLock::new(tree),
                    sync: Mutex::new(()),
                },
            );
        }
        Ok(Self {
            chains,
            trees,
            store,
            retry,
            batch_size: config.sync_batch_size.max(1),
        })
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.chains.keys().copied()
    }

    fn chain(&self, chain_id: u64) -> Result<(&C, &ChainTree), RelayerError> {
        match (self.chains.get(&chain_id), self.trees.get(&chain_id)) {
            (Some(chain), Some(tree)) => Ok((chain.as_ref(), tree)),
            _ => Err(RelayerError::UnknownChain(chain_id)),
        }
    }

    /// Pull new deposits, append them in queue order, and post the local root
    /// if the contract's latest root differs.
    ///
    /// A failed root post leaves the inserted leaves in place; the next call
    /// finds nothing new to insert and retries only the post.
    pub async fn sync_and_post_root(&self, chain_id: u64) -> Result<B256, RelayerError> {
        Ok(self.sync_chain(chain_id).await?.root)
    }

    pub async fn sync_chain(&self, chain_id: u64) -> Result<SyncReport, RelayerError> {
        let (chain, ct) = self.chain(chain_id)?;
        let _serialized = ct.sync.lock().await;

        self.persist_pending(chain_id, ct).await?;
        let inserted = self.pull_deposits(chain_id, chain, ct).await?;

        let (root, leaf_count) = {
            let tree = ct.tree.read().await;
            (tree.root(), tree.len())
        };

        let chain_root = self
            .retry
            .run("read last root", || chain.last_root(), ChainError::is_transient)
            .await?;
        let root_posted = if chain_root == root {
            debug!(chain_id, %root, "contract root up to date");
            false
        } else {
            let receipt = chain.update_root(root).await.map_err(|e| {
                warn!(chain_id, %root, error = %e, "root post failed, will retry on next sync");
                e
            })?;
            info!(chain_id, %root, tx = %receipt.tx_hash, leaf_count, "posted commitment root");
            true
        };

        Ok(SyncReport {
            root,
            inserted,
            leaf_count,
            root_posted,
        })
    }

    /// Write leaves inserted in memory but missing from the store (left over
    /// from a store failure on an earlier pass).
    async fn persist_pending(&self, chain_id: u64, ct: &ChainTree) -> Result<(), RelayerError> {
        let stored = self.store.leaf_count(chain_id)?;
        let tree = ct.tree.read().await;
        if stored < tree.len() {
            let pending = &tree.leaves()[stored as usize..];
            self.store.put_leaves(chain_id, stored, pending)?;
            debug!(chain_id, from = stored, count = pending.len(), "persisted pending leaves");
        }
        Ok(())
    }

    async fn pull_deposits(
        &self,
        chain_id: u64,
        chain: &C,
        ct: &ChainTree,
    ) -> Result<u64, RelayerError> {
        let on_chain = self
            .retry
            .run("read deposit count", || chain.deposit_count(), ChainError::is_transient)
            .await?;
        let mut cursor = ct.tree.read().await.len();
        if on_chain < cursor {
            return Err(RelayerError::Desync(format!(
                "chain {chain_id} reports {on_chain} deposits, local tree has {cursor}"
            )));
        }

        let start_len = cursor;
        while cursor < on_chain {
            let to = on_chain.min(cursor + self.batch_size);
            let records = self
                .retry
                .run("read deposits", || chain.deposits(cursor, to), ChainError::is_transient)
                .await?;

            let (from, appended, insert_result) = {
                let mut tree = ct.tree.write().await;
                let from = tree.len();
                let mut result = Ok(());
                for record in &records {
                    let len = tree.len();
                    if record.leaf_index < len {
                        if tree.leaf(record.leaf_index) != Some(record.commitment) {
                            result = Err(RelayerError::Desync(format!(
                                "chain {chain_id} leaf {} is {}, local tree has {:?}",
                                record.leaf_index,
                                record.commitment,
                                tree.leaf(record.leaf_index)
                            )));
                            break;
                        }
                    } else if record.leaf_index > len {
                        result = Err(RelayerError::Desync(format!(
                            "chain {chain_id} skipped from leaf {len} to {}",
                            record.leaf_index
                        )));
                        break;
                    } else if let Err(e) = tree.insert(record.commitment) {
                        result = Err(e.into());
                        break;
                    }
                }
                (from, tree.leaves()[from as usize..].to_vec(), result)
            };

            // Persist whatever made it in before surfacing an insert error.
            if !appended.is_empty() {
                self.store.put_leaves(chain_id, from, &appended)?;
            }
            insert_result?;

            let new_len = from + appended.len() as u64;
            if new_len == cursor {
                return Err(RelayerError::Desync(format!(
                    "chain {chain_id} returned no deposits for [{cursor}, {to})"
                )));
            }
            debug!(chain_id, from = cursor, to = new_len, "inserted deposits");
            cursor = new_len;
        }

        let inserted = cursor - start_len;
        if inserted > 0 {
            info!(chain_id, inserted, leaf_count = cursor, "commitment tree synced");
        }
        Ok(inserted)
    }

    /// Leaf index of `commitment` in the local tree.
    pub async fn get_deposit_leaf_index(
        &self,
        chain_id: u64,
        commitment: B256,
    ) -> Result<Option<u64>, RelayerError> {
        let (_, ct) = self.chain(chain_id)?;
        Ok(ct.tree.read().await.find_leaf_index(commitment))
    }

    pub async fn get_relayer_tree_root(&self, chain_id: u64) -> Result<B256, RelayerError> {
        let (_, ct) = self.chain(chain_id)?;
        Ok(ct.tree.read().await.root())
    }

    pub async fn leaf_count(&self, chain_id: u64) -> Result<u64, RelayerError> {
        let (_, ct) = self.chain(chain_id)?;
        Ok(ct.tree.read().await.len())
    }

    /// Inclusion witness for `commitment`, paired with the root it was taken at.
    pub async fn witness_for(
        &self,
        chain_id: u64,
        commitment: B256,
    ) -> Result<Option<MerkleWitness>, RelayerError> {
        let (_, ct) = self.chain(chain_id)?;
        let tree = ct.tree.read().await;
        tree.find_leaf_index(commitment)
            .map(|index| tree.witness(index))
            .transpose()
            .map_err(Into::into)
    }

    pub async fn witness(&self, chain_id: u64, leaf_index: u64) -> Result<MerkleWitness, RelayerError> {
        let (_, ct) = self.chain(chain_id)?;
        let witness = ct.tree.read().await.witness(leaf_index)?;
        Ok(witness)
    }

    /// Whether `root` is the local root or one of its recent predecessors.
    pub async fn is_local_root(&self, chain_id: u64, root: B256) -> Result<bool, RelayerError> {
        let (_, ct) = self.chain(chain_id)?;
        Ok(ct.tree.read().await.is_known_root(root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::MemoryStore;
    use crate::adapters::mock_chain::MockChain;
    use crate::crypto::field::u64_to_field;
    use crate::crypto::poseidon::PoseidonHasher;
    use crate::error::ErrorKind;

    const CHAIN: u64 = 11_155_111;

    struct TestFixture {
        chain: Arc<MockChain>,
        store: Arc<MemoryStore>,
        sync: TreeSync<MockChain>,
    }

    fn tree_config(depth: usize, batch: u64) -> TreeConfig {
        TreeConfig {
            depth,
            root_history: 10,
            smt_levels: 20,
            sync_batch_size: batch,
        }
    }

    fn build(chain: Arc<MockChain>, store: Arc<MemoryStore>, config: &TreeConfig) -> TreeSync<MockChain> {
        TreeSync::new(
            HashMap::from([(CHAIN, chain)]),
            store,
            Arc::new(PoseidonHasher),
            config,
            RetryPolicy::none(),
        )
        .unwrap()
    }

    fn setup(depth: usize, batch: u64) -> TestFixture {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryStore::new());
        let sync = build(chain.clone(), store.clone(), &tree_config(depth, batch));
        TestFixture { chain, store, sync }
    }

    fn commitments(values: &[u64]) -> Vec<B256> {
        values.iter().copied().map(u64_to_field).collect()
    }

    fn expected_root(depth: usize, values: &[u64]) -> B256 {
        MerkleTree::from_leaves(depth, 10, Arc::new(PoseidonHasher), &commitments(values))
            .unwrap()
            .root()
    }

    #[tokio::test]
    async fn test_sync_inserts_in_queue_order_and_posts_root() {
        let f = setup(4, 2);
        f.chain.add_deposits(&commitments(&[7, 42, 99])).await;

        let root = f.sync.sync_and_post_root(CHAIN).await.unwrap();
        assert_eq!(root, expected_root(4, &[7, 42, 99]));
        assert_eq!(f.chain.last_root().await.unwrap(), root);
        assert_eq!(f.chain.root_updates().await, 1);
        assert_eq!(
            f.sync.get_deposit_leaf_index(CHAIN, u64_to_field(42)).await.unwrap(),
            Some(1)
        );
        assert_eq!(f.store.load_leaves(CHAIN).unwrap(), commitments(&[7, 42, 99]));
    }

    #[tokio::test]
    async fn test_second_sync_is_noop() {
        let f = setup(4, 10);
        f.chain.add_deposits(&commitments(&[1, 2])).await;
        let first = f.sync.sync_chain(CHAIN).await.unwrap();
        let second = f.sync.sync_chain(CHAIN).await.unwrap();
        assert_eq!(first.inserted, 2);
        assert!(first.root_posted);
        assert_eq!(second.inserted, 0);
        assert!(!second.root_posted);
        assert_eq!(first.root, second.root);
        assert_eq!(f.chain.root_updates().await, 1);
    }

    #[tokio::test]
    async fn test_failed_root_post_keeps_inserts_and_retries_post_only() {
        let f = setup(4, 10);
        f.chain.add_deposits(&commitments(&[5, 6, 7])).await;
        f.chain.fail_root_posts(1).await;

        let err = f.sync.sync_and_post_root(CHAIN).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChainSubmission);
        assert_eq!(f.sync.leaf_count(CHAIN).await.unwrap(), 3);
        assert_eq!(f.chain.root_updates().await, 0);

        let report = f.sync.sync_chain(CHAIN).await.unwrap();
        assert_eq!(report.inserted, 0);
        assert!(report.root_posted);
        assert_eq!(report.root, expected_root(4, &[5, 6, 7]));
    }

    #[tokio::test]
    async fn test_restart_restores_tree_from_store() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryStore::new());
        let config = tree_config(4, 10);
        chain.add_deposits(&commitments(&[10, 20, 30])).await;
        let before = build(chain.clone(), store.clone(), &config)
            .sync_and_post_root(CHAIN)
            .await
            .unwrap();

        let restarted = build(chain.clone(), store, &config);
        assert_eq!(restarted.get_relayer_tree_root(CHAIN).await.unwrap(), before);
        chain.add_deposits(&commitments(&[40])).await;
        let report = restarted.sync_chain(CHAIN).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.root, expected_root(4, &[10, 20, 30, 40]));
    }

    #[tokio::test]
    async fn test_capacity_exceeded_surfaces_and_keeps_prefix() {
        let f = setup(2, 10);
        f.chain.add_deposits(&commitments(&[1, 2, 3, 4, 5])).await;
        let err = f.sync.sync_and_post_root(CHAIN).await.unwrap_err();
        assert!(matches!(err, RelayerError::CapacityExceeded { capacity: 4 }));
        assert_eq!(f.sync.leaf_count(CHAIN).await.unwrap(), 4);
        assert_eq!(f.store.leaf_count(CHAIN).unwrap(), 4);
    }

    #[tokio::test]
    async fn test_transient_read_failure_is_retried() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryStore::new());
        let sync = TreeSync::new(
            HashMap::from([(CHAIN, chain.clone())]),
            store,
            Arc::new(PoseidonHasher),
            &tree_config(4, 10),
            RetryPolicy {
                max_attempts: 3,
                base_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(1),
            },
        )
        .unwrap();
        chain.add_deposits(&commitments(&[1])).await;
        chain.fail_reads(2).await;
        assert!(sync.sync_and_post_root(CHAIN).await.is_ok());
        assert_eq!(sync.leaf_count(CHAIN).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_syncs_insert_once() {
        let f = Arc::new(setup(6, 3));
        f.chain.add_deposits(&commitments(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10])).await;

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let f = f.clone();
                tokio::spawn(async move { f.sync.sync_and_post_root(CHAIN).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(f.sync.leaf_count(CHAIN).await.unwrap(), 10);
        assert_eq!(f.chain.root_updates().await, 1);
        assert_eq!(
            f.sync.get_relayer_tree_root(CHAIN).await.unwrap(),
            expected_root(6, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10])
        );
    }

    #[tokio::test]
    async fn test_chain_behind_local_tree_is_desync() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryStore::new());
        store.put_leaves(CHAIN, 0, &commitments(&[1, 2, 3])).unwrap();
        chain.add_deposits(&commitments(&[1, 2])).await;

        let sync = build(chain.clone(), store.clone(), &tree_config(4, 10));
        let err = sync.sync_and_post_root(CHAIN).await.unwrap_err();
        assert!(matches!(err, RelayerError::Desync(_)));
        assert_eq!(sync.leaf_count(CHAIN).await.unwrap(), 3);
        assert_eq!(store.leaf_count(CHAIN).unwrap(), 3);
        assert_eq!(chain.root_updates().await, 0);
    }

    #[tokio::test]
    async fn test_conflicting_leaf_below_cursor_is_desync() {
        let f = setup(4, 10);
        f.chain.add_deposits(&commitments(&[7, 42, 99])).await;
        let root = f.sync.sync_and_post_root(CHAIN).await.unwrap();

        // The next deposit comes back claiming position 1, which holds 42 locally.
        f.chain.add_deposits(&commitments(&[5])).await;
        f.chain.misreport_deposit(3, 1).await;
        let err = f.sync.sync_and_post_root(CHAIN).await.unwrap_err();
        assert!(matches!(err, RelayerError::Desync(_)));
        assert_eq!(f.sync.get_relayer_tree_root(CHAIN).await.unwrap(), root);
        assert_eq!(f.store.load_leaves(CHAIN).unwrap(), commitments(&[7, 42, 99]));
        assert_eq!(f.chain.root_updates().await, 1);
    }

    #[tokio::test]
    async fn test_position_gap_is_desync() {
        let f = setup(4, 10);
        f.chain.add_deposits(&commitments(&[7, 42, 99])).await;
        f.chain.misreport_deposit(0, 1).await;
        let err = f.sync.sync_and_post_root(CHAIN).await.unwrap_err();
        assert!(matches!(err, RelayerError::Desync(_)));
        assert_eq!(f.sync.leaf_count(CHAIN).await.unwrap(), 0);
        assert_eq!(f.store.leaf_count(CHAIN).unwrap(), 0);

        // A gap mid-batch keeps the prefix before it and nothing after.
        let f = setup(4, 10);
        f.chain.add_deposits(&commitments(&[7, 42, 99])).await;
        f.chain.omit_deposit(1).await;
        let err = f.sync.sync_and_post_root(CHAIN).await.unwrap_err();
        assert!(matches!(err, RelayerError::Desync(_)));
        assert_eq!(f.sync.leaf_count(CHAIN).await.unwrap(), 1);
        assert_eq!(f.store.load_leaves(CHAIN).unwrap(), commitments(&[7]));
        assert_eq!(f.chain.root_updates().await, 0);
    }

    #[tokio::test]
    async fn test_empty_batch_is_desync() {
        let f = setup(4, 1);
        f.chain.add_deposits(&commitments(&[7, 42])).await;
        f.chain.omit_deposit(0).await;
        let err = f.sync.sync_and_post_root(CHAIN).await.unwrap_err();
        assert!(matches!(err, RelayerError::Desync(_)));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(f.sync.leaf_count(CHAIN).await.unwrap(), 0);
        assert_eq!(f.store.leaf_count(CHAIN).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_witness_for_synced_commitment() {
        let f = setup(4, 10);
        f.chain.add_deposits(&commitments(&[7, 42, 99])).await;
        f.sync.sync_and_post_root(CHAIN).await.unwrap();

        let witness = f.sync.witness_for(CHAIN, u64_to_field(99)).await.unwrap().unwrap();
        assert_eq!(witness.leaf_index, 2);
        assert!(witness.verify(u64_to_field(99), &PoseidonHasher).unwrap());
        assert!(f.sync.witness_for(CHAIN, u64_to_field(1)).await.unwrap().is_none());
        assert!(f.sync.is_local_root(CHAIN, witness.root).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_chain() {
        let f = setup(4, 10);
        assert!(matches!(
            f.sync.sync_and_post_root(1).await,
            Err(RelayerError::UnknownChain(1))
        ));
    }
}
