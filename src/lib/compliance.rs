//! Per-chain exclusion tree of flagged commitments.
//!
//! A witness is only worth handing out if the verifier contract recognises the
//! root it was built against, so the service also reconciles the local root
//! with the chain, within a bounded number of attempts.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::B256;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::smt::{NonMembershipWitness, SmtError, SparseMerkleTree};
use crate::error::{RelayerError, RootKind};
use crate::ports::chain::{ChainError, ChainPort};
use crate::ports::hasher::FieldHasher;
use crate::ports::store::TreeStore;
use crate::retry::RetryPolicy;

/// Value stored under a flagged key.
pub const FLAGGED: B256 = B256::with_last_byte(1);

pub struct ComplianceTree<C: ChainPort> {
    chains: HashMap<u64, Arc<C>>,
    trees: HashMap<u64, RwLock<SparseMerkleTree>>,
    store: Arc<dyn TreeStore>,
    retry: RetryPolicy,
}

impl<C: ChainPort> ComplianceTree<C> {
    /// Build one SMT per chain from the flagged set in `store`.
    pub fn new(
        chains: HashMap<u64, Arc<C>>,
        store: Arc<dyn TreeStore>,
        hasher: Arc<dyn FieldHasher>,
        levels: usize,
        retry: RetryPolicy,
    ) -> Result<Self, RelayerError> {
        let mut trees = HashMap::with_capacity(chains.len());
        for chain_id in chains.keys() {
            let entries = store.load_flagged(*chain_id)?;
            let tree = SparseMerkleTree::from_entries(levels, hasher.clone(), &entries)?;
            info!(chain_id, flagged = tree.len(), root = %tree.root(), "restored exclusion tree");
            trees.insert(*chain_id, RwLock::new(tree));
        }
        Ok(Self {
            chains,
            trees,
            store,
            retry,
        })
    }

    fn tree(&self, chain_id: u64) -> Result<&RwLock<SparseMerkleTree>, RelayerError> {
        self.trees
            .get(&chain_id)
            .ok_or(RelayerError::UnknownChain(chain_id))
    }

    fn chain(&self, chain_id: u64) -> Result<&C, RelayerError> {
        self.chains
            .get(&chain_id)
            .map(Arc::as_ref)
            .ok_or(RelayerError::UnknownChain(chain_id))
    }

    pub async fn is_flagged(&self, chain_id: u64, key: B256) -> Result<bool, RelayerError> {
        Ok(self.tree(chain_id)?.read().await.contains(key))
    }

    /// Non-membership witness for `key` against the current exclusion root.
    /// Flagged keys are refused with `CommitmentFlagged`.
    pub async fn generate_witness(
        &self,
        chain_id: u64,
        key: B256,
    ) -> Result<NonMembershipWitness, RelayerError> {
        let tree = self.tree(chain_id)?.read().await;
        if tree.contains(key) {
            return Err(RelayerError::CommitmentFlagged(key));
        }
        Ok(tree.non_membership_witness(key)?)
    }

    pub async fn get_exclusion_root(&self, chain_id: u64) -> Result<B256, RelayerError> {
        Ok(self.tree(chain_id)?.read().await.root())
    }

    /// Whether the chain's verifier currently accepts `root`.
    pub async fn is_known_root(&self, chain_id: u64, root: B256) -> Result<bool, RelayerError> {
        let chain = self.chain(chain_id)?;
        Ok(self
            .retry
            .run(
                "read exclusion root",
                || chain.is_known_exclusion_root(root),
                ChainError::is_transient,
            )
            .await?)
    }

    /// Add `key` to the flagged set. Flagging an already flagged key is a no-op.
    /// Returns the exclusion root after the change.
    pub async fn flag(&self, chain_id: u64, key: B256) -> Result<B256, RelayerError> {
        let mut tree = self.tree(chain_id)?.write().await;
        match tree.insert(key, FLAGGED) {
            Ok(root) => {
                self.store.put_flagged(chain_id, key, FLAGGED)?;
                info!(chain_id, %key, %root, "flagged key");
                Ok(root)
            }
            Err(SmtError::KeyExists(_)) => Ok(tree.root()),
            Err(e) => Err(e.into()),
        }
    }

    /// Post the local exclusion root if the chain does not know it yet.
    pub async fn post_root(&self, chain_id: u64) -> Result<B256, RelayerError> {
        let root = self.get_exclusion_root(chain_id).await?;
        if !self.is_known_root(chain_id, root).await? {
            let receipt = self.chain(chain_id)?.update_exclusion_root(root).await?;
            info!(chain_id, %root, tx = %receipt.tx_hash, "posted exclusion root");
        }
        Ok(root)
    }

    /// Make sure the verifier accepts `root` before a proof against it is sent.
    ///
    /// A root the chain already knows passes. A root equal to the local root
    /// is posted and rechecked, up to `retry.max_attempts` times. Anything else
    /// fails with `StaleRoot` so the client re-proves.
    pub async fn ensure_root_known(&self, chain_id: u64, root: B256) -> Result<(), RelayerError> {
        if self.is_known_root(chain_id, root).await? {
            return Ok(());
        }
        let chain = self.chain(chain_id)?;
        let stale = RelayerError::StaleRoot {
            kind: RootKind::Exclusion,
            root,
        };

        let attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=attempts {
            // The local root may move while we wait; stop once it no longer matches.
            if self.get_exclusion_root(chain_id).await? != root {
                debug!(chain_id, %root, "client exclusion root is not the local root");
                return Err(stale);
            }
            match chain.update_exclusion_root(root).await {
                Ok(receipt) => {
                    info!(chain_id, %root, tx = %receipt.tx_hash, attempt, "posted exclusion root")
                }
                Err(e) => warn!(chain_id, %root, attempt, error = %e, "exclusion root post failed"),
            }
            if self.is_known_root(chain_id, root).await? {
                return Ok(());
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry.delay_for(attempt)).await;
            }
        }

        warn!(chain_id, %root, attempts, "exclusion root still unknown after reconciliation");
        Err(stale)
    }
}
