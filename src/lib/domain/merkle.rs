//! Append-only, fixed-depth binary Merkle tree over field elements.
//!
//! Mirrors the pool contract's incremental tree: leaves are appended left to
//! right and empty subtrees hash to per-level zero sentinels, so a partially
//! filled tree has the same root on both sides.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use alloy::primitives::B256;

use crate::ports::hasher::{FieldHasher, HashError};

/// Largest depth accepted; leaf indices must fit in `u64`.
pub const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MerkleError {
    #[error("tree is full ({capacity} leaves)")]
    CapacityExceeded { capacity: u64 },

    #[error("leaf index {index} out of range (tree has {len} leaves)")]
    IndexOutOfRange { index: u64, len: u64 },

    #[error("invalid tree depth {0}")]
    InvalidDepth(usize),

    #[error(transparent)]
    Hash(#[from] HashError),
}

/// Inclusion witness for one leaf, taken together with the root it proves
/// against so a caller never pairs a root with siblings from a later state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleWitness {
    pub leaf_index: u64,
    /// Sibling hashes from the leaf level up to the root's children.
    pub siblings: Vec<B256>,
    pub root: B256,
}

impl MerkleWitness {
    /// Path direction bits: `true` when the node at that level is a right child.
    pub fn path_indices(&self) -> Vec<bool> {
        (0..self.siblings.len())
            .map(|level| (self.leaf_index >> level) & 1 == 1)
            .collect()
    }

    /// Recompute the root from `leaf` and the sibling path.
    pub fn compute_root(&self, leaf: B256, hasher: &dyn FieldHasher) -> Result<B256, HashError> {
        let mut current = leaf;
        for (sibling, is_right) in self.siblings.iter().zip(self.path_indices()) {
            current = if is_right {
                hasher.hash2(*sibling, current)?
            } else {
                hasher.hash2(current, *sibling)?
            };
        }
        Ok(current)
    }

    pub fn verify(&self, leaf: B256, hasher: &dyn FieldHasher) -> Result<bool, HashError> {
        Ok(self.compute_root(leaf, hasher)? == self.root)
    }
}

pub struct MerkleTree {
    depth: usize,
    hasher: Arc<dyn FieldHasher>,
    /// `zeros[l]` is the root of an empty subtree of height `l`.
    zeros: Vec<B256>,
    /// `levels[0]` holds the leaves; `levels[l]` the filled nodes at height `l`.
    levels: Vec<Vec<B256>>,
    leaf_indices: HashMap<B256, u64>,
    root_history: VecDeque<B256>,
    history_size: usize,
}

impl MerkleTree {
    pub fn new(
        depth: usize,
        history_size: usize,
        hasher: Arc<dyn FieldHasher>,
    ) -> Result<Self, MerkleError> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(MerkleError::InvalidDepth(depth));
        }

        let mut zeros = Vec::with_capacity(depth + 1);
        zeros.push(B256::ZERO);
        for level in 0..depth {
            let z = zeros[level];
            zeros.push(hasher.hash2(z, z)?);
        }

        let mut root_history = VecDeque::with_capacity(history_size.max(1));
        root_history.push_back(zeros[depth]);

        Ok(Self {
            depth,
            hasher,
            zeros,
            levels: vec![Vec::new(); depth + 1],
            leaf_indices: HashMap::new(),
            root_history,
            history_size: history_size.max(1),
        })
    }

    /// Rebuild a tree by replaying `leaves` in order.
    pub fn from_leaves(
        depth: usize,
        history_size: usize,
        hasher: Arc<dyn FieldHasher>,
        leaves: &[B256],
    ) -> Result<Self, MerkleError> {
        let mut tree = Self::new(depth, history_size, hasher)?;
        for leaf in leaves {
            tree.insert(*leaf)?;
        }
        Ok(tree)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    pub fn len(&self) -> u64 {
        self.levels[0].len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    pub fn zero(&self, level: usize) -> Option<B256> {
        self.zeros.get(level).copied()
    }

    pub fn root(&self) -> B256 {
        self.levels[self.depth]
            .first()
            .copied()
            .unwrap_or(self.zeros[self.depth])
    }

    /// Leaf at `index`, if inserted.
    pub fn leaf(&self, index: u64) -> Option<B256> {
        self.levels[0].get(usize::try_from(index).ok()?).copied()
    }

    pub fn leaves(&self) -> &[B256] {
        &self.levels[0]
    }

    /// Append a leaf and return its index.
    ///
    /// The new path is computed before any node is written, so a hash failure
    /// leaves the tree unchanged.
    pub fn insert(&mut self, leaf: B256) -> Result<u64, MerkleError> {
        let index = self.len();
        if index >= self.capacity() {
            return Err(MerkleError::CapacityExceeded {
                capacity: self.capacity(),
            });
        }

        let mut path = Vec::with_capacity(self.depth);
        let mut node = leaf;
        let mut idx = index as usize;
        for level in 0..self.depth {
            node = if idx % 2 == 0 {
                self.hasher.hash2(node, self.zeros[level])?
            } else {
                self.hasher.hash2(self.levels[level][idx - 1], node)?
            };
            idx /= 2;
            path.push(node);
        }

        self.levels[0].push(leaf);
        let mut idx = index as usize;
        for (level, node) in path.into_iter().enumerate() {
            idx /= 2;
            let parent = &mut self.levels[level + 1];
            if idx < parent.len() {
                parent[idx] = node;
            } else {
                parent.push(node);
            }
        }

        self.leaf_indices.entry(leaf).or_insert(index);
        self.record_root();
        Ok(index)
    }

    pub fn witness(&self, index: u64) -> Result<MerkleWitness, MerkleError> {
        if index >= self.len() {
            return Err(MerkleError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }

        let mut siblings = Vec::with_capacity(self.depth);
        let mut idx = index as usize;
        for level in 0..self.depth {
            let sibling = self.levels[level]
                .get(idx ^ 1)
                .copied()
                .unwrap_or(self.zeros[level]);
            siblings.push(sibling);
            idx /= 2;
        }

        Ok(MerkleWitness {
            leaf_index: index,
            siblings,
            root: self.root(),
        })
    }

    /// Index of the first leaf equal to `commitment`.
    pub fn find_leaf_index(&self, commitment: B256) -> Option<u64> {
        self.leaf_indices.get(&commitment).copied()
    }

    /// Whether `root` is the current root or one of the recent ones.
    pub fn is_known_root(&self, root: B256) -> bool {
        self.root_history.contains(&root)
    }

    fn record_root(&mut self) {
        if self.root_history.len() == self.history_size {
            self.root_history.pop_front();
        }
        self.root_history.push_back(self.root());
    }
}

impl std::fmt::Debug for MerkleTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerkleTree")
            .field("depth", &self.depth)
            .field("len", &self.len())
            .field("root", &self.root())
            .finish()
    }
}
