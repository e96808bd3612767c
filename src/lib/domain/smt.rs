//! Sparse Merkle tree in the circomlib layout.
//!
//! - empty node: `0`
//! - leaf: `H(key, value, 1)`
//! - internal node: `H(left, right)`
//! - the path of a key is its bits, least significant first
//!
//! Leaves sit at the shallowest level where their path is unique, so a
//! non-membership witness ends either in an empty slot (`is_old0`) or in a
//! leaf holding a different key. Siblings are listed from the root down.
//!
//! A tree of `levels` levels places leaves no deeper than `levels - 1`: the
//! circuit verifier requires the last padded sibling to be zero.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{B256, U256};

use crate::crypto::field::is_canonical;
use crate::ports::hasher::{FieldHasher, HashError};

/// Most levels a path can use: the BN254 field is 254 bits wide.
pub const MAX_LEVELS: usize = 254;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SmtError {
    #[error("key {0} already present")]
    KeyExists(B256),

    #[error("key {0} is not a canonical field element")]
    NonCanonicalKey(B256),

    #[error("path for key {key} needs more than {levels} levels")]
    DepthExceeded { key: B256, levels: usize },

    #[error("invalid level count {0}")]
    InvalidLevels(usize),

    #[error("dangling node {0}")]
    MissingNode(B256),

    #[error(transparent)]
    Hash(#[from] HashError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Leaf { key: B256, value: B256 },
    Internal { left: B256, right: B256 },
}

/// Result of walking the tree towards a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindResult {
    pub found: bool,
    pub found_value: B256,
    /// Siblings from the root down to where the walk stopped (unpadded).
    pub siblings: Vec<B256>,
    /// Key and value of the different leaf occupying the slot, if any.
    pub not_found_key: B256,
    pub not_found_value: B256,
    pub is_old0: bool,
}

/// Witness that `key` is absent, in the shape the SMT verifier circuit takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonMembershipWitness {
    pub root: B256,
    /// Zero-padded to the tree's level count.
    pub siblings: Vec<B256>,
    pub old_key: B256,
    pub old_value: B256,
    pub is_old0: bool,
}

impl NonMembershipWitness {
    /// Recompute the root for `key`'s path and check it matches.
    pub fn verify(&self, key: B256, hasher: &dyn FieldHasher) -> Result<bool, HashError> {
        if !self.is_old0 && self.old_key == key {
            return Ok(false);
        }
        if self.siblings.last().is_some_and(|s| !s.is_zero()) {
            return Ok(false);
        }

        let depth = self
            .siblings
            .iter()
            .rposition(|s| !s.is_zero())
            .map_or(0, |i| i + 1);

        let mut node = if self.is_old0 {
            B256::ZERO
        } else {
            leaf_hash(hasher, self.old_key, self.old_value)?
        };
        let bits = U256::from_be_bytes(key.0);
        for level in (0..depth).rev() {
            let sibling = self.siblings[level];
            node = if bits.bit(level) {
                hasher.hash2(sibling, node)?
            } else {
                hasher.hash2(node, sibling)?
            };
        }
        Ok(node == self.root)
    }
}

fn leaf_hash(hasher: &dyn FieldHasher, key: B256, value: B256) -> Result<B256, HashError> {
    hasher.hash(&[key, value, B256::with_last_byte(1)])
}

pub struct SparseMerkleTree {
    levels: usize,
    hasher: Arc<dyn FieldHasher>,
    root: B256,
    nodes: HashMap<B256, Node>,
    entries: HashMap<B256, B256>,
}

impl SparseMerkleTree {
    pub fn new(levels: usize, hasher: Arc<dyn FieldHasher>) -> Result<Self, SmtError> {
        if levels == 0 || levels > MAX_LEVELS {
            return Err(SmtError::InvalidLevels(levels));
        }
        Ok(Self {
            levels,
            hasher,
            root: B256::ZERO,
            nodes: HashMap::new(),
            entries: HashMap::new(),
        })
    }

    /// Rebuild from stored key/value pairs. Insertion order does not affect the root.
    pub fn from_entries(
        levels: usize,
        hasher: Arc<dyn FieldHasher>,
        entries: &[(B256, B256)],
    ) -> Result<Self, SmtError> {
        let mut tree = Self::new(levels, hasher)?;
        for (key, value) in entries {
            tree.insert(*key, *value)?;
        }
        Ok(tree)
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn root(&self) -> B256 {
        self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: B256) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn get(&self, key: B256) -> Option<B256> {
        self.entries.get(&key).copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = (B256, B256)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }

    pub fn find(&self, key: B256) -> Result<FindResult, SmtError> {
        let bits = U256::from_be_bytes(key.0);
        let mut siblings = Vec::new();
        let mut node = self.root;
        let mut level = 0;

        loop {
            if node.is_zero() {
                return Ok(FindResult {
                    found: false,
                    found_value: B256::ZERO,
                    siblings,
                    not_found_key: B256::ZERO,
                    not_found_value: B256::ZERO,
                    is_old0: true,
                });
            }
            match self.nodes.get(&node) {
                Some(Node::Leaf { key: k, value }) if *k == key => {
                    return Ok(FindResult {
                        found: true,
                        found_value: *value,
                        siblings,
                        not_found_key: B256::ZERO,
                        not_found_value: B256::ZERO,
                        is_old0: false,
                    });
                }
                Some(Node::Leaf { key: k, value }) => {
                    return Ok(FindResult {
                        found: false,
                        found_value: B256::ZERO,
                        siblings,
                        not_found_key: *k,
                        not_found_value: *value,
                        is_old0: false,
                    });
                }
                Some(Node::Internal { left, right }) => {
                    if bits.bit(level) {
                        siblings.push(*left);
                        node = *right;
                    } else {
                        siblings.push(*right);
                        node = *left;
                    }
                    level += 1;
                }
                None => return Err(SmtError::MissingNode(node)),
            }
        }
    }

    /// Insert a new key. Returns the new root.
    pub fn insert(&mut self, key: B256, value: B256) -> Result<B256, SmtError> {
        if !is_canonical(key) {
            return Err(SmtError::NonCanonicalKey(key));
        }
        let found = self.find(key)?;
        if found.found {
            return Err(SmtError::KeyExists(key));
        }

        let new_bits = U256::from_be_bytes(key.0);
        let mut siblings = found.siblings;
        let mut new_nodes = Vec::new();

        if !found.is_old0 {
            // Push the existing leaf down until the two paths diverge.
            let old_bits = U256::from_be_bytes(found.not_found_key.0);
            while old_bits.bit(siblings.len()) == new_bits.bit(siblings.len()) {
                siblings.push(B256::ZERO);
                if siblings.len() >= self.levels - 1 {
                    return Err(SmtError::DepthExceeded {
                        key,
                        levels: self.levels,
                    });
                }
            }
            siblings.push(leaf_hash(
                self.hasher.as_ref(),
                found.not_found_key,
                found.not_found_value,
            )?);
        }
        if siblings.len() >= self.levels {
            return Err(SmtError::DepthExceeded {
                key,
                levels: self.levels,
            });
        }

        let mut node = leaf_hash(self.hasher.as_ref(), key, value)?;
        new_nodes.push((node, Node::Leaf { key, value }));
        for level in (0..siblings.len()).rev() {
            let sibling = siblings[level];
            let (left, right) = if new_bits.bit(level) {
                (sibling, node)
            } else {
                (node, sibling)
            };
            node = self.hasher.hash2(left, right)?;
            new_nodes.push((node, Node::Internal { left, right }));
        }

        self.nodes.extend(new_nodes);
        self.entries.insert(key, value);
        self.root = node;
        Ok(node)
    }

    /// Non-membership witness for `key` against the current root.
    pub fn non_membership_witness(&self, key: B256) -> Result<NonMembershipWitness, SmtError> {
        let found = self.find(key)?;
        if found.found {
            return Err(SmtError::KeyExists(key));
        }
        if found.siblings.len() >= self.levels {
            return Err(SmtError::DepthExceeded {
                key,
                levels: self.levels,
            });
        }

        let mut siblings = found.siblings;
        siblings.resize(self.levels, B256::ZERO);
        Ok(NonMembershipWitness {
            root: self.root,
            siblings,
            old_key: found.not_found_key,
            old_value: found.not_found_value,
            is_old0: found.is_old0,
        })
    }
}

impl std::fmt::Debug for SparseMerkleTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseMerkleTree")
            .field("levels", &self.levels)
            .field("len", &self.len())
            .field("root", &self.root)
            .finish()
    }
}
