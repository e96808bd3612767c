use alloy::primitives::B256;

use crate::domain::nullifier::NullifierKey;

/// Durable cooldown table: nullifier key -> expiry (unix millis).
///
/// Implementations:
/// - `MemoryStore` (tests, single process)
/// - `SledStore` (survives restarts)
pub trait CooldownStore: Send + Sync {
    fn cooldown_until(&self, key: &NullifierKey) -> Result<Option<u64>, StoreError>;

    fn set_cooldown(&self, key: &NullifierKey, until_ms: u64) -> Result<(), StoreError>;

    /// Remove rows whose expiry is at or before `now_ms`. Returns how many went.
    fn purge_expired(&self, now_ms: u64) -> Result<usize, StoreError>;
}

/// Per-chain persistence for the commitment tree and the exclusion tree.
pub trait TreeStore: Send + Sync {
    /// All stored leaves for `chain_id`, in leaf order.
    fn load_leaves(&self, chain_id: u64) -> Result<Vec<B256>, StoreError>;

    /// Write `leaves` at positions `start..`. Rewriting an existing position
    /// with the same value is a no-op.
    fn put_leaves(&self, chain_id: u64, start: u64, leaves: &[B256]) -> Result<(), StoreError>;

    fn leaf_count(&self, chain_id: u64) -> Result<u64, StoreError>;

    fn load_flagged(&self, chain_id: u64) -> Result<Vec<(B256, B256)>, StoreError>;

    fn put_flagged(&self, chain_id: u64, key: B256, value: B256) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("leaf log gap: expected position {expected}, got {got}")]
    Gap { expected: u64, got: u64 },
}
