use alloy::primitives::B256;

/// Port for the field hash used by every tree and commitment.
///
/// Implementations:
/// - `PoseidonHasher` (circom-compatible Poseidon over BN254)
pub trait FieldHasher: Send + Sync {
    /// Hash an ordered list of field elements into one field element.
    fn hash(&self, inputs: &[B256]) -> Result<B256, HashError>;

    fn hash2(&self, left: B256, right: B256) -> Result<B256, HashError> {
        self.hash(&[left, right])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    #[error("unsupported input width: {0}")]
    UnsupportedWidth(usize),

    #[error("hash computation failed: {0}")]
    Internal(String),
}
