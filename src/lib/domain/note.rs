use alloy::primitives::{Address, B256, U256, uint};

use super::commitment::Commitment;
use crate::crypto::field::{address_to_field, u64_to_field};
use crate::ports::hasher::{FieldHasher, HashError};

/// Upper bound on a note amount (248 bits, so sums stay inside the field).
pub const MAX_AMOUNT: U256 =
    uint!(0x00ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff_U256);

/// A shielded note. Notes are built client-side; the relayer only needs this
/// to recompute commitments in tests and tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub owner: B256,
    pub amount: U256,
    pub asset: B256,
    pub blinding: B256,
}

#[derive(Debug, thiserror::Error)]
pub enum NoteError {
    #[error("amount {0} exceeds maximum")]
    AmountTooLarge(U256),

    #[error(transparent)]
    Hash(#[from] HashError),
}

impl Note {
    /// commitment = H(owner, amount, asset, blinding, chainId)
    pub fn commitment(
        &self,
        hasher: &dyn FieldHasher,
        chain_id: u64,
    ) -> Result<Commitment, NoteError> {
        if self.amount > MAX_AMOUNT {
            return Err(NoteError::AmountTooLarge(self.amount));
        }
        let digest = hasher.hash(&[
            self.owner,
            B256::from(self.amount),
            self.asset,
            self.blinding,
            u64_to_field(chain_id),
        ])?;
        Ok(Commitment(digest))
    }
}

/// Asset identifier bound into proofs: H(chainId, token). Native ETH uses the
/// zero address.
pub fn asset_id(
    hasher: &dyn FieldHasher,
    chain_id: u64,
    token: Address,
) -> Result<B256, HashError> {
    hasher.hash2(u64_to_field(chain_id), address_to_field(token))
}
